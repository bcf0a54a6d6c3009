//! Reading exported packets back.
//!
//! Trees are rebuilt from parent links. Siblings come back in the order they
//! were exported, since detail ids are issued in pre-order.

use crate::ids::{BufferId, DetailId};
use crate::registry::FieldType;
use crate::summary::{parse_timestamp, PacketSummary};
use crate::{Error, Result};
use fieldtree::{Field, FieldKind, FieldValue};
use rusqlite::types::Value;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct FieldTypeRecord {
    identifier: String,
    kind: String,
    display_name: String,
}

impl TryFrom<FieldTypeRecord> for FieldType {
    type Error = Error;

    fn try_from(record: FieldTypeRecord) -> Result<Self> {
        let kind = record
            .kind
            .parse()
            .map_err(|e| Error::Corrupt(format!("field type {}: {e}", record.identifier)))?;
        Ok(FieldType {
            identifier: record.identifier,
            kind,
            display_name: record.display_name,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SummaryRecord {
    timestamp: Option<String>,
    captured_length: Option<u32>,
    interface_id: Option<u32>,
    source: Option<String>,
    destination: Option<String>,
    protocol: Option<String>,
    info: Option<String>,
}

impl TryFrom<SummaryRecord> for PacketSummary {
    type Error = Error;

    fn try_from(record: SummaryRecord) -> Result<Self> {
        let timestamp = match record.timestamp {
            Some(text) => Some(
                parse_timestamp(&text)
                    .ok_or_else(|| Error::Corrupt(format!("unreadable timestamp {text:?}")))?,
            ),
            None => None,
        };
        Ok(PacketSummary {
            timestamp,
            captured_length: record.captured_length,
            interface_id: record.interface_id,
            source: record.source,
            destination: record.destination,
            protocol: record.protocol,
            info: record.info,
        })
    }
}

/// A persisted packet buffer, without its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferRecord {
    pub buffer_id: BufferId,
    pub packet_number: u32,
    pub byte_length: u32,
}

/// A persisted field occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailRecord {
    pub detail_id: DetailId,
    pub buffer_id: BufferId,
    pub parent_detail_id: Option<DetailId>,
    pub field: Option<FieldType>,
    pub value: FieldValue,
    pub representation: Option<String>,
    pub byte_offset: u32,
    pub byte_length: u32,
}

/// All registered field types, by identifier.
pub fn load_field_types(conn: &Connection) -> Result<Vec<FieldType>> {
    let mut stmt = conn.prepare(
        "SELECT identifier, kind, display_name FROM field_types ORDER BY identifier",
    )?;
    let rows = serde_rusqlite::from_rows::<FieldTypeRecord>(stmt.query([])?);
    rows.map(|record| FieldType::try_from(record?)).collect()
}

/// All buffers, in export order.
pub fn load_buffers(conn: &Connection) -> Result<Vec<BufferRecord>> {
    let mut stmt = conn.prepare(
        "SELECT buffer_id, packet_number, byte_length FROM buffers ORDER BY buffer_id",
    )?;
    let rows = serde_rusqlite::from_rows::<BufferRecord>(stmt.query([])?);
    Ok(rows.collect::<std::result::Result<_, _>>()?)
}

/// Buffers exported for one packet number.
pub fn find_buffers(conn: &Connection, packet_number: u32) -> Result<Vec<BufferRecord>> {
    let mut stmt = conn.prepare(
        "SELECT buffer_id, packet_number, byte_length FROM buffers \
         WHERE packet_number = ?1 ORDER BY buffer_id",
    )?;
    let rows = serde_rusqlite::from_rows::<BufferRecord>(stmt.query([packet_number])?);
    Ok(rows.collect::<std::result::Result<_, _>>()?)
}

/// The raw bytes stored with a buffer, if any were exported.
pub fn load_buffer_data(conn: &Connection, buffer_id: BufferId) -> Result<Option<Vec<u8>>> {
    let result = conn.query_row(
        "SELECT data FROM buffers WHERE buffer_id = ?1",
        [buffer_id],
        |row| row.get(0),
    );

    match result {
        Ok(data) => Ok(data),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            Err(Error::NotFound(format!("buffer {buffer_id}")))
        }
        Err(e) => Err(e.into()),
    }
}

/// The summary stored with a buffer, if one was exported.
pub fn load_summary(conn: &Connection, buffer_id: BufferId) -> Result<Option<PacketSummary>> {
    let mut stmt = conn.prepare(
        "SELECT timestamp, captured_length, interface_id, source, destination, protocol, info \
         FROM buffers WHERE buffer_id = ?1",
    )?;
    let record = serde_rusqlite::from_rows::<SummaryRecord>(stmt.query([buffer_id])?)
        .next()
        .ok_or_else(|| Error::NotFound(format!("buffer {buffer_id}")))??;

    let summary = PacketSummary::try_from(record)?;
    Ok((!summary.is_empty()).then_some(summary))
}

/// The detail records of one buffer, parents before children.
pub fn load_details(conn: &Connection, buffer_id: BufferId) -> Result<Vec<DetailRecord>> {
    let mut stmt = conn.prepare(
        "SELECT d.detail_id, d.buffer_id, d.parent_detail_id, d.value, d.representation, \
                d.byte_offset, d.byte_length, t.identifier, t.kind, t.display_name \
         FROM detail_records d \
         LEFT JOIN field_types t ON t.identifier = d.field_identifier \
         WHERE d.buffer_id = ?1 \
         ORDER BY d.detail_id",
    )?;

    let rows = stmt.query_map(params![buffer_id], |row| {
        let field = match row.get::<_, Option<String>>(7)? {
            Some(identifier) => Some(FieldTypeRecord {
                identifier,
                kind: row.get(8)?,
                display_name: row.get(9)?,
            }),
            None => None,
        };
        Ok((
            DetailRecord {
                detail_id: row.get(0)?,
                buffer_id: row.get(1)?,
                parent_detail_id: row.get(2)?,
                field: None,
                value: FieldValue::None,
                representation: row.get(4)?,
                byte_offset: row.get(5)?,
                byte_length: row.get(6)?,
            },
            row.get::<_, Value>(3)?,
            field,
        ))
    })?;

    let mut details = Vec::new();
    for row in rows {
        let (mut record, value, field) = row?;
        let field = field.map(FieldType::try_from).transpose()?;
        record.value = decode_value(field.as_ref().map(|f| f.kind), value)
            .ok_or_else(|| Error::Corrupt(format!("detail {} has a mistyped value", record.detail_id)))?;
        record.field = field;
        details.push(record);
    }
    Ok(details)
}

/// Rebuild the field tree exported as `buffer_id`.
pub fn load_tree(conn: &Connection, buffer_id: BufferId) -> Result<Field> {
    let details = load_details(conn, buffer_id)?;
    if details.is_empty() {
        return Err(Error::NotFound(format!("field tree of buffer {buffer_id}")));
    }

    let index: HashMap<DetailId, usize> = details
        .iter()
        .enumerate()
        .map(|(i, record)| (record.detail_id, i))
        .collect();
    let parents: Vec<Option<DetailId>> = details.iter().map(|r| r.parent_detail_id).collect();
    let mut slots: Vec<Option<Field>> = details.into_iter().map(|r| Some(to_field(r))).collect();

    // Children always follow their parent, so walking backwards completes
    // every subtree before its parent is moved.
    let mut root = None;
    for i in (0..slots.len()).rev() {
        let mut field = slots[i]
            .take()
            .ok_or_else(|| Error::Corrupt(format!("detail at position {i} used twice")))?;
        field.children_mut().reverse();

        match parents[i] {
            None if root.is_none() => root = Some(field),
            None => {
                return Err(Error::Corrupt(format!(
                    "buffer {buffer_id} has more than one root"
                )));
            }
            Some(parent) => {
                let slot = index
                    .get(&parent)
                    .filter(|&&p| p < i)
                    .and_then(|&p| slots[p].as_mut())
                    .ok_or_else(|| {
                        Error::Corrupt(format!("dangling parent {parent} in buffer {buffer_id}"))
                    })?;
                slot.push_child(field);
            }
        }
    }

    root.ok_or_else(|| Error::Corrupt(format!("buffer {buffer_id} has no root")))
}

/// The highest buffer and detail ids present, or zero for an empty store.
pub fn last_ids(conn: &Connection) -> Result<(i64, i64)> {
    let last_buffer = conn.query_row(
        "SELECT COALESCE(MAX(buffer_id), 0) FROM buffers",
        [],
        |row| row.get(0),
    )?;
    let last_detail = conn.query_row(
        "SELECT COALESCE(MAX(detail_id), 0) FROM detail_records",
        [],
        |row| row.get(0),
    )?;
    Ok((last_buffer, last_detail))
}

fn to_field(record: DetailRecord) -> Field {
    let field = match record.field {
        Some(field_type) => Field::new(field_type.info(), record.value),
        None => Field::root(),
    };
    let field = field.at(record.byte_offset, record.byte_length);
    match record.representation {
        Some(representation) => field.with_representation(representation),
        None => field,
    }
}

/// Interpret a stored value by the kind of its field.
fn decode_value(kind: Option<FieldKind>, value: Value) -> Option<FieldValue> {
    let decoded = match (kind, value) {
        (_, Value::Null) => FieldValue::None,
        (Some(FieldKind::Boolean), Value::Integer(i)) => FieldValue::Boolean(i != 0),
        (Some(FieldKind::Integer), Value::Integer(i)) => FieldValue::Integer(i),
        (Some(FieldKind::Unsigned), Value::Integer(i)) => FieldValue::Unsigned(i as u64),
        (Some(FieldKind::Float), Value::Real(f)) => FieldValue::Float(f),
        (Some(FieldKind::Float), Value::Integer(i)) => FieldValue::Float(i as f64),
        (Some(FieldKind::String), Value::Text(s)) => FieldValue::String(s),
        (Some(FieldKind::Bytes), Value::Blob(b)) => FieldValue::Bytes(b),
        _ => return None,
    };
    Some(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use fieldtree::FieldInfo;

    fn store() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO field_types VALUES ('p.a', 'unsigned', 'A');
            INSERT INTO field_types VALUES ('p.b', 'string', 'B');
            INSERT INTO buffers (buffer_id, packet_number, byte_length, data, protocol, info)
                VALUES (5, 17, 3, X'010203', 'DNS', 'Standard query');
            INSERT INTO detail_records VALUES (10, 5, NULL, NULL, NULL, NULL, 0, 3);
            INSERT INTO detail_records VALUES (11, 5, 10, 'p.a', -1, 'A: max', 0, 2);
            INSERT INTO detail_records VALUES (12, 5, 11, 'p.b', 'inner', NULL, 0, 1);
            INSERT INTO detail_records VALUES (13, 5, 10, 'p.b', 'second', NULL, 2, 1);
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_load_field_types_and_buffers() {
        let conn = store();
        let types = load_field_types(&conn).unwrap();
        assert_eq!(types.len(), 2);
        assert_eq!(types[0].kind, FieldKind::Unsigned);

        assert_eq!(
            load_buffers(&conn).unwrap(),
            vec![BufferRecord {
                buffer_id: BufferId(5),
                packet_number: 17,
                byte_length: 3,
            }]
        );
        assert_eq!(find_buffers(&conn, 17).unwrap().len(), 1);
        assert!(find_buffers(&conn, 18).unwrap().is_empty());
        assert_eq!(
            load_buffer_data(&conn, BufferId(5)).unwrap(),
            Some(vec![1, 2, 3])
        );
        assert!(matches!(
            load_buffer_data(&conn, BufferId(6)),
            Err(Error::NotFound(_))
        ));
        assert_eq!(last_ids(&conn).unwrap(), (5, 13));
    }

    #[test]
    fn test_load_summary() {
        let conn = store();
        let summary = load_summary(&conn, BufferId(5)).unwrap().unwrap();
        assert_eq!(summary.protocol.as_deref(), Some("DNS"));
        assert_eq!(summary.info.as_deref(), Some("Standard query"));
        assert_eq!(summary.timestamp, None);

        conn.execute("UPDATE buffers SET timestamp = 'noon' WHERE buffer_id = 5", [])
            .unwrap();
        assert!(matches!(load_summary(&conn, BufferId(5)), Err(Error::Corrupt(_))));

        conn.execute_batch(
            "INSERT INTO buffers (buffer_id, packet_number, byte_length) VALUES (6, 18, 0)",
        )
        .unwrap();
        assert_eq!(load_summary(&conn, BufferId(6)).unwrap(), None);
        assert!(matches!(load_summary(&conn, BufferId(7)), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_load_tree() {
        let conn = store();
        let a = FieldInfo::new("p.a", "A", FieldKind::Unsigned);
        let b = FieldInfo::new("p.b", "B", FieldKind::String);
        let expected = Field::root()
            .at(0, 3)
            .with_child(
                Field::new(a, u64::MAX)
                    .at(0, 2)
                    .with_representation("A: max")
                    .with_child(Field::new(b.clone(), "inner").at(0, 1)),
            )
            .with_child(Field::new(b, "second").at(2, 1));

        assert_eq!(load_tree(&conn, BufferId(5)).unwrap(), expected);
    }

    #[test]
    fn test_missing_tree() {
        let conn = store();
        assert!(matches!(
            load_tree(&conn, BufferId(99)),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_mistyped_value_is_corrupt() {
        let conn = store();
        conn.execute_batch(
            "INSERT INTO detail_records VALUES (14, 5, 10, 'p.a', 'text', NULL, 0, 0);",
        )
        .unwrap();
        assert!(matches!(
            load_details(&conn, BufferId(5)),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_decode_value() {
        assert_eq!(
            decode_value(Some(FieldKind::Boolean), Value::Integer(1)),
            Some(FieldValue::Boolean(true))
        );
        assert_eq!(
            decode_value(Some(FieldKind::Bytes), Value::Null),
            Some(FieldValue::None)
        );
        assert_eq!(decode_value(None, Value::Integer(1)), None);
    }
}
