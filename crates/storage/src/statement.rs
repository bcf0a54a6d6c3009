//! Rows queued for insertion.

use crate::ids::{BufferId, DetailId};
use crate::registry::FieldType;
use crate::sanitize::{self, SqlLiteral};
use crate::summary::{format_timestamp, PacketSummary};
use crate::schema::{INSERT_BUFFER, INSERT_DETAIL, INSERT_FIELD_TYPE};
use fieldtree::FieldValue;
use rusqlite::types::Value;
use rusqlite::{params, Connection};

/// One persisted packet.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferRow {
    pub buffer_id: BufferId,
    pub packet_number: u32,
    pub byte_length: u32,
    pub data: Option<Vec<u8>>,
    pub summary: Option<PacketSummary>,
}

/// One field occurrence within a packet.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailRow {
    pub detail_id: DetailId,
    pub buffer_id: BufferId,
    pub parent_detail_id: Option<DetailId>,
    pub field_identifier: Option<String>,
    pub value: Value,
    pub representation: Option<String>,
    pub byte_offset: u32,
    pub byte_length: u32,
}

/// A single insert.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    FieldType(FieldType),
    Buffer(BufferRow),
    Detail(DetailRow),
}

impl Statement {
    /// Run as a prepared statement with bound parameters.
    pub fn execute(&self, conn: &Connection) -> rusqlite::Result<()> {
        match self {
            Statement::FieldType(field_type) => {
                conn.prepare_cached(INSERT_FIELD_TYPE)?.execute(params![
                    field_type.identifier,
                    field_type.kind.as_str(),
                    field_type.display_name,
                ])?;
            }
            Statement::Buffer(row) => {
                let summary = row.summary.as_ref();
                conn.prepare_cached(INSERT_BUFFER)?.execute(params![
                    row.buffer_id,
                    row.packet_number,
                    row.byte_length,
                    row.data,
                    summary.and_then(|s| s.timestamp.as_ref()).map(format_timestamp),
                    summary.and_then(|s| s.captured_length),
                    summary.and_then(|s| s.interface_id),
                    summary.and_then(|s| s.source.as_deref()),
                    summary.and_then(|s| s.destination.as_deref()),
                    summary.and_then(|s| s.protocol.as_deref()),
                    summary.and_then(|s| s.info.as_deref()),
                ])?;
            }
            Statement::Detail(row) => {
                conn.prepare_cached(INSERT_DETAIL)?.execute(params![
                    row.detail_id,
                    row.buffer_id,
                    row.parent_detail_id,
                    row.field_identifier,
                    row.value,
                    row.representation,
                    row.byte_offset,
                    row.byte_length,
                ])?;
            }
        }
        Ok(())
    }

    /// Render as a self-contained SQL statement.
    pub fn to_sql(&self) -> String {
        match self {
            Statement::FieldType(field_type) => format!(
                "INSERT INTO field_types (identifier, kind, display_name) VALUES ({}, {}, {});",
                sanitize::text(&field_type.identifier),
                sanitize::text(field_type.kind.as_str()),
                sanitize::text(&field_type.display_name),
            ),
            Statement::Buffer(row) => {
                let summary = row.summary.as_ref();
                let text = |value: Option<&str>| value.map_or_else(sanitize::null, sanitize::text);
                let unsigned = |value: Option<u32>| {
                    value.map_or_else(sanitize::null, |v| sanitize::integer(i64::from(v)))
                };
                format!(
                    "INSERT INTO buffers \
                     (buffer_id, packet_number, byte_length, data, timestamp, captured_length, interface_id, source, destination, protocol, info) \
                     VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {});",
                    sanitize::integer(row.buffer_id.0),
                    sanitize::integer(i64::from(row.packet_number)),
                    sanitize::integer(i64::from(row.byte_length)),
                    row.data
                        .as_deref()
                        .map_or_else(sanitize::null, sanitize::bytes),
                    summary
                        .and_then(|s| s.timestamp.as_ref())
                        .map_or_else(sanitize::null, |t| sanitize::text(&format_timestamp(t))),
                    unsigned(summary.and_then(|s| s.captured_length)),
                    unsigned(summary.and_then(|s| s.interface_id)),
                    text(summary.and_then(|s| s.source.as_deref())),
                    text(summary.and_then(|s| s.destination.as_deref())),
                    text(summary.and_then(|s| s.protocol.as_deref())),
                    text(summary.and_then(|s| s.info.as_deref())),
                )
            }
            Statement::Detail(row) => format!(
                "INSERT INTO detail_records \
                 (detail_id, buffer_id, parent_detail_id, field_identifier, value, representation, byte_offset, byte_length) \
                 VALUES ({}, {}, {}, {}, {}, {}, {}, {});",
                sanitize::integer(row.detail_id.0),
                sanitize::integer(row.buffer_id.0),
                row.parent_detail_id
                    .map_or_else(sanitize::null, |id| sanitize::integer(id.0)),
                row.field_identifier
                    .as_deref()
                    .map_or_else(sanitize::null, sanitize::text),
                value_literal(&row.value),
                row.representation
                    .as_deref()
                    .map_or_else(sanitize::null, sanitize::text),
                sanitize::integer(i64::from(row.byte_offset)),
                sanitize::integer(i64::from(row.byte_length)),
            ),
        }
    }

    /// The catalog entry this statement creates, if any.
    pub fn registered_field(&self) -> Option<&str> {
        match self {
            Statement::FieldType(field_type) => Some(field_type.identifier.as_str()),
            _ => None,
        }
    }
}

/// Convert a field value to its stored form.
///
/// Booleans become 0 or 1. Unsigned values are stored with the same bit
/// pattern as a signed 64-bit integer and restored using the field's kind.
pub fn stored_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::None => Value::Null,
        FieldValue::Boolean(b) => Value::Integer(i64::from(*b)),
        FieldValue::Integer(i) => Value::Integer(*i),
        FieldValue::Unsigned(u) => Value::Integer(*u as i64),
        FieldValue::Float(f) => Value::Real(*f),
        FieldValue::String(s) => Value::Text(s.clone()),
        FieldValue::Bytes(b) => Value::Blob(b.clone()),
    }
}

fn value_literal(value: &Value) -> SqlLiteral {
    match value {
        Value::Null => sanitize::null(),
        Value::Integer(i) => sanitize::integer(*i),
        Value::Real(f) => sanitize::real(*f),
        Value::Text(s) => sanitize::text(s),
        Value::Blob(b) => sanitize::bytes(b),
    }
}
