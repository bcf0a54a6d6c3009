//! Schema definitions for export stores.
//!
//! ```text
//! field_types(identifier PK, kind, display_name)
//! buffers(buffer_id PK, packet_number, byte_length, data, timestamp, captured_length,
//!         interface_id, source, destination, protocol, info)
//! detail_records(detail_id PK, buffer_id -> buffers, parent_detail_id -> detail_records,
//!                field_identifier -> field_types, value, representation,
//!                byte_offset, byte_length)
//! ```
//!
//! `detail_records.value` is declared without a type so the store keeps each
//! value exactly as bound. Its interpretation is given by the kind of the
//! referenced field type.

use crate::{Error, Result, SessionId};
use chrono::Utc;
use rusqlite::{params, Connection};

/// Version of the persisted layout, recorded in the `info` table.
pub const FORMAT_VERSION: u32 = 1;

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS info (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS field_types (
    identifier TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN ('none', 'boolean', 'integer', 'unsigned', 'float', 'string', 'bytes')),
    display_name TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS buffers (
    buffer_id INTEGER PRIMARY KEY,
    packet_number INTEGER NOT NULL,
    byte_length INTEGER NOT NULL,
    data BLOB,
    timestamp TEXT,
    captured_length INTEGER,
    interface_id INTEGER,
    source TEXT,
    destination TEXT,
    protocol TEXT,
    info TEXT
);

CREATE TABLE IF NOT EXISTS detail_records (
    detail_id INTEGER PRIMARY KEY,
    buffer_id INTEGER NOT NULL REFERENCES buffers(buffer_id),
    parent_detail_id INTEGER REFERENCES detail_records(detail_id),
    field_identifier TEXT REFERENCES field_types(identifier),
    value,
    representation TEXT,
    byte_offset INTEGER NOT NULL,
    byte_length INTEGER NOT NULL
);
"#;

const CLEAR_TABLES: &str = r#"
DROP INDEX IF EXISTS buffers_packet_number_idx;
DROP INDEX IF EXISTS buffers_timestamp_idx;
DROP INDEX IF EXISTS detail_records_buffer_id_idx;
DROP INDEX IF EXISTS detail_records_parent_id_idx;
DROP INDEX IF EXISTS detail_records_field_value_idx;

DROP TABLE IF EXISTS detail_records;
DROP TABLE IF EXISTS buffers;
DROP TABLE IF EXISTS field_types;
DROP TABLE IF EXISTS info;
"#;

const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS buffers_packet_number_idx ON buffers(packet_number);
CREATE INDEX IF NOT EXISTS buffers_timestamp_idx ON buffers(timestamp);
CREATE INDEX IF NOT EXISTS detail_records_buffer_id_idx ON detail_records(buffer_id);
CREATE INDEX IF NOT EXISTS detail_records_parent_id_idx ON detail_records(parent_detail_id);
CREATE INDEX IF NOT EXISTS detail_records_field_value_idx ON detail_records(field_identifier, value);
"#;

/// Throughput settings. The journal stays in memory rather than off so that
/// a failed batch can still be rolled back.
const PERFORMANCE_PRAGMAS: &str = r#"
PRAGMA journal_mode = MEMORY;
PRAGMA synchronous = OFF;
PRAGMA temp_store = MEMORY;
"#;

pub const INSERT_FIELD_TYPE: &str =
    "INSERT INTO field_types (identifier, kind, display_name) VALUES (?1, ?2, ?3)";

pub const INSERT_BUFFER: &str = "INSERT INTO buffers \
     (buffer_id, packet_number, byte_length, data, timestamp, captured_length, interface_id, source, destination, protocol, info) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

pub const INSERT_DETAIL: &str = "INSERT INTO detail_records \
     (detail_id, buffer_id, parent_detail_id, field_identifier, value, representation, byte_offset, byte_length) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

/// Apply page and cache sizes. Must run before the first table is created
/// for the page size to take effect.
pub fn configure(conn: &Connection, page_size: u32, cache_pages: u64) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA page_size = {page_size};\nPRAGMA cache_size = {cache_pages};\nPRAGMA foreign_keys = ON;"
    ))
}

pub fn enable_performance_mode(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(PERFORMANCE_PRAGMAS)
}

pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_TABLES)
        .map_err(|source| Error::Schema {
            context: "creating tables",
            source,
        })
}

pub fn clear_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(CLEAR_TABLES)
        .map_err(|source| Error::Schema {
            context: "dropping tables",
            source,
        })
}

pub fn create_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_INDEXES)
        .map_err(|source| Error::Schema {
            context: "creating indexes",
            source,
        })
}

/// Record format and session metadata. Existing keys keep their first value.
pub fn write_info(conn: &Connection, session_id: SessionId) -> Result<()> {
    let entries = [
        (keys::FORMAT_VERSION, FORMAT_VERSION.to_string()),
        (keys::GENERATOR, format!("storage {}", env!("CARGO_PKG_VERSION"))),
        (keys::SESSION_ID, session_id.to_string()),
        (keys::CREATED_AT, Utc::now().to_rfc3339()),
    ];
    for (key, value) in entries {
        conn.execute(
            "INSERT OR IGNORE INTO info (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(|source| Error::Schema {
            context: "writing info",
            source,
        })?;
    }
    Ok(())
}

/// Read one metadata value.
pub fn read_info(conn: &Connection, key: &str) -> Result<Option<String>> {
    let result = conn.query_row("SELECT value FROM info WHERE key = ?1", [key], |row| {
        row.get(0)
    });

    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Keys of the `info` table.
pub mod keys {
    pub const FORMAT_VERSION: &str = "format_version";

    pub const GENERATOR: &str = "generator";

    /// Session that created the store.
    pub const SESSION_ID: &str = "session_id";

    /// RFC 3339 creation timestamp.
    pub const CREATED_AT: &str = "created_at";
}
