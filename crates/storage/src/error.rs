use fieldtree::FieldKind;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// Storage errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The store could not be created, opened or configured.
    #[error("failed to open store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Schema definition statements failed.
    #[error("schema error while {context}: {source}")]
    Schema {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// A field was declared with a kind different from its first registration.
    #[error("field '{identifier}' is registered as {registered} but was declared as {declared}")]
    KindConflict {
        identifier: String,
        registered: FieldKind,
        declared: FieldKind,
    },

    /// A row of the current packet could not be built.
    #[error("write error: {0}")]
    Write(#[from] WriteError),

    /// A batch failed to commit and was rolled back.
    #[error("transaction of {statements} statements rolled back: {source}")]
    Transaction {
        statements: usize,
        #[source]
        source: rusqlite::Error,
    },

    /// The store handle has already been released.
    #[error("session is closed")]
    Closed,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to decode row: {0}")]
    Decode(#[from] serde_rusqlite::Error),

    /// Stored rows violate the layout this crate writes.
    #[error("corrupt store: {0}")]
    Corrupt(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Schema errors cover both failed DDL and kind conflicts.
    pub fn is_schema_error(&self) -> bool {
        matches!(self, Error::Schema { .. } | Error::KindConflict { .. })
    }

    /// Whether exporting may continue with the next packet.
    ///
    /// Open failures and use of a released handle end the session; write,
    /// schema and transaction failures only cost the affected packet or batch.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Open { .. } | Error::Closed | Error::Config(_))
    }
}

/// Reasons a single row cannot be built.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WriteError {
    #[error("field '{identifier}' is declared as {declared} but carries a {actual} value")]
    ValueKind {
        identifier: String,
        declared: FieldKind,
        actual: FieldKind,
    },

    #[error("structural node carries a {0} value but has no field definition")]
    UnnamedValue(FieldKind),

    #[error("field '{0}' carries a NaN float, which the store cannot represent")]
    NotANumber(String),

    #[error("buffer of {0} bytes exceeds the 32-bit length limit")]
    BufferTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
