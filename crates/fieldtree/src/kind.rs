//! Declared field kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The declared value kind of a field.
///
/// Every occurrence of a field carries a value of its declared kind, or no
/// value at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Label-only fields (protocols, subtrees, text items).
    None,
    Boolean,
    /// Signed integers up to 64 bits.
    Integer,
    /// Unsigned integers up to 64 bits.
    Unsigned,
    Float,
    String,
    Bytes,
}

impl FieldKind {
    pub const ALL: [FieldKind; 7] = [
        FieldKind::None,
        FieldKind::Boolean,
        FieldKind::Integer,
        FieldKind::Unsigned,
        FieldKind::Float,
        FieldKind::String,
        FieldKind::Bytes,
    ];

    /// The stable name used in persisted catalogs.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::None => "none",
            FieldKind::Boolean => "boolean",
            FieldKind::Integer => "integer",
            FieldKind::Unsigned => "unsigned",
            FieldKind::Float => "float",
            FieldKind::String => "string",
            FieldKind::Bytes => "bytes",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kind name that is not one of [`FieldKind::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown field kind: {0}")]
pub struct ParseKindError(pub String);

impl FromStr for FieldKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseKindError(s.to_string()))
    }
}
