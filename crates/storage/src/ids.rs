//! Identifiers issued by a session.

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for an export session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! surrogate_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map($name)
            }
        }
    };
}

surrogate_key!(
    /// Key of a persisted packet buffer.
    BufferId
);

surrogate_key!(
    /// Key of a persisted field occurrence.
    DetailId
);

/// Session-scoped id counters.
///
/// Ids start at 1 and are handed out exactly once, whether or not the row
/// they were issued for is ever committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdAllocator {
    next_buffer: i64,
    next_detail: i64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self {
            next_buffer: 1,
            next_detail: 1,
        }
    }
}

impl IdAllocator {
    pub fn next_buffer(&mut self) -> BufferId {
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        id
    }

    pub fn next_detail(&mut self) -> DetailId {
        let id = DetailId(self.next_detail);
        self.next_detail += 1;
        id
    }

    /// Move the counters past ids already present in a store. Never moves
    /// them backwards.
    pub fn resume_after(&mut self, last_buffer: i64, last_detail: i64) {
        self.next_buffer = self.next_buffer.max(last_buffer + 1);
        self.next_detail = self.next_detail.max(last_detail + 1);
    }
}
