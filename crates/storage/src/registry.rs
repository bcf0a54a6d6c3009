//! Field type catalog cache.

use crate::statement::Statement;
use crate::{Error, Result};
use fieldtree::{FieldInfo, FieldKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

/// A field kind known to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldType {
    pub identifier: String,
    pub kind: FieldKind,
    pub display_name: String,
}

impl FieldType {
    pub fn info(&self) -> FieldInfo {
        FieldInfo::new(&self.identifier, &self.display_name, self.kind)
    }
}

impl From<&FieldInfo> for FieldType {
    fn from(info: &FieldInfo) -> Self {
        Self {
            identifier: info.identifier.clone(),
            kind: info.kind,
            display_name: info.display_name.clone(),
        }
    }
}

/// Outcome of [`FieldSchemaRegistry::ensure_registered`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    AlreadyPresent,
    NewlyRegistered,
}

/// Tracks which fields already have a catalog row in the current session.
///
/// The first registration of an identifier fixes its kind; later
/// declarations with another kind are rejected.
#[derive(Debug, Default)]
pub struct FieldSchemaRegistry {
    known: HashMap<String, FieldType>,
}

impl FieldSchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `info` known, emitting its catalog row into `out` on first sight.
    pub fn ensure_registered(
        &mut self,
        info: &FieldInfo,
        out: &mut Vec<Statement>,
    ) -> Result<Registration> {
        if let Some(existing) = self.known.get(&info.identifier) {
            if existing.kind != info.kind {
                return Err(Error::KindConflict {
                    identifier: info.identifier.clone(),
                    registered: existing.kind,
                    declared: info.kind,
                });
            }
            return Ok(Registration::AlreadyPresent);
        }

        trace!(field = %info.identifier, kind = %info.kind, "registering field type");
        let field_type = FieldType::from(info);
        self.known
            .insert(field_type.identifier.clone(), field_type.clone());
        out.push(Statement::FieldType(field_type));
        Ok(Registration::NewlyRegistered)
    }

    /// Record a type whose catalog row already exists in the store.
    pub fn insert_existing(&mut self, field_type: FieldType) {
        self.known.insert(field_type.identifier.clone(), field_type);
    }

    /// Drop an identifier whose catalog row was never persisted.
    pub fn forget(&mut self, identifier: &str) -> Option<FieldType> {
        self.known.remove(identifier)
    }

    pub fn clear(&mut self) {
        self.known.clear();
    }

    pub fn get(&self, identifier: &str) -> Option<&FieldType> {
        self.known.get(identifier)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.known.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port() -> FieldInfo {
        FieldInfo::new("tcp.port", "Port", FieldKind::Unsigned)
    }

    #[test]
    fn test_first_sight_emits_once() {
        let mut registry = FieldSchemaRegistry::new();
        let mut out = Vec::new();

        assert_eq!(
            registry.ensure_registered(&port(), &mut out).unwrap(),
            Registration::NewlyRegistered
        );
        assert_eq!(
            registry.ensure_registered(&port(), &mut out).unwrap(),
            Registration::AlreadyPresent
        );
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], Statement::FieldType(t) if t.identifier == "tcp.port"));
    }

    #[test]
    fn test_kind_conflict_keeps_first_registration() {
        let mut registry = FieldSchemaRegistry::new();
        let mut out = Vec::new();
        registry.ensure_registered(&port(), &mut out).unwrap();

        let clash = FieldInfo::new("tcp.port", "Port", FieldKind::String);
        let err = registry.ensure_registered(&clash, &mut out).unwrap_err();
        assert!(err.is_schema_error());
        assert!(matches!(
            err,
            Error::KindConflict {
                registered: FieldKind::Unsigned,
                declared: FieldKind::String,
                ..
            }
        ));
        assert_eq!(registry.get("tcp.port").unwrap().kind, FieldKind::Unsigned);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_forget_and_clear() {
        let mut registry = FieldSchemaRegistry::new();
        let mut out = Vec::new();
        registry.ensure_registered(&port(), &mut out).unwrap();
        registry.insert_existing(FieldType {
            identifier: "ip.ttl".into(),
            kind: FieldKind::Unsigned,
            display_name: "Time to Live".into(),
        });
        assert_eq!(registry.len(), 2);

        assert!(registry.forget("tcp.port").is_some());
        assert!(!registry.contains("tcp.port"));
        assert_eq!(
            registry.ensure_registered(&port(), &mut out).unwrap(),
            Registration::NewlyRegistered
        );

        registry.clear();
        assert!(registry.is_empty());
    }
}
