//! Dissected field trees.
//!
//! A dissection engine turns one captured packet into a tree of typed field
//! occurrences. This crate defines the shape of that tree as seen by the
//! exporter:
//!
//! - [`FieldKind`]: the declared value kind of a field
//! - [`FieldValue`]: one typed value
//! - [`FieldInfo`]: the definition of a field (identifier, display name, kind)
//! - [`FieldNode`]: anything that can be walked as a field tree
//! - [`Field`]: an owned tree for engines without a tree type of their own
//!
//! # Example
//!
//! ```
//! use fieldtree::{Field, FieldInfo, FieldKind, FieldNode, FieldValue};
//!
//! let ttl = FieldInfo::new("ip.ttl", "Time to Live", FieldKind::Unsigned);
//! let ip = FieldInfo::new("ip", "Internet Protocol", FieldKind::None);
//!
//! let tree = Field::root().with_child(
//!     Field::new(ip, FieldValue::None)
//!         .at(14, 20)
//!         .with_child(Field::new(ttl, FieldValue::Unsigned(64)).at(22, 1)),
//! );
//!
//! assert_eq!(tree.children().count(), 1);
//! assert_eq!(tree.extent(), 34);
//! ```

mod kind;
mod node;
mod value;

pub use kind::{FieldKind, ParseKindError};
pub use node::{Field, FieldInfo, FieldNode};
pub use value::FieldValue;
