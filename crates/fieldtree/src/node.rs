//! Field definitions and trees.

use crate::{FieldKind, FieldValue};
use serde::{Deserialize, Serialize};

/// The definition of a field, shared by all of its occurrences.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Protocol-qualified name, e.g. `tcp.srcport`. Stable across packets.
    pub identifier: String,
    /// Human readable name, e.g. `Source Port`.
    pub display_name: String,
    pub kind: FieldKind,
}

impl FieldInfo {
    pub fn new(
        identifier: impl Into<String>,
        display_name: impl Into<String>,
        kind: FieldKind,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: display_name.into(),
            kind,
        }
    }
}

/// A node of a dissected field tree.
///
/// Implementations must yield children in a stable order, and calling
/// [`children`](FieldNode::children) again must restart the sequence.
pub trait FieldNode {
    type Children<'a>: Iterator<Item = &'a Self>
    where
        Self: 'a;

    /// The field this node is an occurrence of.
    ///
    /// `None` marks a structural node (such as the root of a packet) that
    /// has no field definition of its own.
    fn info(&self) -> Option<&FieldInfo>;

    fn value(&self) -> &FieldValue;

    /// Display text as rendered by the dissector, if any.
    fn representation(&self) -> Option<&str> {
        None
    }

    /// Byte offset of the field within the packet.
    fn offset(&self) -> u32;

    /// Number of packet bytes covered by the field.
    fn length(&self) -> u32;

    fn children(&self) -> Self::Children<'_>;

    /// The number of packet bytes covered by this subtree, measured from the
    /// start of the packet.
    fn extent(&self) -> u32
    where
        Self: Sized,
    {
        let mut extent = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            extent = extent.max(node.offset().saturating_add(node.length()));
            stack.extend(node.children());
        }
        extent
    }
}

/// An owned field tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    info: Option<FieldInfo>,
    value: FieldValue,
    representation: Option<String>,
    offset: u32,
    length: u32,
    children: Vec<Field>,
}

impl Field {
    /// An occurrence of `info` carrying `value`.
    pub fn new(info: FieldInfo, value: impl Into<FieldValue>) -> Self {
        Self {
            info: Some(info),
            value: value.into(),
            representation: None,
            offset: 0,
            length: 0,
            children: Vec::new(),
        }
    }

    /// A structural node without a field definition or value.
    pub fn root() -> Self {
        Self {
            info: None,
            value: FieldValue::None,
            representation: None,
            offset: 0,
            length: 0,
            children: Vec::new(),
        }
    }

    /// Set the byte range covered by this field.
    pub fn at(mut self, offset: u32, length: u32) -> Self {
        self.offset = offset;
        self.length = length;
        self
    }

    pub fn with_representation(mut self, representation: impl Into<String>) -> Self {
        self.representation = Some(representation.into());
        self
    }

    pub fn with_child(mut self, child: Field) -> Self {
        self.children.push(child);
        self
    }

    pub fn push_child(&mut self, child: Field) {
        self.children.push(child);
    }

    /// Mutable access to the children, in order.
    pub fn children_mut(&mut self) -> &mut Vec<Field> {
        &mut self.children
    }
}

// Children are released iteratively so dropping a deeply nested tree cannot
// exhaust the stack.
impl Drop for Field {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut child) = pending.pop() {
            pending.append(&mut child.children);
        }
    }
}

impl FieldNode for Field {
    type Children<'a> = std::slice::Iter<'a, Field>;

    fn info(&self) -> Option<&FieldInfo> {
        self.info.as_ref()
    }

    fn value(&self) -> &FieldValue {
        &self.value
    }

    fn representation(&self) -> Option<&str> {
        self.representation.as_deref()
    }

    fn offset(&self) -> u32 {
        self.offset
    }

    fn length(&self) -> u32 {
        self.length
    }

    fn children(&self) -> Self::Children<'_> {
        self.children.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udp() -> Field {
        let udp = FieldInfo::new("udp", "User Datagram Protocol", FieldKind::None);
        let port = FieldInfo::new("udp.port", "Port", FieldKind::Unsigned);
        Field::new(udp, FieldValue::None)
            .at(34, 8)
            .with_child(Field::new(port.clone(), 53u64).at(34, 2))
            .with_child(Field::new(port, 5353u64).at(36, 2))
    }

    #[test]
    fn root_has_no_definition() {
        let root = Field::root();
        assert!(root.info().is_none());
        assert!(root.value().is_none());
        assert_eq!(root.children().count(), 0);
    }

    #[test]
    fn children_keep_insertion_order() {
        let tree = udp();
        let values: Vec<_> = tree.children().map(|c| c.value().clone()).collect();
        assert_eq!(
            values,
            vec![FieldValue::Unsigned(53), FieldValue::Unsigned(5353)]
        );
        // Restartable.
        assert_eq!(tree.children().count(), 2);
    }

    #[test]
    fn deep_tree_drops() {
        let info = FieldInfo::new("gre", "GRE", FieldKind::None);
        let mut tree = Field::new(info.clone(), FieldValue::None);
        for _ in 0..200_000 {
            tree = Field::new(info.clone(), FieldValue::None).with_child(tree);
        }
        assert_eq!(tree.extent(), 0);
        drop(tree);
    }

    #[test]
    fn extent_covers_deepest_field() {
        let tree = Field::root().with_child(udp());
        assert_eq!(tree.extent(), 42);
        assert_eq!(Field::root().extent(), 0);
    }
}
