//! Flattening of field trees into rows.

use crate::error::WriteError;
use crate::ids::{BufferId, DetailId, IdAllocator};
use crate::registry::{FieldSchemaRegistry, Registration};
use crate::statement::{stored_value, BufferRow, DetailRow, Statement};
use crate::summary::PacketSummary;
use crate::Result;
use fieldtree::{FieldNode, FieldValue};

/// The rows of one packet, ready to be queued.
#[derive(Debug)]
pub struct SerializedPacket {
    pub buffer_id: BufferId,
    /// The buffer row, then one detail row per node in pre-order, each
    /// preceded by the catalog row of a field seen for the first time.
    pub statements: Vec<Statement>,
    pub detail_count: usize,
}

/// Walks one packet's tree, assigning ids and building rows.
///
/// A packet either serializes completely or leaves the registry and the id
/// counters exactly as they were.
pub struct TreeSerializer<'s> {
    registry: &'s mut FieldSchemaRegistry,
    ids: &'s mut IdAllocator,
}

impl<'s> TreeSerializer<'s> {
    pub fn new(registry: &'s mut FieldSchemaRegistry, ids: &'s mut IdAllocator) -> Self {
        Self { registry, ids }
    }

    /// Serialize `tree` as packet `packet_number`, optionally storing the
    /// raw packet bytes and a summary with the buffer row.
    pub fn serialize<N: FieldNode>(
        &mut self,
        tree: &N,
        packet_number: u32,
        data: Option<&[u8]>,
        summary: Option<&PacketSummary>,
    ) -> Result<SerializedPacket> {
        let mut ids = *self.ids;
        let mut registered = Vec::new();

        match self.walk(tree, packet_number, data, summary, &mut ids, &mut registered) {
            Ok(packet) => {
                *self.ids = ids;
                Ok(packet)
            }
            Err(e) => {
                for identifier in &registered {
                    self.registry.forget(identifier);
                }
                Err(e)
            }
        }
    }

    fn walk<N: FieldNode>(
        &mut self,
        tree: &N,
        packet_number: u32,
        data: Option<&[u8]>,
        summary: Option<&PacketSummary>,
        ids: &mut IdAllocator,
        registered: &mut Vec<String>,
    ) -> Result<SerializedPacket> {
        let byte_length = match data {
            Some(bytes) => {
                u32::try_from(bytes.len()).map_err(|_| WriteError::BufferTooLarge(bytes.len()))?
            }
            None => tree.extent(),
        };

        let buffer_id = ids.next_buffer();
        let mut statements = vec![Statement::Buffer(BufferRow {
            buffer_id,
            packet_number,
            byte_length,
            data: data.map(<[u8]>::to_vec),
            summary: summary.filter(|s| !s.is_empty()).cloned(),
        })];
        let mut detail_count = 0;

        let mut stack: Vec<(&N, Option<DetailId>)> = vec![(tree, None)];
        while let Some((node, parent_detail_id)) = stack.pop() {
            let value = node.value();
            let field_identifier = match node.info() {
                Some(info) => {
                    if self.registry.ensure_registered(info, &mut statements)?
                        == Registration::NewlyRegistered
                    {
                        registered.push(info.identifier.clone());
                    }
                    if !value.fits(info.kind) {
                        return Err(WriteError::ValueKind {
                            identifier: info.identifier.clone(),
                            declared: info.kind,
                            actual: value.kind(),
                        }
                        .into());
                    }
                    if matches!(value, FieldValue::Float(f) if f.is_nan()) {
                        return Err(WriteError::NotANumber(info.identifier.clone()).into());
                    }
                    Some(info.identifier.clone())
                }
                None if value.is_none() => None,
                None => return Err(WriteError::UnnamedValue(value.kind()).into()),
            };

            let detail_id = ids.next_detail();
            statements.push(Statement::Detail(DetailRow {
                detail_id,
                buffer_id,
                parent_detail_id,
                field_identifier,
                value: stored_value(value),
                representation: node.representation().map(str::to_string),
                byte_offset: node.offset(),
                byte_length: node.length(),
            }));
            detail_count += 1;

            // Reversed so the first child is popped, and numbered, first.
            let children: Vec<&N> = node.children().collect();
            stack.extend(children.into_iter().rev().map(|child| (child, Some(detail_id))));
        }

        Ok(SerializedPacket {
            buffer_id,
            statements,
            detail_count,
        })
    }
}
