//! SQLite export of dissected packets.
//!
//! This crate persists the field trees produced by a dissection engine into a
//! relational store: one buffer row per packet, one detail row per field
//! occurrence linked to its parent, and a catalog of field types discovered
//! on the fly.
//!
//! # Overview
//!
//! Exporting happens in three steps:
//!
//! 1. **Serialize**: [`TreeSerializer`] walks a packet's tree depth-first,
//!    assigns buffer and detail ids, and registers unseen fields with the
//!    [`FieldSchemaRegistry`].
//!
//! 2. **Batch**: [`CommandBatcher`] collects the resulting [`Statement`]s and
//!    commits them in one transaction whenever the threshold is reached.
//!
//! 3. **Finish**: [`SessionStore::close`] flushes what is left and releases
//!    the store.
//!
//! # Core Concepts
//!
//! ## SessionStore
//!
//! The [`SessionStore`] owns the connection together with every piece of
//! state that must stay consistent across packets: id counters, the field
//! type cache and the pending batch. Independent sessions never share state.
//!
//! ## Ids
//!
//! [`BufferId`] and [`DetailId`] are issued when a packet is serialized, not
//! when it is committed, so they follow export order even across batches.
//! A detail's parent always has a smaller id than the detail itself.
//!
//! ## Packet summaries
//!
//! A buffer row may also carry a [`PacketSummary`]: capture time, length on
//! the wire, interface and the source, destination, protocol and info column
//! texts of a packet list. See [`SessionStore::export_packet_with`].
//!
//! ## Values
//!
//! Values are stored in one typed column and interpreted through the kind of
//! their field type (see [`schema`]). In [`StatementMode::Literal`] every
//! value is rendered through [`sanitize`] instead of being bound.
//!
//! # Example
//!
//! ```no_run
//! use fieldtree::{Field, FieldInfo, FieldKind};
//! use storage::SessionStore;
//!
//! let mut store = SessionStore::open("capture.db")?;
//! store.create_tables()?;
//!
//! let a = FieldInfo::new("proto.a", "A", FieldKind::String);
//! let b = FieldInfo::new("proto.b", "B", FieldKind::String);
//! let tree = Field::root()
//!     .with_child(Field::new(a, "x"))
//!     .with_child(Field::new(b, "y"));
//!
//! let buffer_id = store.export_packet(&tree, 1)?;
//! store.flush()?;
//! assert_eq!(store.load_tree(buffer_id)?, tree);
//!
//! store.create_indexes()?;
//! let stats = store.close()?;
//! println!("{} packets exported", stats.packets_exported);
//! # Ok::<(), storage::Error>(())
//! ```
//!
//! # Errors
//!
//! All failures are returned to the caller; nothing is retried. A failed
//! packet leaves no rows behind, and a failed batch is rolled back as a
//! whole. See [`Error::is_recoverable`].

mod batcher;
mod config;
mod error;
mod ids;
mod reader;
mod registry;
pub mod sanitize;
pub mod schema;
mod serializer;
mod statement;
mod store;
mod summary;

pub use batcher::{BatchExecutor, BatchFailure, BatchStats, CommandBatcher};
pub use config::{
    ConfigError, ExportConfig, StatementMode, DEFAULT_BATCH_THRESHOLD, DEFAULT_CACHE_SIZE,
    DEFAULT_PAGE_SIZE,
};
pub use error::{Error, Result, WriteError};
pub use ids::{BufferId, DetailId, IdAllocator, SessionId};
pub use reader::{BufferRecord, DetailRecord};
pub use registry::{FieldSchemaRegistry, FieldType, Registration};
pub use serializer::{SerializedPacket, TreeSerializer};
pub use statement::{stored_value, BufferRow, DetailRow, Statement};
pub use store::{SessionStats, SessionStore};
pub use summary::PacketSummary;
