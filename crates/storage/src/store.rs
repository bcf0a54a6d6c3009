//! SQLite export session.

use crate::batcher::{BatchExecutor, BatchFailure, CommandBatcher};
use crate::config::{ExportConfig, StatementMode};
use crate::ids::{BufferId, IdAllocator, SessionId};
use crate::reader::{self, BufferRecord, DetailRecord};
use crate::registry::{FieldSchemaRegistry, FieldType};
use crate::serializer::TreeSerializer;
use crate::statement::Statement;
use crate::summary::PacketSummary;
use crate::{schema, Error, Result};
use fieldtree::{Field, FieldNode};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const IN_MEMORY: &str = ":memory:";

/// Counters for one session. Every export call ends up either exported or
/// aborted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub packets_exported: u64,
    pub packets_aborted: u64,
    pub statements_committed: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
}

/// One export run into one store.
///
/// The session owns the connection, the field type cache, the id counters
/// and the pending batch. It is driven by a single writer: callers sharing
/// a session between threads must serialize access to the whole session.
#[derive(Debug)]
pub struct SessionStore {
    id: SessionId,
    path: PathBuf,
    conn: Option<Connection>,
    config: ExportConfig,
    registry: FieldSchemaRegistry,
    ids: IdAllocator,
    batcher: CommandBatcher,
    packets_exported: u64,
    packets_aborted: u64,
}

impl SessionStore {
    /// Open or create a store at the given path with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, ExportConfig::default())
    }

    /// Open or create a store at the given path.
    pub fn open_with(path: impl AsRef<Path>, config: ExportConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        config.validate()?;
        let conn = Connection::open(&path).map_err(|source| Error::Open {
            path: path.clone(),
            source,
        })?;
        Self::configure(conn, path, config)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        Self::in_memory_with(ExportConfig::default())
    }

    pub fn in_memory_with(config: ExportConfig) -> Result<Self> {
        config.validate()?;
        let conn = Connection::open_in_memory().map_err(|source| Error::Open {
            path: PathBuf::from(IN_MEMORY),
            source,
        })?;
        Self::configure(conn, PathBuf::from(IN_MEMORY), config)
    }

    fn configure(conn: Connection, path: PathBuf, config: ExportConfig) -> Result<Self> {
        schema::configure(&conn, config.page_size, config.cache_pages()).map_err(|source| {
            Error::Open {
                path: path.clone(),
                source,
            }
        })?;

        let mut store = Self {
            id: SessionId::new(),
            path,
            conn: Some(conn),
            batcher: CommandBatcher::new(config.batch_threshold),
            config,
            registry: FieldSchemaRegistry::new(),
            ids: IdAllocator::default(),
            packets_exported: 0,
            packets_aborted: 0,
        };
        if store.config.performance_mode {
            store.enable_performance_mode()?;
        }

        info!(
            session = %store.id,
            path = %store.path.display(),
            batch_threshold = store.config.batch_threshold,
            "export session opened"
        );
        Ok(store)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Field types known to this session.
    pub fn registry(&self) -> &FieldSchemaRegistry {
        &self.registry
    }

    /// Number of statements waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.batcher.size()
    }

    pub fn stats(&self) -> SessionStats {
        let batches = self.batcher.stats();
        SessionStats {
            packets_exported: self.packets_exported,
            packets_aborted: self.packets_aborted,
            statements_committed: batches.statements_committed,
            batches_committed: batches.batches_committed,
            batches_failed: batches.batches_failed,
        }
    }

    /// The underlying connection, for queries over committed rows.
    pub fn connection(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(Error::Closed)
    }

    /// Relax durability for throughput.
    ///
    /// Synchronous writes are turned off and the rollback journal is kept in
    /// memory. A crash may corrupt the store; batch atomicity is unaffected.
    pub fn enable_performance_mode(&mut self) -> Result<()> {
        let conn = self.connection()?;
        schema::enable_performance_mode(conn).map_err(|source| Error::Open {
            path: self.path.clone(),
            source,
        })?;
        debug!(session = %self.id, "performance mode enabled");
        Ok(())
    }

    /// Create the tables, record session metadata and pick up any rows a
    /// previous session left behind.
    pub fn create_tables(&mut self) -> Result<()> {
        let conn = self.conn.as_ref().ok_or(Error::Closed)?;
        schema::create_tables(conn)?;
        schema::write_info(conn, self.id)?;

        for field_type in reader::load_field_types(conn)? {
            self.registry.insert_existing(field_type);
        }
        let (last_buffer, last_detail) = reader::last_ids(conn)?;
        self.ids.resume_after(last_buffer, last_detail);

        info!(
            session = %self.id,
            field_types = self.registry.len(),
            "tables created"
        );
        Ok(())
    }

    /// Drop all tables, pending statements and the field type cache.
    ///
    /// Id counters keep counting so ids are never reused within the session.
    pub fn clear_tables(&mut self) -> Result<()> {
        let conn = self.conn.as_ref().ok_or(Error::Closed)?;
        let dropped = self.batcher.discard();
        self.registry.clear();
        schema::clear_tables(conn)?;
        info!(session = %self.id, dropped_statements = dropped, "tables cleared");
        Ok(())
    }

    pub fn create_indexes(&mut self) -> Result<()> {
        schema::create_indexes(self.connection()?)?;
        info!(session = %self.id, "indexes created");
        Ok(())
    }

    /// Serialize one packet's tree and queue its rows, flushing whenever the
    /// batch threshold is reached.
    ///
    /// A packet that fails to serialize queues nothing.
    pub fn export_packet<N: FieldNode>(&mut self, tree: &N, packet_number: u32) -> Result<BufferId> {
        self.export_packet_with(tree, packet_number, None, None)
    }

    /// Like [`export_packet`](Self::export_packet), also storing the raw
    /// packet bytes with the buffer row.
    pub fn export_packet_bytes<N: FieldNode>(
        &mut self,
        tree: &N,
        packet_number: u32,
        data: &[u8],
    ) -> Result<BufferId> {
        self.export_packet_with(tree, packet_number, Some(data), None)
    }

    /// Export a packet together with its raw bytes and summary columns,
    /// either of which may be left out.
    pub fn export_packet_with<N: FieldNode>(
        &mut self,
        tree: &N,
        packet_number: u32,
        data: Option<&[u8]>,
        summary: Option<&PacketSummary>,
    ) -> Result<BufferId> {
        if self.conn.is_none() {
            return Err(Error::Closed);
        }

        let packet = match TreeSerializer::new(&mut self.registry, &mut self.ids)
            .serialize(tree, packet_number, data, summary)
        {
            Ok(packet) => packet,
            Err(e) => {
                self.packets_aborted += 1;
                warn!(packet_number, error = %e, "packet export aborted");
                return Err(e);
            }
        };

        // A batch that fails while the packet is queued takes the packet with it.
        if let Err(e) = self.enqueue(packet.statements) {
            self.packets_aborted += 1;
            return Err(e);
        }
        self.packets_exported += 1;
        Ok(packet.buffer_id)
    }

    fn enqueue(&mut self, statements: Vec<Statement>) -> Result<()> {
        let conn = self.conn.as_mut().ok_or(Error::Closed)?;
        let mut executor = SqliteExecutor::new(conn, self.config.statement_mode);
        let result = self.batcher.enqueue(statements, &mut executor);
        result.map_err(|failure| self.recover(failure))
    }

    /// Commit all pending statements as one transaction.
    ///
    /// Returns the number of statements committed. On failure the whole
    /// batch is rolled back and dropped.
    pub fn flush(&mut self) -> Result<usize> {
        let conn = self.conn.as_mut().ok_or(Error::Closed)?;
        let mut executor = SqliteExecutor::new(conn, self.config.statement_mode);
        let result = self.batcher.flush(&mut executor);
        result.map_err(|failure| self.recover(failure))
    }

    /// Forget the field types whose catalog rows were lost with a batch.
    fn recover(&mut self, failure: BatchFailure) -> Error {
        for identifier in &failure.discarded_fields {
            self.registry.forget(identifier);
        }
        Error::Transaction {
            statements: failure.statements,
            source: failure.source,
        }
    }

    /// Flush, then rebuild the store file to reclaim free pages. Blocks for
    /// the duration of the rebuild.
    pub fn vacuum(&mut self) -> Result<()> {
        self.flush()?;
        self.connection()?.execute_batch("VACUUM")?;
        info!(session = %self.id, "store vacuumed");
        Ok(())
    }

    /// All registered field types, as committed.
    pub fn field_types(&self) -> Result<Vec<FieldType>> {
        reader::load_field_types(self.connection()?)
    }

    /// All committed buffers, in export order.
    pub fn buffers(&self) -> Result<Vec<BufferRecord>> {
        reader::load_buffers(self.connection()?)
    }

    /// Committed buffers exported for one packet number.
    pub fn buffers_for_packet(&self, packet_number: u32) -> Result<Vec<BufferRecord>> {
        reader::find_buffers(self.connection()?, packet_number)
    }

    /// Raw bytes stored with a committed buffer.
    pub fn buffer_data(&self, buffer_id: BufferId) -> Result<Option<Vec<u8>>> {
        reader::load_buffer_data(self.connection()?, buffer_id)
    }

    /// Summary columns stored with a committed buffer.
    pub fn summary(&self, buffer_id: BufferId) -> Result<Option<PacketSummary>> {
        reader::load_summary(self.connection()?, buffer_id)
    }

    /// Committed detail records of a buffer, parents first.
    pub fn details(&self, buffer_id: BufferId) -> Result<Vec<DetailRecord>> {
        reader::load_details(self.connection()?, buffer_id)
    }

    /// Rebuild the committed field tree of a buffer.
    pub fn load_tree(&self, buffer_id: BufferId) -> Result<Field> {
        reader::load_tree(self.connection()?, buffer_id)
    }

    /// Flush everything pending and release the store.
    ///
    /// The connection is released even if the final flush fails; that
    /// failure is returned and the pending batch is lost.
    pub fn close(mut self) -> Result<SessionStats> {
        let flushed = self.flush();
        let stats = self.stats();
        let conn = self.conn.take().ok_or(Error::Closed)?;
        conn.close().map_err(|(_, e)| Error::Database(e))?;
        flushed?;

        info!(
            session = %self.id,
            packets = stats.packets_exported,
            aborted = stats.packets_aborted,
            statements = stats.statements_committed,
            batches = stats.batches_committed,
            "export session closed"
        );
        Ok(stats)
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        if self.conn.is_some() && !self.batcher.is_empty() {
            warn!(
                session = %self.id,
                pending = self.batcher.size(),
                "session dropped without close, pending statements discarded"
            );
        }
    }
}

/// Commits batches through a SQLite transaction.
struct SqliteExecutor<'c> {
    conn: &'c mut Connection,
    mode: StatementMode,
}

impl<'c> SqliteExecutor<'c> {
    fn new(conn: &'c mut Connection, mode: StatementMode) -> Self {
        Self { conn, mode }
    }
}

impl BatchExecutor for SqliteExecutor<'_> {
    fn execute_batch(&mut self, batch: &[Statement]) -> rusqlite::Result<()> {
        // Dropping the transaction without commit rolls it back.
        let tx = self.conn.transaction()?;
        for statement in batch {
            match self.mode {
                StatementMode::Prepared => statement.execute(&tx)?,
                StatementMode::Literal => tx.execute_batch(&statement.to_sql())?,
            }
        }
        tx.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::DetailId;
    use crate::statement::{BufferRow, DetailRow};
    use fieldtree::{FieldInfo, FieldKind, FieldValue};
    use rusqlite::types::Value;

    fn string_field(identifier: &str, value: &str) -> Field {
        Field::new(FieldInfo::new(identifier, identifier, FieldKind::String), value)
    }

    fn two_children() -> Field {
        Field::root()
            .with_child(string_field("proto.a", "x"))
            .with_child(string_field("proto.b", "y"))
    }

    fn count(store: &SessionStore, table: &str) -> i64 {
        store
            .connection()
            .unwrap()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    fn store_with_threshold(threshold: usize) -> SessionStore {
        let config = ExportConfig::default().with_batch_threshold(threshold);
        let mut store = SessionStore::in_memory_with(config).unwrap();
        store.create_tables().unwrap();
        store
    }

    #[test]
    fn test_export_single_packet() {
        let mut store = SessionStore::in_memory().unwrap();
        store.create_tables().unwrap();

        let buffer_id = store.export_packet(&two_children(), 1).unwrap();
        assert_eq!(buffer_id, BufferId(1));
        assert_eq!(store.pending(), 6);
        assert_eq!(store.flush().unwrap(), 6);

        let details = store.details(buffer_id).unwrap();
        assert_eq!(details.len(), 3);
        assert_eq!(details[0].parent_detail_id, None);
        assert_eq!(details[1].parent_detail_id, Some(details[0].detail_id));
        assert_eq!(details[2].parent_detail_id, Some(details[0].detail_id));
        assert_eq!(count(&store, "field_types"), 2);
    }

    #[test]
    fn test_threshold_triggers_flush() {
        // buffer + root + two details + two field types = 6 statements
        let mut store = store_with_threshold(6);
        store.export_packet(&two_children(), 1).unwrap();
        assert_eq!(store.pending(), 0);
        assert_eq!(count(&store, "detail_records"), 3);

        // buffer + three details, below the threshold
        store.export_packet(&two_children(), 2).unwrap();
        assert_eq!(store.pending(), 4);
        assert_eq!(count(&store, "buffers"), 1);
        assert_eq!(store.stats().batches_committed, 1);
    }

    #[test]
    fn test_ids_increase_across_batches() {
        let mut store = store_with_threshold(3);
        let mut last_detail = DetailId(0);
        for packet_number in 1..=5 {
            let buffer_id = store.export_packet(&two_children(), packet_number).unwrap();
            assert_eq!(buffer_id, BufferId(i64::from(packet_number)));
        }
        store.flush().unwrap();

        for buffer in store.buffers().unwrap() {
            for detail in store.details(buffer.buffer_id).unwrap() {
                assert!(detail.detail_id > last_detail);
                last_detail = detail.detail_id;
            }
        }
        assert_eq!(last_detail, DetailId(15));
    }

    #[test]
    fn test_failed_batch_is_rolled_back() {
        let mut store = store_with_threshold(1_000);
        store.export_packet(&two_children(), 1).unwrap();

        // The last statement of the batch references a buffer that never
        // existed.
        store
            .enqueue(vec![Statement::Detail(DetailRow {
                detail_id: DetailId(100),
                buffer_id: BufferId(100),
                parent_detail_id: None,
                field_identifier: None,
                value: Value::Null,
                representation: None,
                byte_offset: 0,
                byte_length: 0,
            })])
            .unwrap();

        let err = store.flush().unwrap_err();
        assert!(matches!(err, Error::Transaction { statements: 7, .. }));
        assert!(err.is_recoverable());
        assert_eq!(store.pending(), 0);
        assert_eq!(count(&store, "buffers"), 0);
        assert_eq!(count(&store, "detail_records"), 0);
        assert_eq!(count(&store, "field_types"), 0);
        assert!(store.registry().is_empty());

        // Later packets register their fields again and commit normally.
        let buffer_id = store.export_packet(&two_children(), 2).unwrap();
        assert_eq!(buffer_id, BufferId(2));
        store.flush().unwrap();
        assert_eq!(count(&store, "field_types"), 2);
        assert_eq!(store.stats().batches_failed, 1);
    }

    #[test]
    fn test_duplicate_buffer_fails_whole_batch() {
        let mut store = store_with_threshold(1_000);
        let row = || {
            Statement::Buffer(BufferRow {
                buffer_id: BufferId(1),
                packet_number: 1,
                byte_length: 0,
                data: None,
                summary: None,
            })
        };
        store.enqueue(vec![row(), row()]).unwrap();
        assert!(store.flush().is_err());
        assert_eq!(count(&store, "buffers"), 0);
    }

    #[test]
    fn test_kind_conflict_aborts_only_that_packet() {
        let mut store = store_with_threshold(1_000);
        store.export_packet(&two_children(), 1).unwrap();

        let clash = Field::root().with_child(Field::new(
            FieldInfo::new("proto.a", "proto.a", FieldKind::Integer),
            FieldValue::Integer(1),
        ));
        let err = store.export_packet(&clash, 2).unwrap_err();
        assert!(err.is_schema_error());
        assert!(err.is_recoverable());
        assert_eq!(store.pending(), 6);

        assert_eq!(store.export_packet(&two_children(), 3).unwrap(), BufferId(2));
        let stats = store.stats();
        assert_eq!(stats.packets_exported, 2);
        assert_eq!(stats.packets_aborted, 1);
    }

    #[test]
    fn test_clear_tables_resets_cache() {
        let mut store = store_with_threshold(1_000);
        store.export_packet(&two_children(), 1).unwrap();
        store.flush().unwrap();
        store.export_packet(&two_children(), 2).unwrap();

        store.clear_tables().unwrap();
        assert!(store.registry().is_empty());
        assert_eq!(store.pending(), 0);

        store.create_tables().unwrap();
        let buffer_id = store.export_packet(&two_children(), 3).unwrap();
        assert_eq!(buffer_id, BufferId(3));
        store.flush().unwrap();
        assert_eq!(count(&store, "field_types"), 2);
        assert_eq!(count(&store, "buffers"), 1);
    }

    #[test]
    fn test_literal_mode_round_trips() {
        let config = ExportConfig::default().with_statement_mode(StatementMode::Literal);
        let mut store = SessionStore::in_memory_with(config).unwrap();
        store.create_tables().unwrap();

        let tree = Field::root()
            .with_child(string_field("smb.user", "O'Brien"))
            .with_child(string_field("smb.path", "C:\\share\0junk"))
            .with_child(
                Field::new(FieldInfo::new("ip.raw", "Raw", FieldKind::Bytes), vec![0u8, 39, 255])
                    .with_representation("Raw: 00 27 ff"),
            )
            .with_child(Field::new(
                FieldInfo::new("frame.len", "Length", FieldKind::Unsigned),
                u64::MAX,
            ));
        let buffer_id = store.export_packet_bytes(&tree, 9, b"\0'\x01").unwrap();
        store.flush().unwrap();

        assert_eq!(store.load_tree(buffer_id).unwrap(), tree);
        assert_eq!(
            store.buffer_data(buffer_id).unwrap(),
            Some(b"\0'\x01".to_vec())
        );
    }

    #[test]
    fn test_performance_mode_keeps_rollback() {
        let config = ExportConfig::default()
            .with_performance_mode(true)
            .with_batch_threshold(1_000);
        let mut store = SessionStore::in_memory_with(config).unwrap();
        store.create_tables().unwrap();
        store.export_packet(&two_children(), 1).unwrap();
        store
            .enqueue(vec![Statement::Buffer(BufferRow {
                buffer_id: BufferId(1),
                packet_number: 1,
                byte_length: 0,
                data: None,
                summary: None,
            })])
            .unwrap();

        assert!(store.flush().is_err());
        assert_eq!(count(&store, "buffers"), 0);
    }

    #[test]
    fn test_vacuum_flushes_first() {
        let mut store = store_with_threshold(1_000);
        store.export_packet(&two_children(), 1).unwrap();
        store.vacuum().unwrap();
        assert_eq!(store.pending(), 0);
        assert_eq!(count(&store, "buffers"), 1);
    }

    #[test]
    fn test_close_reports_stats() {
        let mut store = store_with_threshold(1_000);
        store.export_packet(&two_children(), 1).unwrap();
        let stats = store.close().unwrap();
        assert_eq!(
            stats,
            SessionStats {
                packets_exported: 1,
                packets_aborted: 0,
                statements_committed: 6,
                batches_committed: 1,
                batches_failed: 0,
            }
        );
    }

    #[test]
    fn test_close_reports_failed_final_flush() {
        let mut store = store_with_threshold(1_000);
        let row = || {
            Statement::Buffer(BufferRow {
                buffer_id: BufferId(1),
                packet_number: 1,
                byte_length: 0,
                data: None,
                summary: None,
            })
        };
        store.enqueue(vec![row(), row()]).unwrap();

        let err = store.close().unwrap_err();
        assert!(matches!(err, Error::Transaction { statements: 2, .. }));
    }

    #[test]
    fn test_packet_lost_to_failed_flush_counts_as_aborted() {
        let mut store = store_with_threshold(3);
        store
            .enqueue(vec![Statement::Detail(DetailRow {
                detail_id: DetailId(100),
                buffer_id: BufferId(100),
                parent_detail_id: None,
                field_identifier: None,
                value: Value::Null,
                representation: None,
                byte_offset: 0,
                byte_length: 0,
            })])
            .unwrap();

        assert!(store.export_packet(&two_children(), 1).is_err());
        assert_eq!(store.export_packet(&two_children(), 2).unwrap(), BufferId(2));
        store.flush().unwrap();

        let stats = store.stats();
        assert_eq!(stats.packets_exported, 1);
        assert_eq!(stats.packets_aborted, 1);
        assert_eq!(stats.batches_failed, 1);
    }

    #[test]
    fn test_deep_tree_round_trip() {
        const DEPTH: u64 = 100_000;
        let tunnel = FieldInfo::new("tunnel", "Tunnel", FieldKind::Unsigned);
        let mut chain = Field::new(tunnel.clone(), 0u64);
        for level in 1..DEPTH {
            chain = Field::new(tunnel.clone(), level).with_child(chain);
        }
        let tree = Field::root().with_child(chain);

        let mut store = SessionStore::in_memory().unwrap();
        store.create_tables().unwrap();
        let buffer_id = store.export_packet(&tree, 1).unwrap();
        store.flush().unwrap();
        let loaded = store.load_tree(buffer_id).unwrap();

        let mut depth = 0;
        let mut node = &loaded;
        while let Some(child) = node.children().next() {
            assert_eq!(child.value(), &FieldValue::Unsigned(DEPTH - 1 - depth));
            depth += 1;
            node = child;
        }
        assert_eq!(depth, DEPTH);

        drop(loaded);
        drop(tree);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ExportConfig::default().with_batch_threshold(0);
        assert!(matches!(
            SessionStore::in_memory_with(config),
            Err(Error::Config(_))
        ));
    }
}
