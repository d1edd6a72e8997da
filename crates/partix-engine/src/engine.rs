//! The per-partition execution engine.
//!
//! `ExecutionEngine` owns every piece of partition state and is driven by
//! one caller at a time. Fragment execution never returns an error: faults
//! become `ResultCode::Error` plus a serialized exception. Stream, stats and
//! export entry points report failure with negative sentinels.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Context;
use bytes::BytesMut;
use partix_catalog::{CatalogManager, PreparedCatalog, ReplayOp};
use partix_common::{
    CatalogVersion, DependencyId, EngineConfig, ResultCode, TableId, TxnId, UndoToken,
};
use partix_exec::{
    Dispatcher, ExecutionRequest, FragmentBatch, FragmentCache, FragmentOutcome, MutationOp,
};
use partix_storage::codec::{put_table, put_value};
use partix_storage::{
    open_backend, Column, ColumnType, Row, SavedTable, StorageBackend, StorageError, StreamType,
    Table, TableReader, TempLimit, TempTable, UndoAction, Value,
};
use partix_txn::{QuantumState, UndoLog};
use tracing::{debug, error, info, trace, warn};

use crate::buffers::BufferSet;
use crate::error::{EngineError, EngineResult};
use crate::exception::SerializableException;
use crate::export::{ExportActions, ExportCoordinator};
use crate::log::LogRecord;
use crate::recovery::RecoveryMessage;
use crate::stats::{EngineCounters, StatsAgent, StatsSelector};
use crate::stream::TableStreamManager;

/// Returns the partition `value` hashes to.
pub fn hashinate(value: &Value, total_partitions: i32) -> i32 {
    let mut buf = BytesMut::with_capacity(16);
    put_value(&mut buf, value);
    let hash = crc32fast::hash(&buf);
    (hash % total_partitions.max(1) as u32) as i32
}

fn bound(buffers: &mut Option<BufferSet>) -> EngineResult<&mut BufferSet> {
    buffers.as_mut().ok_or(EngineError::BuffersNotBound)
}

/// Per-partition execution engine.
#[derive(Debug)]
pub struct ExecutionEngine {
    config: EngineConfig,
    catalog: CatalogManager,
    undo: UndoLog<UndoAction>,
    dispatcher: Dispatcher,
    streams: TableStreamManager,
    stats: StatsAgent,
    export: ExportCoordinator,
    backend: Box<dyn StorageBackend>,
    buffers: Option<BufferSet>,
    tuples_modified: u64,
}

impl ExecutionEngine {
    /// Creates an engine from a validated configuration.
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        config.validate().context("invalid engine configuration")?;
        let backend = open_backend(&config.backend).context("failed to open storage backend")?;
        info!(
            partition = config.partition_id,
            site = config.site_id,
            backend = backend.name(),
            "execution engine created"
        );
        Ok(Self {
            catalog: CatalogManager::new(config.rows_per_block),
            undo: UndoLog::new(),
            dispatcher: Dispatcher::new(config.temp_table_bytes_per_node)
                .with_mutation_log(config.log_records),
            streams: TableStreamManager::new(),
            stats: StatsAgent::new(),
            export: ExportCoordinator::new(),
            backend,
            buffers: None,
            tuples_modified: 0,
            config,
        })
    }

    /// Sets the engine's place in the cluster.
    pub fn initialize(
        &mut self,
        cluster_index: i32,
        site_id: i32,
        partition_id: i32,
        host_id: i32,
        hostname: impl Into<String>,
    ) -> EngineResult<()> {
        if partition_id < 0 || partition_id >= self.config.total_partitions {
            return Err(EngineError::invalid(format!(
                "partition {} outside 0..{}",
                partition_id, self.config.total_partitions
            )));
        }
        self.config.cluster_index = cluster_index;
        self.config.site_id = site_id;
        self.config.partition_id = partition_id;
        self.config.host_id = host_id;
        self.config.hostname = hostname.into();
        info!(
            cluster = cluster_index,
            site = site_id,
            partition = partition_id,
            host = host_id,
            hostname = %self.config.hostname,
            "execution engine initialized"
        );
        Ok(())
    }

    /// Configuration in effect.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Cluster index.
    pub fn cluster_index(&self) -> i32 {
        self.config.cluster_index
    }

    /// Site id.
    pub fn site_id(&self) -> i32 {
        self.config.site_id
    }

    /// Partition id.
    pub fn partition_id(&self) -> i32 {
        self.config.partition_id
    }

    // =========================================================================
    // Buffers
    // =========================================================================

    /// Binds a buffer set, returning the one previously bound.
    pub fn set_buffers(&mut self, buffers: BufferSet) -> Option<BufferSet> {
        self.buffers.replace(buffers)
    }

    /// Unbinds and returns the buffer set.
    pub fn take_buffers(&mut self) -> Option<BufferSet> {
        self.buffers.take()
    }

    /// The bound buffer set.
    pub fn buffers(&self) -> Option<&BufferSet> {
        self.buffers.as_ref()
    }

    /// The bound buffer set, for the caller to write parameters.
    pub fn buffers_mut(&mut self) -> Option<&mut BufferSet> {
        self.buffers.as_mut()
    }

    /// Rewinds the output regions, leaving `header_size` bytes reserved at
    /// the front of the result buffer.
    pub fn reset_reused_result_output_buffer(&mut self, header_size: usize) -> EngineResult<()> {
        let buffers = bound(&mut self.buffers)?;
        buffers.result_mut().reset(header_size)?;
        SerializableException::reset(buffers.exception_mut())?;
        buffers.log_mut().reset(0)
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Replaces the catalog with a full snapshot.
    pub fn load_catalog(&mut self, payload: &[u8]) -> EngineResult<CatalogVersion> {
        let prepared = self.catalog.prepare_load(payload)?;
        let version = self.commit_catalog(prepared)?;
        self.streams.clear();
        Ok(version)
    }

    /// Applies an incremental catalog update at `version`.
    pub fn update_catalog(
        &mut self,
        payload: &[u8],
        version: CatalogVersion,
    ) -> EngineResult<CatalogVersion> {
        let prepared = self.catalog.prepare_update(payload, version)?;
        let version = self.commit_catalog(prepared)?;
        self.streams.rebind(self.catalog.registry());
        Ok(version)
    }

    fn commit_catalog(&mut self, prepared: PreparedCatalog) -> EngineResult<CatalogVersion> {
        let bytes_per_node = self.dispatcher.bytes_per_node();
        if let Err(e) = FragmentCache::check_prepared(&prepared, bytes_per_node) {
            warn!(version = %prepared.version(), error = %e, "catalog fragments rejected");
            return Err(e.into());
        }
        let version = self.catalog.commit(prepared)?;
        let compiled = self
            .dispatcher
            .cache_mut()
            .warm(&self.catalog, bytes_per_node)?;
        self.stats.retain_tables(self.catalog.registry());
        debug!(%version, compiled, "executor vectors rebuilt");
        Ok(version)
    }

    /// The catalog manager.
    pub fn catalog(&self) -> &CatalogManager {
        &self.catalog
    }

    // =========================================================================
    // Undo
    // =========================================================================

    /// Makes `token` the current undo quantum.
    pub fn set_undo_token(&mut self, token: UndoToken) -> EngineResult<()> {
        self.undo.set_undo_token(token)?;
        Ok(())
    }

    /// Commits every quantum up to `token`.
    pub fn release_undo_token(&mut self, token: UndoToken) -> usize {
        self.undo.release(token)
    }

    /// Rolls back every quantum from `token` on.
    pub fn undo_undo_token(&mut self, token: UndoToken) -> usize {
        let registry = self.catalog.registry_mut();
        self.undo.undo(token, |action| registry.apply_undo(action))
    }

    /// Which quantum is current.
    pub fn undo_state(&self) -> QuantumState {
        self.undo.state()
    }

    /// The undo log.
    pub fn undo_log(&self) -> &UndoLog<UndoAction> {
        &self.undo
    }

    // =========================================================================
    // Fragment execution
    // =========================================================================

    /// Runs a cataloged fragment.
    pub fn execute_query(&mut self, request: &ExecutionRequest<'_>) -> ResultCode {
        if self.buffers.is_none() {
            return self.raise(EngineError::BuffersNotBound);
        }
        let outcome = self
            .dispatcher
            .execute_query(&mut self.catalog, &mut self.undo, request)
            .map_err(EngineError::from);
        self.complete(request, outcome)
    }

    /// Parses and runs a plan that is not in the catalog.
    pub fn execute_plan_fragment(&mut self, plan: &[u8], request: &ExecutionRequest<'_>) -> ResultCode {
        if self.buffers.is_none() {
            return self.raise(EngineError::BuffersNotBound);
        }
        let outcome = self
            .dispatcher
            .execute_plan_fragment(&mut self.catalog, &mut self.undo, plan, request)
            .map_err(EngineError::from);
        self.complete(request, outcome)
    }

    /// Runs the fragment batch in the parameter buffer, stopping at the
    /// first failure.
    pub fn execute_query_plan_fragments_and_get_results(
        &mut self,
        txn_id: TxnId,
        last_committed: TxnId,
    ) -> ResultCode {
        let decoded = match self.buffers.as_ref() {
            Some(buffers) => FragmentBatch::decode(
                buffers.parameters(),
                self.config.max_batch,
                self.config.max_params,
            )
            .map_err(EngineError::from),
            None => Err(EngineError::BuffersNotBound),
        };
        let batch = match decoded {
            Ok(batch) => batch,
            Err(e) => return self.raise(e),
        };

        let count = batch.len();
        let mut modified = 0;
        for (i, fragment) in batch.fragments.iter().enumerate() {
            let request = ExecutionRequest::new(fragment.fragment_id, fragment.params.values())
                .with_txn(txn_id, last_committed)
                .with_deps(fragment.out_dep, fragment.in_dep)
                .in_batch(i == 0, i + 1 == count);
            let code = self.execute_query(&request);
            modified += self.tuples_modified;
            if code == ResultCode::Error {
                self.dispatcher.reset_scratch();
                self.tuples_modified = modified;
                return code;
            }
        }
        self.tuples_modified = modified;
        ResultCode::Success
    }

    /// Cached executor vectors.
    pub fn fragment_cache(&self) -> &FragmentCache {
        self.dispatcher.cache()
    }

    /// Supplies an input dependency for the next fragments.
    pub fn stash_dependency(&mut self, id: DependencyId, table: TempTable) {
        self.dispatcher.stash_dependency(id, table);
    }

    /// Rows modified by the last execution call.
    pub fn tuples_modified(&self) -> u64 {
        self.tuples_modified
    }

    /// Returns true if the current batch has modified any tuple.
    pub fn is_dirty_batch(&self) -> bool {
        self.dispatcher.is_dirty_batch()
    }

    fn complete(
        &mut self,
        request: &ExecutionRequest<'_>,
        outcome: EngineResult<FragmentOutcome>,
    ) -> ResultCode {
        if request.last_in_batch {
            self.dispatcher.reset_scratch();
        }
        match outcome.and_then(|outcome| self.publish(request, outcome)) {
            Ok(code) => code,
            Err(e) => {
                self.tuples_modified = 0;
                self.raise(e)
            }
        }
    }

    fn publish(
        &mut self,
        request: &ExecutionRequest<'_>,
        outcome: FragmentOutcome,
    ) -> EngineResult<ResultCode> {
        self.tuples_modified = outcome.tuples_modified;
        let buffers = bound(&mut self.buffers)?;

        if !outcome.mutations.is_empty() {
            let token = self.undo.state().token().unwrap_or(UndoToken::NO_OP);
            for mutation in outcome.mutations {
                let record = LogRecord::from_mutation(mutation, request.txn_id, token).encode();
                buffers.log_mut().write(&record)?;
                self.backend.append_log(&record)?;
            }
        }

        let Some(table) = outcome.result else {
            return Ok(ResultCode::NoData);
        };
        let mut out = BytesMut::with_capacity(4 + table.byte_size() + 64);
        out.extend_from_slice(&request.out_dep.as_i32().to_be_bytes());
        table.serialize(&mut out);
        buffers.result_mut().write(&out)?;
        Ok(ResultCode::Success)
    }

    fn raise(&mut self, err: EngineError) -> ResultCode {
        let exception = SerializableException::from_error(&err);
        warn!(
            code = exception.code,
            kind = ?exception.exception_type,
            error = %err,
            "fragment execution failed"
        );
        match self.buffers.as_mut() {
            Some(buffers) => {
                if let Err(e) = exception.serialize(buffers.exception_mut()) {
                    error!(error = %e, "exception could not be serialized");
                }
            }
            None => error!("exception dropped, no buffers are bound"),
        }
        ResultCode::Error
    }

    // =========================================================================
    // Table streams and recovery
    // =========================================================================

    /// Starts a stream over the table. Returns false on failure.
    pub fn activate_table_stream(&mut self, table_id: TableId, stream_type: StreamType) -> bool {
        match self
            .streams
            .activate(self.catalog.registry_mut(), table_id, stream_type)
        {
            Ok(()) => true,
            Err(e) => {
                warn!(table = %table_id, ?stream_type, error = %e, "stream activation failed");
                false
            }
        }
    }

    /// Writes up to `max_bytes` of the stream's next chunk into `out`.
    ///
    /// Returns the bytes written, 0 when the stream just finished, and -1
    /// when it is not active or failed.
    pub fn table_stream_serialize_more(
        &mut self,
        out: &mut BytesMut,
        max_bytes: usize,
        table_id: TableId,
        stream_type: StreamType,
    ) -> i64 {
        let partition_id = self.config.partition_id;
        match self.streams.serialize_more(
            self.catalog.registry_mut(),
            table_id,
            stream_type,
            partition_id,
            max_bytes,
            out,
        ) {
            Ok(Some(bytes)) => bytes as i64,
            Ok(None) => -1,
            Err(e) => {
                warn!(table = %table_id, ?stream_type, error = %e, "stream serialization failed");
                -1
            }
        }
    }

    /// Applies a recovery message. Returns the rows affected.
    ///
    /// A message that fails part way leaves its table unchanged.
    pub fn process_recovery_message(&mut self, message: &[u8]) -> EngineResult<usize> {
        let (kind, table_id) = RecoveryMessage::peek(message)?;
        let registry = self.catalog.registry_mut();
        let table = registry
            .get(table_id)
            .ok_or(EngineError::TableNotFound { id: table_id })?;
        let decoded = RecoveryMessage::decode(message, table)?;
        trace!(table = %table.name(), ?kind, rows = decoded.rows.len(), "recovery message");
        decoded.apply(registry)
    }

    /// Active streams.
    pub fn streams(&self) -> &TableStreamManager {
        &self.streams
    }

    // =========================================================================
    // Read/write tracking
    // =========================================================================

    /// Starts recording the tables `txn_id` reads and writes.
    pub fn tracking_enable(&mut self, txn_id: TxnId) {
        self.dispatcher.tracking_enable(txn_id);
    }

    /// Stops tracking `txn_id`. Returns false if it was not tracked.
    pub fn tracking_finish(&mut self, txn_id: TxnId) -> bool {
        self.dispatcher.tracking_finish(txn_id).is_some()
    }

    /// Writes the tables `txn_id` has written (or read, when `writes` is
    /// false) to the result buffer as a one-column `TABLE_NAME` table.
    ///
    /// Returns 1, or -1 when the transaction is not tracked or the table
    /// does not fit.
    pub fn tracking_table_set(&mut self, txn_id: TxnId, writes: bool) -> i32 {
        match self.write_table_set(txn_id, writes) {
            Ok(count) => count,
            Err(e) => {
                debug!(txn = txn_id.as_i64(), writes, error = %e, "table set unavailable");
                -1
            }
        }
    }

    fn write_table_set(&mut self, txn_id: TxnId, writes: bool) -> EngineResult<i32> {
        let set = self
            .dispatcher
            .tracked(txn_id)
            .ok_or_else(|| EngineError::invalid(format!("transaction {} is not tracked", txn_id.as_i64())))?;
        let names = if writes { &set.writes } else { &set.reads };

        let mut table = TempTable::new(vec![Column::new("TABLE_NAME", ColumnType::Varchar)]);
        let mut limit = TempLimit::new(usize::MAX);
        for name in names {
            table.push(Row::new(vec![Value::from(name.as_str())]), &mut limit)?;
        }

        let buffers = bound(&mut self.buffers)?;
        let mut out = BytesMut::with_capacity(table.byte_size() + 64);
        table.serialize(&mut out);
        buffers.result_mut().write(&out)?;
        Ok(1)
    }

    // =========================================================================
    // Stats and export
    // =========================================================================

    /// Writes stats tables to the result buffer.
    ///
    /// Returns the number of tables written, or -1 on failure.
    pub fn get_stats(&mut self, selector: i32, locators: &[i32], interval: bool, now: i64) -> i32 {
        match self.write_stats(selector, locators, interval, now) {
            Ok(count) => count,
            Err(e) => {
                warn!(selector, error = %e, "stats request failed");
                -1
            }
        }
    }

    fn write_stats(
        &mut self,
        selector: i32,
        locators: &[i32],
        interval: bool,
        now: i64,
    ) -> EngineResult<i32> {
        let selector = StatsSelector::from_i32(selector)
            .ok_or_else(|| EngineError::invalid(format!("unknown stats selector {}", selector)))?;
        let partition_id = self.config.partition_id;
        let table = match selector {
            StatsSelector::Table => {
                let ids: Vec<TableId> = locators.iter().map(|&id| TableId::new(id)).collect();
                self.stats
                    .table_stats(self.catalog.registry(), partition_id, &ids, interval, now)?
            }
            StatsSelector::Engine => {
                if let Some(other) = locators.iter().find(|&&p| p != partition_id) {
                    return Err(EngineError::invalid(format!("unknown partition {}", other)));
                }
                let dispatch = self.dispatcher.stats();
                let cache = self.dispatcher.cache().stats();
                let undo = self.undo.stats();
                let counters = EngineCounters {
                    fragments_executed: dispatch.fragments_executed,
                    cache_hits: cache.hits,
                    cache_misses: cache.misses,
                    quanta_released: undo.quanta_released,
                    quanta_undone: undo.quanta_undone,
                };
                self.stats
                    .engine_stats(counters, self.catalog.version(), partition_id, interval, now)?
            }
        };

        let buffers = bound(&mut self.buffers)?;
        let mut out = BytesMut::with_capacity(table.byte_size() + 64);
        table.serialize(&mut out);
        buffers.result_mut().write(&out)?;
        Ok(1)
    }

    /// Acknowledges, rewinds, rebases or polls an export stream.
    ///
    /// Returns a stream offset, or -1 on failure.
    pub fn export_action(
        &mut self,
        actions: ExportActions,
        ack_offset: i64,
        seq_no: i64,
        table_id: TableId,
    ) -> i64 {
        let result = match self.buffers.as_mut() {
            Some(buffers) => self.export.action(
                self.catalog.registry_mut(),
                actions,
                ack_offset,
                seq_no,
                table_id,
                buffers.result_mut(),
            ),
            None => Err(EngineError::BuffersNotBound),
        };
        match result {
            Ok(offset) => offset,
            Err(e) => {
                warn!(table = %table_id, ?actions, error = %e, "export action failed");
                -1
            }
        }
    }

    /// Periodic work: flushes committed export rows.
    pub fn tick(&mut self, time_ms: i64, last_committed: TxnId) {
        self.export
            .tick(self.catalog.registry_mut(), time_ms, last_committed);
    }

    /// Flushes committed export rows ahead of a quiesce point.
    pub fn quiesce(&mut self, last_committed: TxnId) {
        self.export.quiesce(self.catalog.registry_mut(), last_committed);
    }

    // =========================================================================
    // Table access
    // =========================================================================

    /// Table by id.
    pub fn get_table(&self, id: TableId) -> Option<&Table> {
        self.catalog.registry().get(id)
    }

    /// Table by name.
    pub fn get_table_by_name(&self, name: &str) -> Option<&Table> {
        self.catalog.registry().by_name(name)
    }

    fn table(&self, id: TableId) -> EngineResult<&Table> {
        self.get_table(id).ok_or(EngineError::TableNotFound { id })
    }

    /// Appends the table in serialized-table format to `out`.
    pub fn serialize_table(&self, id: TableId, out: &mut BytesMut) -> EngineResult<()> {
        let table = self.table(id)?;
        put_table(out, table.schema().columns(), table.iter().map(|(_, row)| row));
        Ok(())
    }

    /// Bulk-loads a serialized table into an empty table through the
    /// current undo quantum. Returns the rows loaded.
    pub fn load_table(
        &mut self,
        table_id: TableId,
        serialized: &[u8],
        txn_id: TxnId,
        last_committed: TxnId,
        allow_export: bool,
    ) -> EngineResult<usize> {
        let table = self.table(table_id)?;
        let name = table.name().to_string();
        if table.is_export() && !allow_export {
            return Err(EngineError::invalid(format!(
                "table {} is an export table",
                name
            )));
        }
        if !table.is_empty() {
            return Err(EngineError::invalid(format!(
                "table {} already holds {} rows",
                name,
                table.len()
            )));
        }
        let width = table.schema().len();
        let decoded = TableReader::decode(serialized)?;
        if decoded.columns.len() != width {
            return Err(EngineError::invalid(format!(
                "table {} has {} columns, loaded data has {}",
                name,
                width,
                decoded.columns.len()
            )));
        }

        self.undo.check_active()?;
        let registry = self.catalog.registry_mut();
        let count = decoded.rows.len();
        for row in decoded.rows {
            for action in registry.insert(&name, txn_id, row)? {
                self.undo.record(action)?;
            }
        }
        debug!(
            table = %name,
            rows = count,
            txn = txn_id.as_i64(),
            last_committed = last_committed.as_i64(),
            "table loaded"
        );
        Ok(count)
    }

    /// Order-independent hash of the table's rows.
    pub fn table_hash_code(&self, table_id: TableId) -> EngineResult<i64> {
        Ok(self.table(table_id)?.content_hash())
    }

    /// Returns true if `value` hashes to this partition.
    pub fn is_local_site(&self, value: &Value) -> bool {
        hashinate(value, self.config.total_partitions) == self.config.partition_id
    }

    // =========================================================================
    // Storage backend
    // =========================================================================

    /// Saves a table image at `path`. Returns the bytes written.
    pub fn save_table_to_disk(
        &mut self,
        cluster: &str,
        database: &str,
        table_id: TableId,
        path: &Path,
    ) -> EngineResult<u64> {
        let mut data = BytesMut::new();
        self.serialize_table(table_id, &mut data)?;
        let table = self.table(table_id)?;
        let image = SavedTable {
            cluster: cluster.to_string(),
            database: database.to_string(),
            table: table.name().to_string(),
            data: data.freeze(),
        };
        let written = self.backend.save_table(path, &image)?;
        info!(table = %image.table, path = %path.display(), bytes = written, "table saved");
        Ok(written)
    }

    /// Restores a saved table into its empty live counterpart. Returns the
    /// rows restored. An outstanding undo quantum does not cover them.
    pub fn restore_table_from_disk(&mut self, path: &Path) -> EngineResult<usize> {
        let image = self.backend.restore_table(path)?;
        if image.database != self.catalog.database_name() {
            return Err(EngineError::invalid(format!(
                "saved table belongs to database {}, not {}",
                image.database,
                self.catalog.database_name()
            )));
        }
        let registry = self.catalog.registry_mut();
        let table = registry.table_named(&image.table)?;
        if !table.is_empty() {
            return Err(EngineError::invalid(format!(
                "table {} is not empty",
                image.table
            )));
        }
        let decoded = TableReader::decode(&image.data)?;
        let count = decoded.rows.len();
        // A restore is not part of any transaction and is never undo-logged.
        for row in decoded.rows {
            registry.insert(&image.table, TxnId::default(), row)?;
        }
        info!(table = %image.table, path = %path.display(), rows = count, "table restored");
        Ok(count)
    }

    /// Evicts up to `max_rows` rows of the table into one backend block.
    /// Returns the block id.
    pub fn anti_cache_evict_block(&mut self, table_id: TableId, max_rows: usize) -> EngineResult<u32> {
        let table = self
            .catalog
            .registry_mut()
            .get_mut(table_id)
            .ok_or(EngineError::TableNotFound { id: table_id })?;
        let rows = table.evict_rows(max_rows)?;
        if rows.is_empty() {
            return Err(EngineError::invalid(format!(
                "table {} has no rows to evict",
                table.name()
            )));
        }
        let mut data = BytesMut::new();
        put_table(&mut data, table.schema().columns(), rows.iter());
        let block_id = self.backend.evict_block(table.name(), data.freeze())?;
        table.note_evicted(block_id);
        debug!(table = %table.name(), block = block_id, rows = rows.len(), "block evicted");
        Ok(block_id)
    }

    /// Reads evicted blocks back and stages them for merging. Returns the
    /// rows staged.
    pub fn anti_cache_read_blocks(&mut self, table_id: TableId, block_ids: &[u32]) -> EngineResult<usize> {
        let table = self
            .catalog
            .registry_mut()
            .get_mut(table_id)
            .ok_or(EngineError::TableNotFound { id: table_id })?;
        let mut staged = 0;
        for &block_id in block_ids {
            let data = self.backend.read_block(table.name(), block_id)?;
            let decoded = TableReader::decode(&data)?;
            staged += decoded.rows.len();
            table.stage_unevicted(block_id, decoded.rows)?;
        }
        Ok(staged)
    }

    /// Merges staged blocks back into the table. Returns the blocks merged.
    pub fn anti_cache_merge_blocks(&mut self, table_id: TableId) -> EngineResult<usize> {
        let table = self
            .catalog
            .registry_mut()
            .get_mut(table_id)
            .ok_or(EngineError::TableNotFound { id: table_id })?;
        let merged = table.merge_unevicted()?;
        self.backend.merge_blocks(table.name(), &merged)?;
        debug!(table = %table.name(), blocks = merged.len(), "blocks merged");
        Ok(merged.len())
    }

    /// Makes appended log records durable.
    pub fn sync_log(&mut self) -> EngineResult<()> {
        self.backend.sync()?;
        Ok(())
    }

    /// Bytes in the log buffer.
    pub fn log_buffer_len(&self) -> usize {
        self.buffers.as_ref().map_or(0, |b| b.log().len())
    }

    /// Empties the log buffer.
    pub fn rewind_log_buffer(&mut self) -> EngineResult<()> {
        bound(&mut self.buffers)?.log_mut().reset(0)
    }

    /// Re-applies the log records in `log`, as written to the log buffer,
    /// made by transactions after `replay_after`. Returns the rows applied.
    ///
    /// Records are applied in order through the registry, so views are
    /// maintained and nothing is undo-logged. Records for export tables or
    /// for tables no longer in the catalog are skipped. A record that fails
    /// stops the replay; the records before it stay applied.
    pub fn replay_log(&mut self, log: &[u8], replay_after: TxnId) -> EngineResult<usize> {
        let mut buf = log;
        let mut applied = 0;
        while !buf.is_empty() {
            applied += self.replay_record(&mut buf, replay_after)?;
        }
        info!(applied, after = replay_after.as_i64(), "log replayed");
        Ok(applied)
    }

    /// Re-applies the records in the backend's log made by transactions
    /// after `replay_after`. Returns the rows applied.
    pub fn recover_from_log(&mut self, replay_after: TxnId) -> EngineResult<usize> {
        let records = self.backend.read_log()?;
        let mut applied = 0;
        for record in &records {
            let mut buf = &record[..];
            applied += self.replay_record(&mut buf, replay_after)?;
            if !buf.is_empty() {
                return Err(EngineError::Storage {
                    source: StorageError::decode(format!(
                        "{} trailing bytes after log record",
                        buf.len()
                    )),
                });
            }
        }
        info!(
            records = records.len(),
            applied,
            after = replay_after.as_i64(),
            "recovered from log"
        );
        Ok(applied)
    }

    fn replay_record(&mut self, buf: &mut &[u8], replay_after: TxnId) -> EngineResult<usize> {
        let registry = self.catalog.registry_mut();
        let record = LogRecord::read_with(buf, |name, op| {
            let table = registry.by_name(name).filter(|t| !t.is_export())?;
            Some(match op {
                MutationOp::Delete => table.schema().key_types(),
                MutationOp::Insert | MutationOp::Update => table.schema().types(),
            })
        })?;
        let Some(record) = record else {
            return Ok(0);
        };
        if record.txn_id <= replay_after {
            return Ok(0);
        }
        let op = match record.op {
            MutationOp::Insert => ReplayOp::Insert,
            MutationOp::Update => ReplayOp::Update,
            MutationOp::Delete => ReplayOp::Delete,
        };
        trace!(table = %record.table, ?op, txn = record.txn_id.as_i64(), "replaying log record");
        Ok(registry.replay(&record.table, op, vec![record.image])?)
    }

    /// The storage backend.
    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Human-readable summary of the engine's state.
    pub fn debug(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "partition {} site {} catalog v{} ({})",
            self.config.partition_id,
            self.config.site_id,
            self.catalog.version(),
            self.catalog.database_name()
        );
        for (id, table) in self.catalog.registry().iter() {
            let _ = writeln!(
                out,
                "  table {} {}: {} rows in {} blocks{}",
                id,
                table.name(),
                table.len(),
                table.block_count(),
                if table.is_export() { " (export)" } else { "" }
            );
        }
        let _ = writeln!(
            out,
            "  undo: {} with {} outstanding quanta",
            self.undo.state(),
            self.undo.outstanding_tokens().len()
        );
        let _ = writeln!(out, "  cached fragments: {}", self.dispatcher.cache().len());
        for (id, ty, name) in self.streams.active() {
            let _ = writeln!(out, "  stream {:?} on {} {}", ty, id, name);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partix_catalog::{CatalogPayload, DatabaseDef, FragmentDef, TableDef};
    use partix_common::{ErrorCode, FragmentId};
    use partix_storage::{row, Column, ColumnType};

    fn payload() -> Vec<u8> {
        let insert = serde_json::json!({
            "type": "send",
            "input": {"type": "insert", "table": "T",
                      "rows": [[{"kind": "param", "index": 0}, {"kind": "param", "index": 1}]]}
        });
        let scan = serde_json::json!({"type": "send", "input": {"type": "seq_scan", "table": "T"}});
        CatalogPayload {
            version: CatalogVersion::new(1),
            cluster: "cluster".into(),
            database: DatabaseDef {
                name: "db".into(),
                tables: vec![TableDef::new(
                    "T",
                    vec![
                        Column::new("id", ColumnType::Integer).not_null(),
                        Column::new("name", ColumnType::Varchar),
                    ],
                )
                .with_primary_key(&["id"])],
                views: vec![],
                fragments: vec![
                    FragmentDef {
                        id: FragmentId::new(1),
                        statement: None,
                        plan: insert,
                    },
                    FragmentDef {
                        id: FragmentId::new(2),
                        statement: None,
                        plan: scan,
                    },
                ],
            },
        }
        .to_vec()
        .unwrap()
    }

    fn engine() -> ExecutionEngine {
        let mut engine = ExecutionEngine::new(EngineConfig::default()).unwrap();
        engine.load_catalog(&payload()).unwrap();
        engine.set_buffers(BufferSet::with_capacity(64 * 1024));
        engine.reset_reused_result_output_buffer(0).unwrap();
        engine
    }

    #[test]
    fn test_insert_then_scan() {
        let mut engine = engine();
        engine.set_undo_token(UndoToken::new(1)).unwrap();
        let params = [Value::Integer(1), Value::varchar("a")];
        let code = engine.execute_query(&ExecutionRequest::new(FragmentId::new(1), &params));
        assert_eq!(code, ResultCode::Success);
        assert_eq!(engine.tuples_modified(), 1);

        engine.reset_reused_result_output_buffer(0).unwrap();
        let code = engine.execute_query(&ExecutionRequest::new(FragmentId::new(2), &[]));
        assert_eq!(code, ResultCode::Success);

        let mut body = engine.buffers().unwrap().result().body();
        assert_eq!(i32::from_be_bytes([body[0], body[1], body[2], body[3]]), -1);
        body = &body[4..];
        let table = TableReader::read(&mut body).unwrap();
        assert_eq!(table.rows, vec![row![1, "a"]]);
    }

    #[test]
    fn test_unbound_buffers_report_error() {
        let mut engine = engine();
        engine.take_buffers();
        let code = engine.execute_query(&ExecutionRequest::new(FragmentId::new(2), &[]));
        assert_eq!(code, ResultCode::Error);
        assert!(matches!(
            engine.reset_reused_result_output_buffer(0),
            Err(EngineError::BuffersNotBound)
        ));
    }

    #[test]
    fn test_unknown_fragment_writes_exception() {
        let mut engine = engine();
        let code = engine.execute_query(&ExecutionRequest::new(FragmentId::new(99), &[]));
        assert_eq!(code, ResultCode::Error);
        let exception = SerializableException::decode(engine.buffers().unwrap().exception().as_slice())
            .unwrap()
            .unwrap();
        assert_eq!(exception.code, ErrorCode::FragmentNotFound.as_u16());
    }

    #[test]
    fn test_initialize_bounds() {
        let mut engine = engine();
        assert!(engine.initialize(0, 1, 0, 2, "h").is_ok());
        assert_eq!(engine.site_id(), 1);
        assert!(engine.initialize(0, 1, 5, 2, "h").is_err());
    }

    #[test]
    fn test_hashinate_is_stable() {
        let v = Value::Integer(42);
        assert_eq!(hashinate(&v, 8), hashinate(&v, 8));
        assert!((0..8).contains(&hashinate(&v, 8)));
        assert_eq!(hashinate(&v, 1), 0);
    }

    #[test]
    fn test_debug_summary() {
        let engine = engine();
        let summary = engine.debug();
        assert!(summary.contains("table 1 T"));
        assert!(summary.contains("cached fragments: 2"));
    }
}
