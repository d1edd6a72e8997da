//! Export stream coordination.
//!
//! Export tables accumulate rows in a pending region per transaction.
//! `tick` and `quiesce` move rows of committed transactions into the
//! pollable region; `action` lets the consumer acknowledge, rewind, rebase
//! and poll a table's stream.

use bytes::BufMut;
use partix_catalog::TableRegistry;
use partix_common::{TableId, TxnId};
use tracing::{debug, trace};

use crate::buffers::OutputBuffer;
use crate::error::{EngineError, EngineResult, Region};

bitflags::bitflags! {
    /// Export operations requested in one call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExportActions: u32 {
        /// Release bytes below the ack offset.
        const ACK = 0b0001;
        /// Write the next committed block to the result buffer.
        const POLL = 0b0010;
        /// Rewind the poll cursor to the release point.
        const RESET = 0b0100;
        /// Rebase the stream offset and sequence number.
        const SYNC = 0b1000;
    }
}

/// Export counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportStats {
    /// Rows moved into pollable regions.
    pub rows_flushed: u64,
    /// Blocks polled.
    pub polls: u64,
    /// Bytes polled.
    pub bytes_polled: u64,
}

/// Drives export streams of every export table.
#[derive(Debug, Default)]
pub struct ExportCoordinator {
    last_tick_ms: i64,
    stats: ExportStats,
}

impl ExportCoordinator {
    /// Creates a coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Periodic flush of committed rows.
    pub fn tick(&mut self, registry: &mut TableRegistry, time_ms: i64, last_committed: TxnId) -> usize {
        self.last_tick_ms = time_ms;
        let flushed = self.flush(registry, last_committed);
        if flushed > 0 {
            trace!(time_ms, flushed, "export tick");
        }
        flushed
    }

    /// Flushes committed rows ahead of a quiesce point.
    pub fn quiesce(&mut self, registry: &mut TableRegistry, last_committed: TxnId) -> usize {
        let flushed = self.flush(registry, last_committed);
        debug!(last_committed = last_committed.as_i64(), flushed, "export quiesced");
        flushed
    }

    fn flush(&mut self, registry: &mut TableRegistry, last_committed: TxnId) -> usize {
        let mut flushed = 0;
        for id in registry.exporting_tables() {
            if let Some(stream) = registry.get_mut(id).and_then(|t| t.export_mut()) {
                flushed += stream.commit_through(last_committed);
            }
        }
        self.stats.rows_flushed += flushed as u64;
        flushed
    }

    /// Applies `actions` to the export stream of `table_id`.
    ///
    /// Returns the universal offset of the polled block when `POLL` is set,
    /// otherwise the stream's poll cursor. SYNC is applied first, then ACK,
    /// RESET and POLL.
    pub fn action(
        &mut self,
        registry: &mut TableRegistry,
        actions: ExportActions,
        ack_offset: i64,
        seq_no: i64,
        table_id: TableId,
        out: &mut OutputBuffer,
    ) -> EngineResult<i64> {
        let table = registry
            .get_mut(table_id)
            .ok_or(EngineError::TableNotFound { id: table_id })?;
        let name = table.name().to_string();
        let stream = table
            .export_mut()
            .ok_or_else(|| EngineError::invalid(format!("table {} is not an export table", name)))?;

        if actions.intersects(ExportActions::SYNC | ExportActions::ACK) && ack_offset < 0 {
            return Err(EngineError::invalid(format!("negative export offset {}", ack_offset)));
        }
        if actions.contains(ExportActions::SYNC) {
            stream.sync(ack_offset as u64, seq_no);
        }
        if actions.contains(ExportActions::ACK) {
            stream.ack(ack_offset as u64);
        }
        if actions.contains(ExportActions::RESET) {
            stream.reset();
        }
        if !actions.contains(ExportActions::POLL) {
            return Ok(stream.poll_offset() as i64);
        }

        let pending = (stream.end_offset() - stream.poll_offset()) as usize;
        let needed = 12 + pending;
        if needed > out.remaining() {
            return Err(EngineError::BufferOverflow {
                region: Region::Result,
                needed: out.len() + needed,
                capacity: out.capacity(),
            });
        }
        let block = stream.poll();
        let mut header = Vec::with_capacity(12);
        header.put_i64(block.offset as i64);
        header.put_u32(block.data.len() as u32);
        out.write(&header)?;
        out.write(&block.data)?;

        self.stats.polls += 1;
        self.stats.bytes_polled += block.data.len() as u64;
        trace!(table = %name, offset = block.offset, len = block.data.len(), "export poll");
        Ok(block.offset as i64)
    }

    /// Time of the last tick.
    pub fn last_tick_ms(&self) -> i64 {
        self.last_tick_ms
    }

    /// Counters.
    pub fn stats(&self) -> ExportStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::BufferSet;
    use bytes::Buf;
    use partix_catalog::{CatalogManager, CatalogPayload, DatabaseDef, TableDef};
    use partix_common::CatalogVersion;
    use partix_storage::{row, Column, ColumnType};

    fn loaded() -> CatalogManager {
        let payload = CatalogPayload {
            version: CatalogVersion::new(1),
            cluster: "c".into(),
            database: DatabaseDef {
                name: "db".into(),
                tables: vec![
                    TableDef::new("T", vec![Column::new("id", ColumnType::Integer)]),
                    TableDef::new("E", vec![Column::new("id", ColumnType::Integer)]).exported(),
                ],
                ..Default::default()
            },
        };
        let mut manager = CatalogManager::new(16);
        manager.load_catalog(&payload.to_vec().unwrap()).unwrap();
        manager
    }

    #[test]
    fn test_flush_and_poll() {
        let mut catalog = loaded();
        let registry = catalog.registry_mut();
        registry.insert("E", TxnId::new(1), row![1]).unwrap();
        registry.insert("E", TxnId::new(2), row![2]).unwrap();

        let mut export = ExportCoordinator::new();
        assert_eq!(export.tick(registry, 10, TxnId::new(1)), 1);
        assert_eq!(export.last_tick_ms(), 10);

        let mut buffers = BufferSet::with_capacity(1024);
        buffers.result_mut().reset(0).unwrap();
        let offset = export
            .action(registry, ExportActions::POLL, 0, 0, TableId::new(2), buffers.result_mut())
            .unwrap();
        assert_eq!(offset, 0);

        let mut body = buffers.result().body();
        assert_eq!(body.get_i64(), 0);
        let len = body.get_u32() as usize;
        assert_eq!(len, row![1].serialized_size());

        assert_eq!(export.quiesce(registry, TxnId::new(2)), 1);
        let next = export
            .action(
                registry,
                ExportActions::ACK | ExportActions::POLL,
                len as i64,
                0,
                TableId::new(2),
                buffers.result_mut(),
            )
            .unwrap();
        assert_eq!(next, len as i64);
        assert_eq!(export.stats().polls, 2);
    }

    #[test]
    fn test_sync_returns_cursor() {
        let mut catalog = loaded();
        let mut export = ExportCoordinator::new();
        let mut buffers = BufferSet::with_capacity(64);
        let offset = export
            .action(
                catalog.registry_mut(),
                ExportActions::SYNC,
                500,
                3,
                TableId::new(2),
                buffers.result_mut(),
            )
            .unwrap();
        assert_eq!(offset, 500);
    }

    #[test]
    fn test_rejects_non_export_and_unknown() {
        let mut catalog = loaded();
        let mut export = ExportCoordinator::new();
        let mut buffers = BufferSet::with_capacity(64);
        assert!(matches!(
            export.action(catalog.registry_mut(), ExportActions::POLL, 0, 0, TableId::new(1), buffers.result_mut()),
            Err(EngineError::InvalidArgument { .. })
        ));
        assert!(matches!(
            export.action(catalog.registry_mut(), ExportActions::POLL, 0, 0, TableId::new(7), buffers.result_mut()),
            Err(EngineError::TableNotFound { .. })
        ));
    }
}
