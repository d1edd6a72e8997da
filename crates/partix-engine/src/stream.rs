//! Table stream activation and progress.
//!
//! ```text
//!            activate                serialize_more → n > 0
//! Inactive ───────────► Active ◄──────────────────────┐
//!    ▲                    │ └────────────────────────┘
//!    └────────────────────┘ serialize_more → 0 (context discarded)
//! ```
//!
//! The copy-on-write context itself lives in the table, so it survives
//! catalog updates that keep the table and is lost with a dropped or
//! re-created one. The manager remembers which table each stream belongs to
//! by name, since a catalog update may renumber ids.

use std::collections::BTreeMap;

use bytes::BytesMut;
use partix_catalog::{SchemaLookup, TableRegistry};
use partix_common::TableId;
use partix_storage::{StreamProgress, StreamType};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

/// Stream counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Streams activated.
    pub activated: u64,
    /// Streams run to exhaustion.
    pub completed: u64,
    /// Chunks written.
    pub chunks: u64,
    /// Bytes written.
    pub bytes: u64,
}

/// Tracks active streams per (table, stream type).
#[derive(Debug, Default)]
pub struct TableStreamManager {
    active: BTreeMap<(TableId, StreamType), String>,
    stats: StreamStats,
}

impl TableStreamManager {
    /// Creates a manager with no active streams.
    pub fn new() -> Self {
        Self::default()
    }

    /// Activates a stream over the table's current contents.
    pub fn activate(
        &mut self,
        registry: &mut TableRegistry,
        table_id: TableId,
        stream_type: StreamType,
    ) -> EngineResult<()> {
        if self.active.contains_key(&(table_id, stream_type)) {
            return Err(EngineError::stream(format!(
                "{:?} stream already active on table {}",
                stream_type, table_id
            )));
        }
        let name = registry
            .name_of(table_id)
            .map(str::to_string)
            .ok_or(EngineError::TableNotFound { id: table_id })?;
        let table = registry
            .get_mut(table_id)
            .ok_or(EngineError::TableNotFound { id: table_id })?;
        table.activate_stream(stream_type)?;
        info!(table = %name, id = %table_id, ?stream_type, rows = table.len(), "table stream activated");
        self.active.insert((table_id, stream_type), name);
        self.stats.activated += 1;
        Ok(())
    }

    /// Writes the next chunk into `out`.
    ///
    /// Returns `None` when the stream is not active, `Some(0)` when it just
    /// finished (the stream is then inactive), and the byte count otherwise.
    pub fn serialize_more(
        &mut self,
        registry: &mut TableRegistry,
        table_id: TableId,
        stream_type: StreamType,
        partition_id: i32,
        max_bytes: usize,
        out: &mut BytesMut,
    ) -> EngineResult<Option<usize>> {
        let key = (table_id, stream_type);
        let Some(name) = self.active.get(&key) else {
            return Ok(None);
        };
        let Some(table) = registry
            .by_name_mut(name)
            .filter(|t| t.is_streaming(stream_type))
        else {
            warn!(table = %name, ?stream_type, "streamed table dropped by catalog update");
            self.active.remove(&key);
            return Ok(None);
        };

        match table.stream_serialize_more(stream_type, partition_id, max_bytes, out)? {
            StreamProgress::Chunk {
                bytes,
                rows,
                tombstones,
            } => {
                debug!(table = %name, bytes, rows, tombstones, "stream chunk");
                self.stats.chunks += 1;
                self.stats.bytes += bytes as u64;
                Ok(Some(bytes))
            }
            StreamProgress::Exhausted => {
                let rows = table.deactivate_stream(stream_type).unwrap_or(0);
                info!(table = %name, ?stream_type, rows, "table stream complete");
                self.active.remove(&key);
                self.stats.completed += 1;
                Ok(Some(0))
            }
        }
    }

    /// Returns true if the stream is active.
    pub fn is_active(&self, table_id: TableId, stream_type: StreamType) -> bool {
        self.active.contains_key(&(table_id, stream_type))
    }

    /// Active streams, with the table name each belongs to.
    pub fn active(&self) -> impl Iterator<Item = (TableId, StreamType, &str)> {
        self.active
            .iter()
            .map(|(&(id, ty), name)| (id, ty, name.as_str()))
    }

    /// Forgets streams whose table no longer exists, or was re-created and
    /// so lost its stream, and re-keys the rest under their current ids.
    pub fn rebind(&mut self, registry: &TableRegistry) {
        let old = std::mem::take(&mut self.active);
        for ((id, ty), name) in old {
            let streaming = registry.by_name(&name).is_some_and(|t| t.is_streaming(ty));
            match registry.table_id(&name).filter(|_| streaming) {
                Some(new_id) => {
                    if new_id != id {
                        debug!(table = %name, old = %id, new = %new_id, "stream re-keyed");
                    }
                    self.active.insert((new_id, ty), name);
                }
                None => warn!(table = %name, ?ty, "stream dropped with its table"),
            }
        }
    }

    /// Forgets every stream. Used when a full catalog load replaces the tables.
    pub fn clear(&mut self) {
        if !self.active.is_empty() {
            warn!(streams = self.active.len(), "active streams discarded");
        }
        self.active.clear();
    }

    /// Counters.
    pub fn stats(&self) -> StreamStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partix_catalog::{CatalogManager, CatalogPayload, DatabaseDef, TableDef};
    use partix_common::{CatalogVersion, TxnId};
    use partix_storage::{row, Column, ColumnType, StreamChunk};

    fn loaded(rows: i32) -> CatalogManager {
        let payload = CatalogPayload {
            version: CatalogVersion::new(1),
            cluster: "c".into(),
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
                ..Default::default()
            },
        };
        let mut manager = CatalogManager::new(4);
        manager.load_catalog(&payload.to_vec().unwrap()).unwrap();
        for id in 0..rows {
            manager
                .registry_mut()
                .insert("T", TxnId::new(1), row![id, "x"])
                .unwrap();
        }
        manager
    }

    #[test]
    fn test_lifecycle() {
        let mut catalog = loaded(10);
        let mut streams = TableStreamManager::new();
        let id = TableId::new(1);
        let registry = catalog.registry_mut();

        streams.activate(registry, id, StreamType::Snapshot).unwrap();
        assert!(matches!(
            streams.activate(registry, id, StreamType::Snapshot),
            Err(EngineError::StreamState { .. })
        ));

        let schema = registry.get(id).unwrap().schema().clone();
        let (types, key_types) = (schema.types(), schema.key_types());
        let mut total = 0;
        loop {
            let mut out = BytesMut::new();
            match streams
                .serialize_more(registry, id, StreamType::Snapshot, 0, 64, &mut out)
                .unwrap()
            {
                Some(0) => break,
                Some(n) => {
                    assert_eq!(n, out.len());
                    total += StreamChunk::decode(&out, &types, &key_types).unwrap().rows.len();
                }
                None => panic!("stream went inactive before reporting 0"),
            }
        }
        assert_eq!(total, 10);

        let mut out = BytesMut::new();
        assert_eq!(
            streams
                .serialize_more(registry, id, StreamType::Snapshot, 0, 64, &mut out)
                .unwrap(),
            None
        );
        assert_eq!(streams.stats().completed, 1);
    }

    #[test]
    fn test_unknown_table() {
        let mut catalog = loaded(0);
        let mut streams = TableStreamManager::new();
        assert!(matches!(
            streams.activate(catalog.registry_mut(), TableId::new(9), StreamType::Recovery),
            Err(EngineError::TableNotFound { .. })
        ));
    }
}
