//! Block-structured persistent tables.
//!
//! A `Table` stores rows in fixed-capacity blocks addressed by `RowId`.
//! Freed slots are reused lowest-first. A hash index on the primary key (and
//! any secondary indexes) is maintained on every mutation, and each active
//! copy-on-write stream is notified before the mutation lands.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                         Table                            │
//! │  blocks: [Block 0][Block 1]...   free: {RowId}          │
//! │  primary: key → RowId            indexes: [TableIndex]   │
//! │  streams: StreamType → CowContext                        │
//! │  export: Option<ExportStream>    (append-only tables)    │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod block;
mod cow;
mod index;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use partix_common::types::TxnId;
use tracing::{debug, warn};

use crate::codec::put_tuple;
use crate::error::{StorageError, StorageResult};
use crate::export::ExportStream;
use crate::row::Row;
use crate::schema::Schema;

pub use block::RowId;
pub use cow::{Origin, StreamChunk, StreamImage, StreamProgress, StreamType};

use block::Block;
use cow::CowContext;
use index::TableIndex;

const PRIMARY_INDEX: &str = "PRIMARY";

static NEXT_INCARNATION: AtomicU64 = AtomicU64::new(1);

/// Cumulative mutation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounters {
    /// Rows inserted.
    pub inserts: u64,
    /// Rows updated.
    pub updates: u64,
    /// Rows deleted.
    pub deletes: u64,
}

/// A persistent table.
#[derive(Debug)]
pub struct Table {
    name: String,
    incarnation: u64,
    schema: Schema,
    rows_per_block: usize,
    blocks: Vec<Block>,
    free: BTreeSet<RowId>,
    primary: Option<TableIndex>,
    indexes: Vec<TableIndex>,
    tuple_count: usize,
    counters: TableCounters,
    streams: BTreeMap<StreamType, CowContext>,
    export: Option<ExportStream>,
    evicted: BTreeSet<u32>,
    staged: BTreeMap<u32, Vec<Row>>,
}

impl Table {
    /// Creates an empty table.
    pub fn new(name: impl Into<String>, schema: Schema, rows_per_block: usize) -> Self {
        let primary = schema
            .has_primary_key()
            .then(|| TableIndex::new(PRIMARY_INDEX, schema.primary_key().to_vec(), true));
        Self {
            name: name.into(),
            incarnation: NEXT_INCARNATION.fetch_add(1, Ordering::Relaxed),
            schema,
            rows_per_block: rows_per_block.max(1),
            blocks: Vec::new(),
            free: BTreeSet::new(),
            primary,
            indexes: Vec::new(),
            tuple_count: 0,
            counters: TableCounters::default(),
            streams: BTreeMap::new(),
            export: None,
            evicted: BTreeSet::new(),
            staged: BTreeMap::new(),
        }
    }

    /// Creates an append-only export table.
    pub fn new_export(name: impl Into<String>, schema: Schema) -> Self {
        let mut table = Self::new(name, schema, 1);
        table.export = Some(ExportStream::new());
        table
    }

    /// Returns the table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process-unique number of this table instance.
    ///
    /// A table dropped and re-created under the same name gets a new one.
    pub fn incarnation(&self) -> u64 {
        self.incarnation
    }

    /// Gives the table a fresh incarnation, for contents rebuilt wholesale.
    pub fn renew_incarnation(&mut self) {
        self.incarnation = NEXT_INCARNATION.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the number of live rows.
    pub fn len(&self) -> usize {
        self.tuple_count
    }

    /// Returns true if the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.tuple_count == 0
    }

    /// Number of allocated blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Slots per block.
    pub fn rows_per_block(&self) -> usize {
        self.rows_per_block
    }

    /// Cumulative mutation counters.
    pub fn counters(&self) -> TableCounters {
        self.counters
    }

    /// Returns true for append-only export tables.
    pub fn is_export(&self) -> bool {
        self.export.is_some()
    }

    /// Returns the export stream of an export table.
    pub fn export(&self) -> Option<&ExportStream> {
        self.export.as_ref()
    }

    /// Returns the export stream of an export table.
    pub fn export_mut(&mut self) -> Option<&mut ExportStream> {
        self.export.as_mut()
    }

    // =========================================================================
    // Indexes
    // =========================================================================

    /// Adds a secondary index, building it from the current rows.
    ///
    /// Fails without side effects if a unique index would be violated.
    pub fn add_index<S: AsRef<str>>(
        &mut self,
        name: &str,
        columns: &[S],
        unique: bool,
    ) -> StorageResult<()> {
        if self.indexes.iter().any(|i| i.name == name) {
            return Ok(());
        }
        let positions = self.schema.indices_of(&self.name, columns)?;
        let mut index = TableIndex::new(name, positions, unique);
        for (id, row) in self.iter() {
            let key = index.key(row);
            if index.conflicts(&key, None) {
                return Err(StorageError::DuplicateKey {
                    table: self.name.clone(),
                    index: name.to_string(),
                    key: key.to_string(),
                });
            }
            index.add(key, id);
        }
        self.indexes.push(index);
        Ok(())
    }

    /// Drops a secondary index. Returns false if it did not exist.
    pub fn drop_index(&mut self, name: &str) -> bool {
        let before = self.indexes.len();
        self.indexes.retain(|i| i.name != name);
        self.indexes.len() != before
    }

    /// Names of the secondary indexes.
    pub fn index_names(&self) -> Vec<&str> {
        self.indexes.iter().map(|i| i.name.as_str()).collect()
    }

    fn check_constraints(&self, row: &Row, except: Option<RowId>) -> StorageResult<()> {
        if let Some(primary) = &self.primary {
            let key = primary.key(row);
            if let Some(pos) = key.iter().position(|v| v.is_null()) {
                let column = &self.schema.columns()[primary.columns[pos]];
                return Err(StorageError::NullViolation {
                    table: self.name.clone(),
                    column: column.name.clone(),
                });
            }
            if primary.conflicts(&key, except) {
                return Err(self.duplicate(PRIMARY_INDEX, &key));
            }
        }
        for index in &self.indexes {
            let key = index.key(row);
            if index.conflicts(&key, except) {
                return Err(self.duplicate(&index.name, &key));
            }
        }
        Ok(())
    }

    fn duplicate(&self, index: &str, key: &Row) -> StorageError {
        StorageError::DuplicateKey {
            table: self.name.clone(),
            index: index.to_string(),
            key: key.to_string(),
        }
    }

    fn index_row(&mut self, row: &Row, id: RowId) {
        for index in self.primary.iter_mut().chain(self.indexes.iter_mut()) {
            let key = index.key(row);
            index.add(key, id);
        }
    }

    fn unindex_row(&mut self, row: &Row, id: RowId) {
        for index in self.primary.iter_mut().chain(self.indexes.iter_mut()) {
            let key = index.key(row);
            index.remove(&key, id);
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns the row in a slot.
    pub fn get(&self, id: RowId) -> Option<&Row> {
        self.blocks.get(id.block as usize)?.get(id.slot)
    }

    /// Finds a row by key: the primary key, or the whole row without one.
    pub fn find(&self, key: &Row) -> Option<RowId> {
        match &self.primary {
            Some(primary) => primary.lookup(key).first().copied(),
            None => self
                .iter()
                .find(|(_, row)| *row == key)
                .map(|(id, _)| id),
        }
    }

    /// Iterates rows in block order.
    pub fn iter(&self) -> impl Iterator<Item = (RowId, &Row)> {
        self.blocks.iter().enumerate().flat_map(|(b, block)| {
            block
                .iter()
                .map(move |(slot, row)| (RowId::new(b as u32, slot), row))
        })
    }

    /// Order-independent hash of the table's contents.
    pub fn content_hash(&self) -> i64 {
        let mut buf = BytesMut::new();
        self.iter().fold(0u64, |acc, (_, row)| {
            buf.clear();
            put_tuple(&mut buf, row);
            acc.wrapping_add(u64::from(crc32fast::hash(&buf)))
        }) as i64
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Inserts a row. Returns its slot.
    pub fn insert(&mut self, row: Row) -> StorageResult<RowId> {
        self.insert_at(row, None, Origin::Local)
    }

    /// Inserts a row on behalf of a recovery message.
    pub fn replay_insert(&mut self, row: Row) -> StorageResult<RowId> {
        self.insert_at(row, None, Origin::Replay)
    }

    /// Puts a deleted row back, in its old slot when that slot is still free.
    pub fn restore(&mut self, id: RowId, row: Row) -> StorageResult<()> {
        self.insert_at(row, Some(id), Origin::Local).map(|_| ())
    }

    /// Replaces the row in a slot. Returns the old row.
    pub fn update(&mut self, id: RowId, row: Row) -> StorageResult<Row> {
        self.update_at(id, row, Origin::Local)
    }

    /// Replaces the row sharing `row`'s key on behalf of a recovery message.
    pub fn replay_update(&mut self, row: Row) -> StorageResult<(RowId, Row)> {
        let row = self.schema.conform(&self.name, row)?;
        let key = self.schema.key_of(&row);
        let id = self.find(&key).ok_or_else(|| self.missing_key(&key))?;
        let old = self.update_at(id, row, Origin::Replay)?;
        Ok((id, old))
    }

    /// Deletes the row in a slot. Returns it.
    pub fn delete(&mut self, id: RowId) -> StorageResult<Row> {
        self.delete_at(id, Origin::Local)
    }

    /// Deletes the row with `key` on behalf of a recovery message.
    pub fn replay_delete(&mut self, key: &Row) -> StorageResult<(RowId, Row)> {
        let id = self.find(key).ok_or_else(|| self.missing_key(key))?;
        let old = self.delete_at(id, Origin::Replay)?;
        Ok((id, old))
    }

    fn missing_key(&self, key: &Row) -> StorageError {
        StorageError::RowNotFound {
            table: self.name.clone(),
            row_id: format!("key {}", key),
        }
    }

    fn missing_slot(&self, id: RowId) -> StorageError {
        StorageError::RowNotFound {
            table: self.name.clone(),
            row_id: id.to_string(),
        }
    }

    fn allocate(&mut self, preferred: Option<RowId>) -> RowId {
        if let Some(id) = preferred {
            if self.free.remove(&id) {
                return id;
            }
            warn!(table = %self.name, row_id = %id, "restore slot taken, relocating row");
        }
        if let Some(id) = self.free.pop_first() {
            return id;
        }
        let block = self.blocks.len() as u32;
        self.blocks.push(Block::new(self.rows_per_block));
        self.free
            .extend((1..self.rows_per_block as u32).map(|slot| RowId::new(block, slot)));
        RowId::new(block, 0)
    }

    fn insert_at(&mut self, row: Row, preferred: Option<RowId>, origin: Origin) -> StorageResult<RowId> {
        if self.export.is_some() {
            return Err(StorageError::ExportOnly {
                table: self.name.clone(),
            });
        }
        let row = self.schema.conform(&self.name, row)?;
        self.check_constraints(&row, None)?;

        let id = self.allocate(preferred);
        let key = self.schema.key_of(&row);
        for ctx in self.streams.values_mut() {
            ctx.on_insert(id, origin, &key, &row);
        }
        self.index_row(&row, id);
        self.blocks[id.block as usize].put(id.slot, row);
        self.tuple_count += 1;
        self.counters.inserts += 1;
        Ok(id)
    }

    fn update_at(&mut self, id: RowId, row: Row, origin: Origin) -> StorageResult<Row> {
        if self.export.is_some() {
            return Err(StorageError::ExportOnly {
                table: self.name.clone(),
            });
        }
        let row = self.schema.conform(&self.name, row)?;
        let old = self.get(id).cloned().ok_or_else(|| self.missing_slot(id))?;
        self.check_constraints(&row, Some(id))?;

        let old_key = self.schema.key_of(&old);
        let new_key = self.schema.key_of(&row);
        for ctx in self.streams.values_mut() {
            ctx.on_update(id, origin, (&old_key, &old), (&new_key, &row));
        }
        self.unindex_row(&old, id);
        self.index_row(&row, id);
        self.blocks[id.block as usize].replace(id.slot, row);
        self.counters.updates += 1;
        Ok(old)
    }

    fn delete_at(&mut self, id: RowId, origin: Origin) -> StorageResult<Row> {
        if self.export.is_some() {
            return Err(StorageError::ExportOnly {
                table: self.name.clone(),
            });
        }
        let old = self
            .blocks
            .get_mut(id.block as usize)
            .and_then(|b| b.take(id.slot))
            .ok_or_else(|| self.missing_slot(id))?;

        let key = self.schema.key_of(&old);
        for ctx in self.streams.values_mut() {
            ctx.on_delete(id, origin, &key, &old);
        }
        self.unindex_row(&old, id);
        self.free.insert(id);
        self.tuple_count -= 1;
        self.counters.deletes += 1;
        Ok(old)
    }

    // =========================================================================
    // Export
    // =========================================================================

    /// Appends a row to an export table. Returns the truncation mark.
    pub fn append_export(&mut self, txn_id: TxnId, row: Row) -> StorageResult<usize> {
        let row = self.schema.conform(&self.name, row)?;
        let stream = self.export.as_mut().ok_or_else(|| StorageError::ExportOnly {
            table: self.name.clone(),
        })?;
        let mark = stream.append(txn_id, &row);
        self.counters.inserts += 1;
        Ok(mark)
    }

    /// Truncates an export table's pending region.
    pub fn truncate_export(&mut self, mark: usize) {
        if let Some(stream) = self.export.as_mut() {
            stream.truncate(mark);
        }
    }

    // =========================================================================
    // Streams
    // =========================================================================

    /// Activates a copy-on-write stream over the current contents.
    pub fn activate_stream(&mut self, stream_type: StreamType) -> StorageResult<()> {
        if self.export.is_some() {
            return Err(StorageError::stream_state(
                &self.name,
                "export tables cannot be streamed",
            ));
        }
        if self.streams.contains_key(&stream_type) {
            return Err(StorageError::stream_state(
                &self.name,
                format!("{:?} stream already active", stream_type),
            ));
        }
        debug!(table = %self.name, ?stream_type, blocks = self.blocks.len(), "stream activated");
        self.streams
            .insert(stream_type, CowContext::new(self.blocks.len()));
        Ok(())
    }

    /// Serializes the next chunk of an active stream into `out`.
    pub fn stream_serialize_more(
        &mut self,
        stream_type: StreamType,
        partition_id: i32,
        max_bytes: usize,
        out: &mut BytesMut,
    ) -> StorageResult<StreamProgress> {
        let ctx = self.streams.get_mut(&stream_type).ok_or_else(|| {
            StorageError::stream_state(&self.name, format!("{:?} stream not active", stream_type))
        })?;
        let schema = &self.schema;
        ctx.serialize_more(
            &self.name,
            &self.blocks,
            partition_id,
            max_bytes,
            out,
            |row| schema.key_of(row),
        )
    }

    /// Discards a stream context. Returns the rows it streamed.
    pub fn deactivate_stream(&mut self, stream_type: StreamType) -> Option<u64> {
        self.streams
            .remove(&stream_type)
            .map(|ctx| ctx.rows_streamed())
    }

    /// Returns true if a stream of this type is active.
    pub fn is_streaming(&self, stream_type: StreamType) -> bool {
        self.streams.contains_key(&stream_type)
    }

    /// Returns the active stream types.
    pub fn active_streams(&self) -> Vec<StreamType> {
        self.streams.keys().copied().collect()
    }

    // =========================================================================
    // Eviction
    // =========================================================================

    /// Removes up to `max_rows` rows, in block order, without notifying anyone.
    pub fn evict_rows(&mut self, max_rows: usize) -> StorageResult<Vec<Row>> {
        if !self.streams.is_empty() {
            return Err(StorageError::stream_state(
                &self.name,
                "cannot evict while a stream is active",
            ));
        }
        let ids: Vec<RowId> = self.iter().take(max_rows).map(|(id, _)| id).collect();
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = self.blocks[id.block as usize].take(id.slot) {
                self.unindex_row(&row, id);
                self.free.insert(id);
                self.tuple_count -= 1;
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Records that a block of evicted rows lives in the backend.
    pub fn note_evicted(&mut self, block_id: u32) {
        self.evicted.insert(block_id);
    }

    /// Ids of evicted blocks not yet merged back.
    pub fn evicted_blocks(&self) -> Vec<u32> {
        self.evicted.iter().copied().collect()
    }

    /// Stages rows read back from the backend for the next merge.
    pub fn stage_unevicted(&mut self, block_id: u32, rows: Vec<Row>) -> StorageResult<()> {
        if !self.evicted.contains(&block_id) {
            return Err(StorageError::NotFound {
                backend: "anti-cache",
                what: format!("block {} of table {}", block_id, self.name),
            });
        }
        self.staged.insert(block_id, rows);
        Ok(())
    }

    /// Inserts staged rows back into the table. Returns the merged block ids.
    ///
    /// Every staged row is checked first. If one would break a constraint,
    /// for instance because a transaction inserted its key while it was
    /// evicted, nothing is merged and the blocks stay staged.
    pub fn merge_unevicted(&mut self) -> StorageResult<Vec<u32>> {
        self.check_staged()?;
        let mut staged = std::mem::take(&mut self.staged);
        let mut merged = Vec::with_capacity(staged.len());
        while let Some((block_id, rows)) = staged.pop_first() {
            let mut rows = rows.into_iter();
            while let Some(row) = rows.next() {
                if let Err(e) = self.insert_at(row.clone(), None, Origin::Local) {
                    warn!(table = %self.name, block = block_id, error = %e, "merge stopped part way");
                    staged.insert(block_id, std::iter::once(row).chain(rows).collect());
                    self.staged = staged;
                    return Err(e);
                }
            }
            self.evicted.remove(&block_id);
            merged.push(block_id);
        }
        Ok(merged)
    }

    fn check_staged(&self) -> StorageResult<()> {
        let unique: Vec<&TableIndex> = self
            .primary
            .iter()
            .chain(self.indexes.iter().filter(|i| i.unique))
            .collect();
        let mut seen: Vec<BTreeSet<Row>> = vec![BTreeSet::new(); unique.len()];
        for row in self.staged.values().flatten() {
            let row = self.schema.conform(&self.name, row.clone())?;
            self.check_constraints(&row, None)?;
            for (index, keys) in unique.iter().zip(seen.iter_mut()) {
                let key = index.key(&row);
                if !key.iter().any(|v| v.is_null()) && !keys.insert(key.clone()) {
                    return Err(self.duplicate(&index.name, &key));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::schema::Column;
    use crate::value::{ColumnType, Value};

    fn table(rows_per_block: usize) -> Table {
        let schema = Schema::new(vec![
            Column::new("id", ColumnType::Integer).not_null(),
            Column::new("name", ColumnType::Varchar),
        ])
        .with_primary_key(&["id"])
        .unwrap();
        Table::new("T", schema, rows_per_block)
    }

    fn stream_all(t: &mut Table, max_bytes: usize) -> StreamImage {
        let mut image = StreamImage::new(t.schema().primary_key().to_vec());
        let types = t.schema().types();
        let key_types = t.schema().key_types();
        loop {
            let mut out = BytesMut::new();
            match t
                .stream_serialize_more(StreamType::Snapshot, 0, max_bytes, &mut out)
                .unwrap()
            {
                StreamProgress::Exhausted => break,
                StreamProgress::Chunk { bytes, .. } => {
                    assert_eq!(bytes, out.len());
                    image.apply(StreamChunk::decode(&out, &types, &key_types).unwrap());
                }
            }
        }
        image
    }

    #[test]
    fn test_insert_allocates_blocks() {
        let mut t = table(2);
        for i in 0..5 {
            t.insert(row![i, "x"]).unwrap();
        }
        assert_eq!(t.len(), 5);
        assert_eq!(t.block_count(), 3);
        assert_eq!(t.counters().inserts, 5);
    }

    #[test]
    fn test_duplicate_primary_key() {
        let mut t = table(4);
        t.insert(row![1, "a"]).unwrap();
        let err = t.insert(row![1, "b"]).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey { .. }));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_null_primary_key() {
        let mut t = Table::new(
            "N",
            Schema::new(vec![Column::new("id", ColumnType::Integer)])
                .with_primary_key(&["id"])
                .unwrap(),
            4,
        );
        assert!(matches!(
            t.insert(Row::new(vec![Value::Null])),
            Err(StorageError::NullViolation { .. })
        ));
    }

    #[test]
    fn test_delete_then_restore_same_slot() {
        let mut t = table(4);
        let id = t.insert(row![1, "a"]).unwrap();
        let row = t.delete(id).unwrap();
        assert!(t.is_empty());
        t.restore(id, row).unwrap();
        assert_eq!(t.get(id), Some(&row![1, "a"]));
        assert_eq!(t.find(&row![1]), Some(id));
    }

    #[test]
    fn test_update_reindexes() {
        let mut t = table(4);
        let id = t.insert(row![1, "a"]).unwrap();
        let old = t.update(id, row![2, "b"]).unwrap();
        assert_eq!(old, row![1, "a"]);
        assert_eq!(t.find(&row![1]), None);
        assert_eq!(t.find(&row![2]), Some(id));
    }

    #[test]
    fn test_unique_index_build_fails_without_side_effects() {
        let mut t = table(4);
        t.insert(row![1, "a"]).unwrap();
        t.insert(row![2, "a"]).unwrap();
        assert!(t.add_index("by_name", &["name"], true).is_err());
        assert!(t.index_names().is_empty());

        t.add_index("by_name", &["name"], false).unwrap();
        assert_eq!(t.index_names(), vec!["by_name"]);
        assert!(t.drop_index("by_name"));
    }

    #[test]
    fn test_stream_hides_local_mutations() {
        let mut t = table(4);
        let mut ids = Vec::new();
        for i in 0..10 {
            ids.push(t.insert(row![i, "orig"]).unwrap());
        }
        t.activate_stream(StreamType::Snapshot).unwrap();

        t.update(ids[7], row![7, "changed"]).unwrap();
        t.delete(ids[8]).unwrap();
        t.insert(row![100, "new"]).unwrap();

        let image = stream_all(&mut t, 64);
        assert_eq!(image.len(), 10);
        assert_eq!(image.get(&row![7]), Some(&row![7, "orig"]));
        assert!(image.get(&row![100]).is_none());
    }

    #[test]
    fn test_stream_replay_wins_with_tombstones() {
        let mut t = table(4);
        for i in 0..8 {
            t.insert(row![i, "orig"]).unwrap();
        }
        t.activate_stream(StreamType::Snapshot).unwrap();

        // first chunk covers the first rows only
        let mut out = BytesMut::new();
        let types = t.schema().types();
        let key_types = t.schema().key_types();
        t.stream_serialize_more(StreamType::Snapshot, 0, 12 + 2 * row![0, "orig"].serialized_size(), &mut out)
            .unwrap();
        let first = StreamChunk::decode(&out, &types, &key_types).unwrap();
        assert_eq!(first.rows.len(), 2);
        let mut image = StreamImage::new(vec![0]);
        image.apply(first);

        // replay deletes an emitted row and an unscanned row, updates an emitted row
        t.replay_delete(&row![0]).unwrap();
        t.replay_delete(&row![6]).unwrap();
        t.replay_update(row![1, "replayed"]).unwrap();
        t.replay_insert(row![50, "replayed"]).unwrap();

        loop {
            let mut out = BytesMut::new();
            match t
                .stream_serialize_more(StreamType::Snapshot, 0, 4096, &mut out)
                .unwrap()
            {
                StreamProgress::Exhausted => break,
                StreamProgress::Chunk { .. } => {
                    image.apply(StreamChunk::decode(&out, &types, &key_types).unwrap())
                }
            }
        }

        assert!(image.get(&row![0]).is_none());
        assert!(image.get(&row![6]).is_none());
        assert_eq!(image.get(&row![1]), Some(&row![1, "replayed"]));
        assert_eq!(image.get(&row![50]), Some(&row![50, "replayed"]));
        assert_eq!(image.len(), 7);
    }

    #[test]
    fn test_stream_double_activation() {
        let mut t = table(4);
        t.activate_stream(StreamType::Snapshot).unwrap();
        assert!(t.activate_stream(StreamType::Snapshot).is_err());
        t.activate_stream(StreamType::Recovery).unwrap();
        assert_eq!(t.active_streams().len(), 2);
    }

    #[test]
    fn test_export_table_rejects_dml() {
        let mut t = Table::new_export(
            "E",
            Schema::new(vec![Column::new("v", ColumnType::BigInt)]),
        );
        assert!(matches!(t.insert(row![1i64]), Err(StorageError::ExportOnly { .. })));
        let mark = t.append_export(TxnId::new(1), row![1i64]).unwrap();
        assert_eq!(mark, 0);
        t.truncate_export(mark);
        assert_eq!(t.export().map(ExportStream::pending_rows), Some(0));
    }

    #[test]
    fn test_evict_and_merge() {
        let mut t = table(4);
        for i in 0..6 {
            t.insert(row![i, "x"]).unwrap();
        }
        let rows = t.evict_rows(4).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(t.len(), 2);

        t.note_evicted(0);
        t.stage_unevicted(0, rows).unwrap();
        assert_eq!(t.merge_unevicted().unwrap(), vec![0]);
        assert_eq!(t.len(), 6);
        assert!(t.evicted_blocks().is_empty());
    }

    #[test]
    fn test_merge_with_clashing_key_keeps_staged_rows() {
        let mut t = table(4);
        for i in 0..3 {
            t.insert(row![i, "x"]).unwrap();
        }
        let rows = t.evict_rows(3).unwrap();
        t.note_evicted(0);
        t.insert(row![0, "dup"]).unwrap();
        t.stage_unevicted(0, rows).unwrap();

        assert!(matches!(
            t.merge_unevicted(),
            Err(StorageError::DuplicateKey { .. })
        ));
        assert_eq!(t.len(), 1);
        assert_eq!(t.evicted_blocks(), vec![0]);

        let dup = t.find(&row![0]).unwrap();
        t.delete(dup).unwrap();
        assert_eq!(t.merge_unevicted().unwrap(), vec![0]);
        assert_eq!(t.len(), 3);
        assert_eq!(t.get(t.find(&row![2]).unwrap()), Some(&row![2, "x"]));
    }

    #[test]
    fn test_content_hash_is_order_independent() {
        let mut a = table(4);
        let mut b = table(4);
        a.insert(row![1, "a"]).unwrap();
        a.insert(row![2, "b"]).unwrap();
        b.insert(row![2, "b"]).unwrap();
        b.insert(row![1, "a"]).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
    }
}
