//! Copy-on-write table streams.
//!
//! A stream scans the table's blocks in `RowId` order and emits the rows
//! that were present when it was activated, while transactions keep
//! mutating the table.
//!
//! ```text
//!            cursor
//!   scanned     │      unscanned (end_block fixed at activation)
//! ┌───────────┬─▼─────────────────────────────┐  ┌──────────────┐
//! │ emitted   │ backup[id] → pre-image        │  │ blocks added │
//! │           │ skip{id}   → not in snapshot  │  │ later: never │
//! └───────────┴───────────────────────────────┘  └──────────────┘
//! ```
//!
//! Local mutations are hidden: the first update or delete of an unscanned
//! snapshot row saves its pre-image, and rows inserted into unscanned slots
//! are skipped.
//!
//! Replayed mutations (recovery messages) are made visible: the replayed row
//! is queued for the next chunk, and a replay that removes or replaces a key
//! already emitted queues a tombstone for that key. A consumer applies each
//! chunk's tombstones to the image built from earlier chunks, then adds the
//! chunk's rows.
//!
//! Chunk layout (big-endian):
//!
//! ```text
//! [i32 partition_id] [u32 row_count] [tuple]* [u32 tombstone_count] [key tuple]*
//! ```

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::{Buf, BufMut, BytesMut};

use crate::codec::{get_tuple, put_tuple};
use crate::error::{StorageError, StorageResult};
use crate::row::Row;
use crate::value::ColumnType;

use super::block::{Block, RowId};

/// Stream kind. One stream of each kind may be active per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamType {
    /// Snapshot export.
    Snapshot,
    /// Partition rebalance / recovery.
    Recovery,
}

impl StreamType {
    /// Parses the caller's stream type code.
    #[must_use]
    pub const fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Snapshot),
            1 => Some(Self::Recovery),
            _ => None,
        }
    }

    /// Returns the caller's stream type code.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Snapshot => 0,
            Self::Recovery => 1,
        }
    }
}

/// Where a mutation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A transaction on this partition.
    Local,
    /// A replayed recovery message.
    Replay,
}

/// Result of one serialize-more step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProgress {
    /// A chunk was written.
    Chunk {
        /// Bytes written.
        bytes: usize,
        /// Rows in the chunk.
        rows: usize,
        /// Tombstones in the chunk.
        tombstones: usize,
    },
    /// Nothing is left to stream.
    Exhausted,
}

const CHUNK_OVERHEAD: usize = 4 + 4 + 4;

/// Per-stream copy-on-write state.
#[derive(Debug)]
pub(crate) struct CowContext {
    cursor: RowId,
    end_block: u32,
    backup: HashMap<RowId, Row>,
    skip: HashSet<RowId>,
    emitted: HashSet<Row>,
    pending: VecDeque<(Row, Row)>,
    tombstones: VecDeque<Row>,
    scan_done: bool,
    rows_streamed: u64,
}

impl CowContext {
    pub(crate) fn new(block_count: usize) -> Self {
        Self {
            cursor: RowId::default(),
            end_block: block_count as u32,
            backup: HashMap::new(),
            skip: HashSet::new(),
            emitted: HashSet::new(),
            pending: VecDeque::new(),
            tombstones: VecDeque::new(),
            scan_done: block_count == 0,
            rows_streamed: 0,
        }
    }

    pub(crate) fn rows_streamed(&self) -> u64 {
        self.rows_streamed
    }

    fn unscanned(&self, id: RowId) -> bool {
        !self.scan_done && id >= self.cursor && id.block < self.end_block
    }

    // =========================================================================
    // Mutation hooks
    // =========================================================================

    pub(crate) fn on_insert(&mut self, id: RowId, origin: Origin, key: &Row, row: &Row) {
        match origin {
            Origin::Local => {
                if self.unscanned(id) {
                    self.skip.insert(id);
                }
            }
            Origin::Replay => self.replay_add(id, key, row),
        }
    }

    pub(crate) fn on_update(
        &mut self,
        id: RowId,
        origin: Origin,
        old: (&Row, &Row),
        new: (&Row, &Row),
    ) {
        match origin {
            Origin::Local => self.preserve(id, old.1),
            Origin::Replay => {
                self.replay_remove(id, old.0);
                self.replay_add(id, new.0, new.1);
            }
        }
    }

    pub(crate) fn on_delete(&mut self, id: RowId, origin: Origin, key: &Row, old: &Row) {
        match origin {
            Origin::Local => self.preserve(id, old),
            Origin::Replay => self.replay_remove(id, key),
        }
    }

    fn preserve(&mut self, id: RowId, old: &Row) {
        if self.unscanned(id) && !self.skip.contains(&id) && !self.backup.contains_key(&id) {
            self.backup.insert(id, old.clone());
        }
    }

    fn replay_add(&mut self, id: RowId, key: &Row, row: &Row) {
        if self.unscanned(id) {
            self.skip.insert(id);
        }
        if self.emitted.remove(key) {
            self.tombstones.push_back(key.clone());
        }
        self.pending.push_back((key.clone(), row.clone()));
    }

    fn replay_remove(&mut self, id: RowId, key: &Row) {
        // A snapshot row replaced by replay must not be streamed from its backup either.
        if self.unscanned(id) && self.skip.insert(id) {
            self.backup.remove(&id);
        }
        if self.emitted.remove(key) {
            self.tombstones.push_back(key.clone());
        }
        self.pending.retain(|(k, _)| k != key);
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    /// Writes the next chunk into `out`, using at most `max_bytes`.
    pub(crate) fn serialize_more<K>(
        &mut self,
        table: &str,
        blocks: &[Block],
        partition_id: i32,
        max_bytes: usize,
        out: &mut BytesMut,
        key_of: K,
    ) -> StorageResult<StreamProgress>
    where
        K: Fn(&Row) -> Row,
    {
        if self.scan_done && self.pending.is_empty() && self.tombstones.is_empty() {
            return Ok(StreamProgress::Exhausted);
        }
        if max_bytes < CHUNK_OVERHEAD {
            return Err(StorageError::stream_state(
                table,
                format!("output buffer of {} bytes cannot hold a chunk", max_bytes),
            ));
        }

        let budget = max_bytes - CHUNK_OVERHEAD;
        let mut used = 0;
        let mut rows = BytesMut::new();
        let mut row_count = 0usize;
        let mut tombs = BytesMut::new();
        let mut tomb_count = 0usize;

        while let Some(key) = self.tombstones.front() {
            let size = key.serialized_size();
            if used + size > budget {
                break;
            }
            put_tuple(&mut tombs, key);
            used += size;
            tomb_count += 1;
            self.tombstones.pop_front();
        }

        while let Some((_, row)) = self.pending.front() {
            let size = row.serialized_size();
            if used + size > budget {
                break;
            }
            put_tuple(&mut rows, row);
            used += size;
            row_count += 1;
            if let Some((key, _)) = self.pending.pop_front() {
                self.emitted.insert(key);
            }
        }

        while !self.scan_done {
            let Some(block) = blocks
                .get(self.cursor.block as usize)
                .filter(|_| self.cursor.block < self.end_block)
            else {
                self.scan_done = true;
                break;
            };

            let id = self.cursor;
            let candidate = match self.backup.get(&id) {
                Some(row) => Some(row),
                None if self.skip.contains(&id) => None,
                None => block.get(id.slot),
            };

            if let Some(row) = candidate {
                let size = row.serialized_size();
                if used + size > budget {
                    break;
                }
                put_tuple(&mut rows, row);
                used += size;
                row_count += 1;
                self.emitted.insert(key_of(row));
            }

            self.backup.remove(&id);
            self.skip.remove(&id);
            self.cursor = if id.slot as usize + 1 >= block.capacity() {
                RowId::new(id.block + 1, 0)
            } else {
                RowId::new(id.block, id.slot + 1)
            };
        }

        if row_count == 0 && tomb_count == 0 {
            if self.scan_done && self.pending.is_empty() && self.tombstones.is_empty() {
                return Ok(StreamProgress::Exhausted);
            }
            return Err(StorageError::stream_state(
                table,
                format!("output buffer of {} bytes cannot hold the next tuple", max_bytes),
            ));
        }

        let start = out.len();
        out.put_i32(partition_id);
        out.put_u32(row_count as u32);
        out.put_slice(&rows);
        out.put_u32(tomb_count as u32);
        out.put_slice(&tombs);
        self.rows_streamed += row_count as u64;

        Ok(StreamProgress::Chunk {
            bytes: out.len() - start,
            rows: row_count,
            tombstones: tomb_count,
        })
    }
}

/// A decoded stream chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    /// Partition that produced the chunk.
    pub partition_id: i32,
    /// Streamed rows.
    pub rows: Vec<Row>,
    /// Keys removed from the image built so far.
    pub tombstones: Vec<Row>,
}

impl StreamChunk {
    /// Decodes a chunk given the table's column types and key types.
    pub fn decode(
        bytes: &[u8],
        types: &[ColumnType],
        key_types: &[ColumnType],
    ) -> StorageResult<Self> {
        let mut buf = bytes;
        if buf.remaining() < 8 {
            return Err(StorageError::decode("stream chunk header truncated"));
        }
        let partition_id = buf.get_i32();
        let row_count = buf.get_u32() as usize;
        let rows = (0..row_count)
            .map(|_| get_tuple(&mut buf, types))
            .collect::<StorageResult<Vec<_>>>()?;

        if buf.remaining() < 4 {
            return Err(StorageError::decode("stream chunk tombstone count truncated"));
        }
        let tomb_count = buf.get_u32() as usize;
        let tombstones = (0..tomb_count)
            .map(|_| get_tuple(&mut buf, key_types))
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(Self {
            partition_id,
            rows,
            tombstones,
        })
    }
}

/// Image reconstructed by a stream consumer.
#[derive(Debug, Default)]
pub struct StreamImage {
    rows: HashMap<Row, Row>,
    key_columns: Vec<usize>,
}

impl StreamImage {
    /// Creates an image keyed by the given columns (empty means whole row).
    pub fn new(key_columns: Vec<usize>) -> Self {
        Self {
            rows: HashMap::new(),
            key_columns,
        }
    }

    /// Applies a chunk: tombstones first, then rows.
    pub fn apply(&mut self, chunk: StreamChunk) {
        for key in &chunk.tombstones {
            self.rows.remove(key);
        }
        for row in chunk.rows {
            let key = if self.key_columns.is_empty() {
                row.clone()
            } else {
                row.project(&self.key_columns)
            };
            self.rows.insert(key, row);
        }
    }

    /// Number of rows in the image.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the image is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the row with the given key.
    pub fn get(&self, key: &Row) -> Option<&Row> {
        self.rows.get(key)
    }

    /// Returns the rows sorted.
    pub fn sorted_rows(&self) -> Vec<Row> {
        let mut rows: Vec<Row> = self.rows.values().cloned().collect();
        rows.sort();
        rows
    }
}
