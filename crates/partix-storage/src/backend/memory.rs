//! In-memory backend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use super::{SavedTable, StorageBackend};
use crate::error::{StorageError, StorageResult};

/// Keeps saved tables, log records and evicted blocks in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    files: HashMap<PathBuf, Bytes>,
    log: Vec<Bytes>,
    synced: usize,
    blocks: HashMap<(String, u32), Bytes>,
    next_block: u32,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log records appended so far.
    pub fn log_records(&self) -> &[Bytes] {
        &self.log
    }

    /// Number of log records covered by the last sync.
    pub fn synced_records(&self) -> usize {
        self.synced
    }

    /// Number of evicted blocks held.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.synced = self.log.len();
        Ok(())
    }

    fn append_log(&mut self, record: &[u8]) -> StorageResult<()> {
        self.log.push(Bytes::copy_from_slice(record));
        Ok(())
    }

    fn read_log(&mut self) -> StorageResult<Vec<Bytes>> {
        Ok(self.log.clone())
    }

    fn save_table(&mut self, path: &Path, image: &SavedTable) -> StorageResult<u64> {
        let bytes = image.encode();
        let len = bytes.len() as u64;
        self.files.insert(path.to_path_buf(), bytes);
        Ok(len)
    }

    fn restore_table(&mut self, path: &Path) -> StorageResult<SavedTable> {
        let bytes = self.files.get(path).ok_or_else(|| StorageError::NotFound {
            backend: "memory",
            what: format!("table file {}", path.display()),
        })?;
        SavedTable::decode(path, bytes)
    }

    fn evict_block(&mut self, table: &str, data: Bytes) -> StorageResult<u32> {
        let id = self.next_block;
        self.next_block += 1;
        self.blocks.insert((table.to_string(), id), data);
        Ok(id)
    }

    fn read_block(&mut self, table: &str, block_id: u32) -> StorageResult<Bytes> {
        self.blocks
            .get(&(table.to_string(), block_id))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                backend: "memory",
                what: format!("block {} of table {}", block_id, table),
            })
    }

    fn merge_blocks(&mut self, table: &str, block_ids: &[u32]) -> StorageResult<()> {
        for id in block_ids {
            self.blocks.remove(&(table.to_string(), *id));
        }
        Ok(())
    }
}
