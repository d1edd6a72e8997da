//! Directory-backed backend.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::{Buf, Bytes};
use tracing::{debug, info, warn};

use super::{SavedTable, StorageBackend};
use crate::error::StorageResult;

const LOG_FILE: &str = "engine.log";
const BLOCK_DIR: &str = "anticache";

/// Writes table files, log records and evicted blocks under a directory.
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    log: File,
    next_block: u32,
}

impl FileBackend {
    /// Opens (creating if needed) a backend rooted at `dir`.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir.join(BLOCK_DIR))?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LOG_FILE))?;
        info!(dir = %dir.display(), "file backend opened");
        Ok(Self {
            dir: dir.to_path_buf(),
            log,
            next_block: 0,
        })
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        }
    }

    fn block_path(&self, table: &str, block_id: u32) -> PathBuf {
        self.dir
            .join(BLOCK_DIR)
            .join(format!("{}-{:08}.blk", table, block_id))
    }
}

impl StorageBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.log.sync_data()?;
        Ok(())
    }

    fn append_log(&mut self, record: &[u8]) -> StorageResult<()> {
        self.log.write_all(&(record.len() as u32).to_be_bytes())?;
        self.log.write_all(record)?;
        Ok(())
    }

    fn read_log(&mut self) -> StorageResult<Vec<Bytes>> {
        self.log.flush()?;
        let mut data = Bytes::from(fs::read(self.dir.join(LOG_FILE))?);
        let mut records = Vec::new();
        while data.len() >= 4 {
            let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if data.len() - 4 < len {
                break;
            }
            data.advance(4);
            records.push(data.split_to(len));
        }
        if !data.is_empty() {
            warn!(bytes = data.len(), "ignoring torn record at the end of the log");
        }
        debug!(records = records.len(), "log read");
        Ok(records)
    }

    fn save_table(&mut self, path: &Path, image: &SavedTable) -> StorageResult<u64> {
        let path = self.resolve(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = image.encode();
        fs::write(&path, &bytes)?;
        debug!(path = %path.display(), table = %image.table, bytes = bytes.len(), "table saved");
        Ok(bytes.len() as u64)
    }

    fn restore_table(&mut self, path: &Path) -> StorageResult<SavedTable> {
        let path = self.resolve(path);
        let bytes = fs::read(&path)?;
        SavedTable::decode(&path, &bytes)
    }

    fn evict_block(&mut self, table: &str, data: Bytes) -> StorageResult<u32> {
        let id = self.next_block;
        fs::write(self.block_path(table, id), &data)?;
        self.next_block += 1;
        Ok(id)
    }

    fn read_block(&mut self, table: &str, block_id: u32) -> StorageResult<Bytes> {
        Ok(Bytes::from(fs::read(self.block_path(table, block_id))?))
    }

    fn merge_blocks(&mut self, table: &str, block_ids: &[u32]) -> StorageResult<()> {
        for id in block_ids {
            fs::remove_file(self.block_path(table, *id))?;
        }
        Ok(())
    }
}
