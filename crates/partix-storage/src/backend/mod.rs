//! Pluggable storage backends.
//!
//! The engine reaches durable or tiered storage only through
//! `StorageBackend`: saving and restoring whole tables, appending log
//! records, and moving evicted row blocks out of and back into memory. The
//! backend is chosen once, from `BackendConfig`, when the engine is built.

mod file;
mod memory;

use std::fmt;
use std::path::Path;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use partix_common::config::BackendConfig;
use partix_common::constants::{TABLE_FILE_MAGIC, TABLE_FILE_VERSION};

use crate::codec::{get_string, put_string};
use crate::error::{StorageError, StorageResult};

pub use file::FileBackend;
pub use memory::MemoryBackend;

/// Capability interface of a storage backend.
pub trait StorageBackend: fmt::Debug + Send {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Makes previously appended log records durable.
    fn sync(&mut self) -> StorageResult<()>;

    /// Appends one encoded log record.
    fn append_log(&mut self, record: &[u8]) -> StorageResult<()>;

    /// Log records appended so far, oldest first.
    fn read_log(&mut self) -> StorageResult<Vec<Bytes>>;

    /// Saves a table image at `path`. Returns bytes written.
    fn save_table(&mut self, path: &Path, image: &SavedTable) -> StorageResult<u64>;

    /// Restores the table image saved at `path`.
    fn restore_table(&mut self, path: &Path) -> StorageResult<SavedTable>;

    /// Stores a block of evicted rows. Returns its block id.
    fn evict_block(&mut self, table: &str, data: Bytes) -> StorageResult<u32>;

    /// Reads an evicted block back.
    fn read_block(&mut self, table: &str, block_id: u32) -> StorageResult<Bytes>;

    /// Forgets blocks that have been merged back into memory.
    fn merge_blocks(&mut self, table: &str, block_ids: &[u32]) -> StorageResult<()>;
}

/// Builds the backend named by the configuration.
pub fn open_backend(config: &BackendConfig) -> StorageResult<Box<dyn StorageBackend>> {
    match config {
        BackendConfig::Memory => Ok(Box::new(MemoryBackend::new())),
        BackendConfig::File { dir } => Ok(Box::new(FileBackend::open(dir)?)),
    }
}

/// A saved table image.
///
/// File layout (big-endian):
///
/// ```text
/// [u32 magic] [u32 version] [u32 crc32 of the rest]
/// [string cluster] [string database] [string table] [u32 len] [serialized table]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedTable {
    /// Cluster name.
    pub cluster: String,
    /// Database name.
    pub database: String,
    /// Table name.
    pub table: String,
    /// The table in serialized-table format.
    pub data: Bytes,
}

impl SavedTable {
    /// Encodes the image with its header and checksum.
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        put_string(&mut body, &self.cluster);
        put_string(&mut body, &self.database);
        put_string(&mut body, &self.table);
        body.put_u32(self.data.len() as u32);
        body.put_slice(&self.data);

        let mut buf = BytesMut::with_capacity(12 + body.len());
        buf.put_u32(TABLE_FILE_MAGIC);
        buf.put_u32(TABLE_FILE_VERSION);
        buf.put_u32(crc32fast::hash(&body));
        buf.put_slice(&body);
        buf.freeze()
    }

    /// Decodes and verifies an image read from `path`.
    pub fn decode(path: &Path, bytes: &[u8]) -> StorageResult<Self> {
        let mut buf = bytes;
        if buf.remaining() < 12 {
            return Err(StorageError::decode("table file header truncated"));
        }
        let magic = buf.get_u32();
        if magic != TABLE_FILE_MAGIC {
            return Err(StorageError::InvalidMagic {
                path: path.to_path_buf(),
                expected: TABLE_FILE_MAGIC,
                found: magic,
            });
        }
        let version = buf.get_u32();
        if version != TABLE_FILE_VERSION {
            return Err(StorageError::decode(format!(
                "unsupported table file version {}",
                version
            )));
        }
        let expected = buf.get_u32();
        let computed = crc32fast::hash(buf);
        if expected != computed {
            return Err(StorageError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected,
                computed,
            });
        }

        let cluster = get_string(&mut buf)?;
        let database = get_string(&mut buf)?;
        let table = get_string(&mut buf)?;
        if buf.remaining() < 4 {
            return Err(StorageError::decode("table file data length truncated"));
        }
        let len = buf.get_u32() as usize;
        if buf.remaining() != len {
            return Err(StorageError::decode(format!(
                "table file data: expected {} bytes, found {}",
                len,
                buf.remaining()
            )));
        }
        Ok(Self {
            cluster,
            database,
            table,
            data: Bytes::copy_from_slice(buf),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn image() -> SavedTable {
        SavedTable {
            cluster: "c".into(),
            database: "db".into(),
            table: "T".into(),
            data: Bytes::from_static(b"payload"),
        }
    }

    #[test]
    fn test_saved_table_checksum() {
        let path = PathBuf::from("t.ptx");
        let mut bytes = image().encode().to_vec();
        assert_eq!(SavedTable::decode(&path, &bytes).unwrap(), image());

        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(
            SavedTable::decode(&path, &bytes),
            Err(StorageError::ChecksumMismatch { .. })
        ));

        bytes[0] = 0;
        assert!(matches!(
            SavedTable::decode(&path, &bytes),
            Err(StorageError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_open_backend() {
        let backend = open_backend(&BackendConfig::Memory).unwrap();
        assert_eq!(backend.name(), "memory");
    }
}
