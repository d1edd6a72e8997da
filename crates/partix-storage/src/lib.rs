//! # partix-storage
//!
//! Storage layer for a partix partition.
//!
//! This crate provides:
//! - Typed values, rows and schemas with coercion and constraint checks
//! - Block-structured tables with primary and secondary hash indexes
//! - Copy-on-write table streams for snapshots and partition recovery
//! - Append-only export streams
//! - Temp tables charged against a per-fragment memory limit
//! - The binary codecs used for tuples, tables and stream chunks
//! - Pluggable backends for saved tables, log records and evicted blocks
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           Table                              │
//! │   Schema ── conform ──► Block[RowId] ◄── TableIndex          │
//! │                             │                                │
//! │                   CowContext per StreamType                  │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │ UndoAction                   │ serialized table
//!                ▼                              ▼
//!          undo quanta                 StorageBackend (memory | file)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use partix_storage::{row, Column, ColumnType, Schema, Table};
//!
//! let schema = Schema::new(vec![
//!     Column::new("id", ColumnType::Integer).not_null(),
//!     Column::new("name", ColumnType::Varchar),
//! ])
//! .with_primary_key(&["id"])
//! .unwrap();
//!
//! let mut table = Table::new("T", schema, 1024);
//! let id = table.insert(row![1, "a"]).unwrap();
//! assert_eq!(table.get(id), Some(&row![1, "a"]));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod codec;
pub mod error;
pub mod export;
pub mod row;
pub mod schema;
pub mod table;
pub mod temp;
pub mod undo;
pub mod value;

pub use backend::{open_backend, FileBackend, MemoryBackend, SavedTable, StorageBackend};
pub use codec::{DecodedTable, TableReader};
pub use error::{StorageError, StorageResult};
pub use export::{ExportBlock, ExportStream};
pub use row::Row;
pub use schema::{Column, Schema};
pub use table::{
    Origin, RowId, StreamChunk, StreamImage, StreamProgress, StreamType, Table, TableCounters,
};
pub use temp::{TempLimit, TempTable};
pub use undo::UndoAction;
pub use value::{ColumnType, Value};
