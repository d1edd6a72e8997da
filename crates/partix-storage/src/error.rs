//! Storage error types.

use std::io;
use std::path::PathBuf;

use partix_common::ErrorCode;
use thiserror::Error;

use crate::value::ColumnType;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by tables, codecs and storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Row has the wrong number of columns.
    #[error("schema mismatch on table {table}: expected {expected} columns, found {found}")]
    SchemaMismatch {
        table: String,
        expected: usize,
        found: usize,
    },

    /// Value cannot be stored in a column of this type.
    #[error("type mismatch in column {column}: expected {expected}, found {found}")]
    TypeMismatch {
        column: String,
        expected: ColumnType,
        found: String,
    },

    /// NULL written into a NOT NULL column.
    #[error("column {column} of table {table} is not nullable")]
    NullViolation { table: String, column: String },

    /// Primary key or unique index violation.
    #[error("duplicate key {key} in {index} of table {table}")]
    DuplicateKey {
        table: String,
        index: String,
        key: String,
    },

    /// No row at the addressed slot.
    #[error("no row at {row_id} in table {table}")]
    RowNotFound { table: String, row_id: String },

    /// Column name not found.
    #[error("column {column} not found in table {table}")]
    ColumnNotFound { table: String, column: String },

    /// Bytes could not be decoded.
    #[error("decode error: {reason}")]
    Decode { reason: String },

    /// Variable-length value over the size limit.
    #[error("value of {size} bytes exceeds maximum {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    /// Temp-table memory limit reached.
    #[error("temp table limit exceeded: {used} of {limit} bytes")]
    ResourceExhausted { used: usize, limit: usize },

    /// Stream operation in the wrong state.
    #[error("stream error on table {table}: {reason}")]
    StreamState { table: String, reason: String },

    /// DML other than insert on an export table, or insert into a non-export table as export.
    #[error("operation not allowed on export table {table}")]
    ExportOnly { table: String },

    /// I/O error from a backend.
    #[error("storage I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// Saved file has an unexpected magic number.
    #[error("invalid table file magic in {path}: expected {expected:#010x}, found {found:#010x}")]
    InvalidMagic {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    /// Saved file failed its checksum.
    #[error("table file checksum mismatch in {path}: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: u32,
        computed: u32,
    },

    /// Backend lookup failed.
    #[error("{what} not found in {backend} backend")]
    NotFound { backend: &'static str, what: String },
}

impl StorageError {
    /// Creates a decode error.
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// Creates a stream state error.
    pub fn stream_state(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StreamState {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Returns the stable code of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SchemaMismatch { .. } | Self::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            Self::NullViolation { .. } | Self::DuplicateKey { .. } => {
                ErrorCode::ConstraintViolation
            }
            Self::RowNotFound { .. } => ErrorCode::Internal,
            Self::ColumnNotFound { .. } => ErrorCode::ColumnNotFound,
            Self::Decode { .. } => ErrorCode::Decode,
            Self::ValueTooLarge { .. } => ErrorCode::InvalidArgument,
            Self::ResourceExhausted { .. } => ErrorCode::ResourceExhausted,
            Self::StreamState { .. } => ErrorCode::StreamState,
            Self::ExportOnly { .. } => ErrorCode::NotSupported,
            Self::Io { .. } => ErrorCode::Io,
            Self::InvalidMagic { .. } | Self::ChecksumMismatch { .. } => ErrorCode::Corruption,
            Self::NotFound { .. } => ErrorCode::Storage,
        }
    }
}
