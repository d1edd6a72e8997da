//! System-wide constants for partix.
//!
//! This module defines constants used across the engine crates.

// =============================================================================
// Result Codes
// =============================================================================

/// Fragment execution succeeded.
pub const ENGINE_ERRORCODE_SUCCESS: i32 = 0;

/// Fragment execution failed; an exception was written.
pub const ENGINE_ERRORCODE_ERROR: i32 = 1;

/// Fragment execution produced nothing.
pub const ENGINE_ERRORCODE_NO_DATA: i32 = 102;

// =============================================================================
// Batch and Parameter Limits
// =============================================================================

/// Maximum number of fragments in one batch.
pub const MAX_BATCH_COUNT: usize = 1000;

/// Maximum number of parameters per fragment.
pub const MAX_PARAM_COUNT: usize = 1000;

// =============================================================================
// Table Storage
// =============================================================================

/// Default number of tuple slots per table block.
pub const DEFAULT_ROWS_PER_BLOCK: usize = 1024;

/// Default temp-table memory allotted per plan node (100 MB).
pub const DEFAULT_TEMP_TABLE_BYTES_PER_NODE: usize = 100 * 1024 * 1024;

/// Maximum length of a VARCHAR/VARBINARY value (1 MB).
pub const MAX_VARIABLE_LENGTH: usize = 1024 * 1024;

// =============================================================================
// Serialization
// =============================================================================

/// Marker written at the start of the exception buffer when no exception occurred.
pub const EXCEPTION_TYPE_NONE: u32 = 0;

/// Status byte of a serialized table.
pub const TABLE_STATUS_OK: u8 = 0;

// =============================================================================
// Checksum and Magic Numbers
// =============================================================================

/// Magic number for saved table files.
pub const TABLE_FILE_MAGIC: u32 = 0x5054_5842; // "PTXB" in ASCII

/// Version number for saved table file format.
pub const TABLE_FILE_VERSION: u32 = 1;

/// Catalog path prefix for table delegates.
pub const CATALOG_TABLE_PATH: &str = "tables";
