//! Stable error, exception and result codes.

use std::fmt;

use crate::constants::{ENGINE_ERRORCODE_ERROR, ENGINE_ERRORCODE_NO_DATA, ENGINE_ERRORCODE_SUCCESS};

/// Error codes for categorizing errors.
///
/// These codes are written into the exception buffer and are stable
/// across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Internal error (bug or corrupted bookkeeping).
    Internal = 0x0001,
    /// Operation not supported.
    NotSupported = 0x0002,
    /// Invalid argument provided.
    InvalidArgument = 0x0003,
    /// I/O error.
    Io = 0x0004,

    // Catalog errors (0x0100 - 0x01FF)
    /// Catalog payload malformed or inconsistent.
    CatalogInvalid = 0x0100,
    /// Catalog update version out of order.
    VersionMismatch = 0x0101,
    /// Table not found.
    TableNotFound = 0x0102,
    /// Column not found.
    ColumnNotFound = 0x0103,

    // Undo errors (0x0200 - 0x02FF)
    /// Undo token lower than the current token.
    TokenRegression = 0x0200,
    /// Mutation attempted without an active undo quantum.
    NoActiveQuantum = 0x0201,

    // Plan errors (0x0300 - 0x03FF)
    /// Plan fragment not found.
    FragmentNotFound = 0x0300,
    /// Plan tree malformed or references unknown objects.
    PlanInvalid = 0x0301,

    // Execution errors (0x0400 - 0x04FF)
    /// Unique or primary key constraint violated.
    ConstraintViolation = 0x0400,
    /// Value type does not match the column type.
    TypeMismatch = 0x0401,
    /// Temp-table or buffer capacity exhausted.
    ResourceExhausted = 0x0402,
    /// General execution failure.
    ExecutionFailed = 0x0403,
    /// Expected dependency missing.
    DependencyMissing = 0x0404,

    // Stream errors (0x0500 - 0x05FF)
    /// Stream operation in the wrong state.
    StreamState = 0x0500,
    /// Recovery message malformed.
    RecoveryMessage = 0x0501,

    // Buffer errors (0x0600 - 0x06FF)
    /// No buffers bound to the engine.
    BuffersNotBound = 0x0600,
    /// Write past a buffer's capacity.
    BufferOverflow = 0x0601,
    /// Read past the end of a buffer, or bad encoding.
    Decode = 0x0602,

    // Storage errors (0x0700 - 0x07FF)
    /// Storage backend failure.
    Storage = 0x0700,
    /// Saved table file failed its checksum or magic check.
    Corruption = 0x0701,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Catalog",
            0x02 => "Undo",
            0x03 => "Plan",
            0x04 => "Execution",
            0x05 => "Stream",
            0x06 => "Buffer",
            0x07 => "Storage",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Exception type written into the exception buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExceptionType {
    /// Generic engine exception.
    Eee = 1,
    /// SQL-level exception (type mismatch, bad value).
    SqlException = 2,
    /// Constraint violation.
    ConstraintFailure = 3,
    /// Resource exhaustion.
    ResourceExhausted = 4,
    /// Plan fault (unknown fragment, bad plan).
    PlanFault = 5,
    /// Unrecoverable fault; the engine should be recreated.
    Fatal = 6,
}

impl ExceptionType {
    /// Returns the wire value.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a wire value.
    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Eee),
            2 => Some(Self::SqlException),
            3 => Some(Self::ConstraintFailure),
            4 => Some(Self::ResourceExhausted),
            5 => Some(Self::PlanFault),
            6 => Some(Self::Fatal),
            _ => None,
        }
    }

    /// Picks the exception type an error code is reported as.
    #[must_use]
    pub const fn for_code(code: ErrorCode) -> Self {
        match code {
            ErrorCode::ConstraintViolation => Self::ConstraintFailure,
            ErrorCode::TypeMismatch | ErrorCode::ColumnNotFound => Self::SqlException,
            ErrorCode::ResourceExhausted | ErrorCode::BufferOverflow => Self::ResourceExhausted,
            ErrorCode::FragmentNotFound | ErrorCode::PlanInvalid | ErrorCode::TableNotFound => {
                Self::PlanFault
            }
            ErrorCode::Internal | ErrorCode::Corruption => Self::Fatal,
            _ => Self::Eee,
        }
    }
}

/// Result code returned by fragment-execution entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// Execution succeeded and results were written.
    Success,
    /// Execution failed and an exception was written.
    Error,
    /// Execution legitimately produced nothing.
    NoData,
}

impl ResultCode {
    /// Returns the numeric code seen by the caller.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Success => ENGINE_ERRORCODE_SUCCESS,
            Self::Error => ENGINE_ERRORCODE_ERROR,
            Self::NoData => ENGINE_ERRORCODE_NO_DATA,
        }
    }

    /// Returns true for `Success` and `NoData`.
    #[inline]
    #[must_use]
    pub const fn is_ok(self) -> bool {
        !matches!(self, Self::Error)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Error => write!(f, "ERROR"),
            Self::NoData => write!(f, "NO_DATA"),
        }
    }
}
