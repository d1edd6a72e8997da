//! Engine error types.

use partix_catalog::CatalogError;
use partix_common::{ErrorCode, TableId};
use partix_exec::ExecError;
use partix_storage::StorageError;
use partix_txn::UndoError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Buffer region names, for error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Parameter buffer.
    Parameters,
    /// Result buffer.
    Result,
    /// Exception buffer.
    Exception,
    /// Log buffer.
    Log,
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Parameters => "parameter",
            Self::Result => "result",
            Self::Exception => "exception",
            Self::Log => "log",
        };
        f.write_str(s)
    }
}

/// Errors raised by the engine facade.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Catalog load or update failed.
    #[error(transparent)]
    Catalog {
        /// Underlying error.
        #[from]
        source: CatalogError,
    },

    /// Plan initialization or execution failed.
    #[error(transparent)]
    Exec {
        /// Underlying error.
        #[from]
        source: ExecError,
    },

    /// Undo token handling failed.
    #[error(transparent)]
    Undo {
        /// Underlying error.
        #[from]
        source: UndoError,
    },

    /// Table, codec or backend failure.
    #[error(transparent)]
    Storage {
        /// Underlying error.
        #[from]
        source: StorageError,
    },

    /// A call needed the buffers before any were bound.
    #[error("no buffers are bound")]
    BuffersNotBound,

    /// A write did not fit its buffer.
    #[error("{region} buffer overflow: need {needed} bytes, capacity {capacity}")]
    BufferOverflow {
        /// Region written.
        region: Region,
        /// Bytes the buffer would have held.
        needed: usize,
        /// Buffer capacity.
        capacity: usize,
    },

    /// Table id not present in the registry.
    #[error("table {id} not found")]
    TableNotFound {
        /// Table id.
        id: TableId,
    },

    /// A recovery message could not be applied.
    #[error("recovery message rejected: {reason}")]
    RecoveryMessage {
        /// Why.
        reason: String,
    },

    /// Stream operation invoked in the wrong state.
    #[error("stream error: {reason}")]
    StreamState {
        /// Why.
        reason: String,
    },

    /// A caller-supplied argument is out of range.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Why.
        reason: String,
    },
}

impl EngineError {
    /// Creates a recovery message error.
    pub fn recovery(reason: impl Into<String>) -> Self {
        Self::RecoveryMessage {
            reason: reason.into(),
        }
    }

    /// Creates a stream state error.
    pub fn stream(reason: impl Into<String>) -> Self {
        Self::StreamState {
            reason: reason.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Returns the stable code of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Catalog { source } => source.code(),
            Self::Exec { source } => source.code(),
            Self::Undo { source } => source.code(),
            Self::Storage { source } => source.code(),
            Self::BuffersNotBound => ErrorCode::BuffersNotBound,
            Self::BufferOverflow { .. } => ErrorCode::BufferOverflow,
            Self::TableNotFound { .. } => ErrorCode::TableNotFound,
            Self::RecoveryMessage { .. } => ErrorCode::RecoveryMessage,
            Self::StreamState { .. } => ErrorCode::StreamState,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(EngineError::BuffersNotBound.code(), ErrorCode::BuffersNotBound);
        let err: EngineError = ExecError::plan("x").into();
        assert_eq!(err.code(), ErrorCode::PlanInvalid);
        assert_eq!(
            EngineError::TableNotFound { id: TableId::new(3) }.to_string(),
            "table 3 not found"
        );
    }
}
