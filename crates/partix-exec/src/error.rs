//! Execution error types.

use partix_catalog::CatalogError;
use partix_common::{DependencyId, ErrorCode, FragmentId};
use partix_storage::StorageError;
use partix_txn::UndoError;
use thiserror::Error;

/// Result type for plan initialization and execution.
pub type ExecResult<T> = Result<T, ExecError>;

/// Errors raised while building or running executor vectors.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Fragment id not present in the catalog.
    #[error("plan fragment {id} not found")]
    FragmentNotFound {
        /// Fragment id.
        id: FragmentId,
    },

    /// Plan tree is malformed or references unknown tables or columns.
    #[error("plan initialization failed: {reason}")]
    PlanInit {
        /// What is wrong.
        reason: String,
    },

    /// Receive node found no input dependency.
    #[error("input dependency {id} not available")]
    DependencyMissing {
        /// Dependency id.
        id: DependencyId,
    },

    /// Parameter index out of range.
    #[error("parameter {index} requested but only {count} supplied")]
    ParamMissing {
        /// Requested index.
        index: usize,
        /// Parameters supplied.
        count: usize,
    },

    /// Operands cannot be combined.
    #[error("type mismatch: {reason}")]
    TypeMismatch {
        /// What did not match.
        reason: String,
    },

    /// Parameter or batch bytes could not be decoded.
    #[error("decode error: {reason}")]
    Decode {
        /// What could not be decoded.
        reason: String,
    },

    /// Undo log refused a mutation.
    #[error(transparent)]
    Undo {
        /// Underlying undo error.
        #[from]
        source: UndoError,
    },

    /// Registry error.
    #[error(transparent)]
    Catalog {
        /// Underlying catalog error.
        #[from]
        source: CatalogError,
    },

    /// Table or codec error.
    #[error(transparent)]
    Storage {
        /// Underlying storage error.
        #[from]
        source: StorageError,
    },
}

impl ExecError {
    /// Creates a plan initialization error.
    pub fn plan(reason: impl Into<String>) -> Self {
        Self::PlanInit {
            reason: reason.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// Returns the stable code of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::FragmentNotFound { .. } => ErrorCode::FragmentNotFound,
            Self::PlanInit { .. } => ErrorCode::PlanInvalid,
            Self::DependencyMissing { .. } => ErrorCode::DependencyMissing,
            Self::ParamMissing { .. } => ErrorCode::InvalidArgument,
            Self::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            Self::Decode { .. } => ErrorCode::Decode,
            Self::Undo { source } => source.code(),
            Self::Catalog { source } => source.code(),
            Self::Storage { source } => source.code(),
        }
    }
}
