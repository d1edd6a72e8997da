//! Catalog error types.

use partix_common::{CatalogVersion, ErrorCode};
use partix_storage::StorageError;
use thiserror::Error;

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors raised while loading, updating or using the catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Payload could not be parsed.
    #[error("malformed catalog payload: {reason}")]
    Malformed {
        /// Parser message.
        reason: String,
    },

    /// Payload parsed but is internally inconsistent.
    #[error("invalid catalog: {reason}")]
    Invalid {
        /// What is inconsistent.
        reason: String,
    },

    /// Update version is not the current version plus one.
    #[error("catalog version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version the update must carry.
        expected: CatalogVersion,
        /// Version it carried.
        found: CatalogVersion,
    },

    /// Update before any catalog was loaded.
    #[error("no catalog loaded")]
    NotLoaded,

    /// Table name not registered.
    #[error("table {name} not found")]
    TableNotFound {
        /// Table name.
        name: String,
    },

    /// A view's destination does not match its source.
    #[error("materialized view {view} has no row for group {key}")]
    ViewInconsistent {
        /// Destination table.
        view: String,
        /// Group key.
        key: String,
    },

    /// Error from a table.
    #[error(transparent)]
    Storage {
        /// Underlying storage error.
        #[from]
        source: StorageError,
    },
}

impl CatalogError {
    /// Creates an invalid-catalog error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    /// Creates a malformed-payload error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Returns the stable code of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Malformed { .. } | Self::Invalid { .. } | Self::NotLoaded => {
                ErrorCode::CatalogInvalid
            }
            Self::VersionMismatch { .. } => ErrorCode::VersionMismatch,
            Self::TableNotFound { .. } => ErrorCode::TableNotFound,
            Self::ViewInconsistent { .. } => ErrorCode::Internal,
            Self::Storage { source } => source.code(),
        }
    }
}
