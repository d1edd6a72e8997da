//! Undo log errors.

use partix_common::{ErrorCode, UndoToken};
use thiserror::Error;

/// Result type for undo log operations.
pub type UndoResult<T> = Result<T, UndoError>;

/// Errors raised by the undo log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UndoError {
    /// A token lower than the last one generated.
    #[error("undo token {token} is lower than the last token {last}")]
    TokenRegression {
        /// The rejected token.
        token: UndoToken,
        /// The most recently generated token.
        last: UndoToken,
    },

    /// A mutation arrived after commit or rollback and before a new token.
    #[error("no active undo quantum (last token {last})")]
    NoActiveQuantum {
        /// The token that was released or undone.
        last: UndoToken,
    },
}

impl UndoError {
    /// Returns the stable code of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TokenRegression { .. } => ErrorCode::TokenRegression,
            Self::NoActiveQuantum { .. } => ErrorCode::NoActiveQuantum,
        }
    }
}
