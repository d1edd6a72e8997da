//! Error codes shared across the engine boundary.
//!
//! Each crate defines its own error enum; this module holds the stable
//! numeric codes those errors map to when they are serialized into the
//! exception buffer, plus the result codes returned by fragment execution.

mod codes;

pub use codes::{ErrorCode, ExceptionType, ResultCode};
