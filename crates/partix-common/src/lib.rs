//! # partix-common
//!
//! Common types, codes, and configuration for partix.
//!
//! This crate provides the foundational types shared by every partix
//! engine crate. It includes:
//!
//! - **Types**: Identifiers that cross the engine boundary (`TableId`,
//!   `FragmentId`, `DependencyId`, `UndoToken`, `TxnId`, `CatalogVersion`)
//! - **Errors**: Stable `ErrorCode`s, `ExceptionType`s and `ResultCode`s
//! - **Config**: `EngineConfig` for one partition's engine
//! - **Constants**: Result codes, limits and storage defaults
//!
//! ## Example
//!
//! ```rust
//! use partix_common::types::{TableId, UndoToken};
//! use partix_common::ResultCode;
//!
//! let table = TableId::from_position(0);
//! assert_eq!(table.as_i32(), 1);
//! assert!(UndoToken::NO_OP.is_no_op());
//! assert_eq!(ResultCode::NoData.as_i32(), 102);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::{BackendConfig, EngineConfig};
pub use constants::*;
pub use error::{ErrorCode, ExceptionType, ResultCode};
pub use types::{CatalogVersion, DependencyId, FragmentId, TableId, TxnId, UndoToken};
