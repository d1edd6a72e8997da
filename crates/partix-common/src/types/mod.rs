//! Type definitions for partix.
//!
//! This module contains the identifier types shared by every engine crate.

mod ids;

pub use ids::{CatalogVersion, DependencyId, FragmentId, TableId, TxnId, UndoToken};
