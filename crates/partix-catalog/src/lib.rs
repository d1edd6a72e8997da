//! # partix-catalog
//!
//! Catalog lifecycle and the live table registry for one partix partition.
//!
//! This crate provides:
//! - The JSON catalog model (tables, indexes, views, plan fragments)
//! - Incremental diffs and consistency validation
//! - Two-phase load/update with strict version sequencing
//! - `TableRegistry`: tables by id and name, catalog delegates, and the
//!   mutation funnel that maintains count-per-group materialized views
//!
//! ## Example
//!
//! ```rust
//! use partix_catalog::{CatalogManager, SchemaLookup};
//! use partix_common::{CatalogVersion, TableId};
//!
//! let payload = br#"{"version": 1, "cluster": "c", "database": {"name": "db",
//!     "tables": [{"name": "T", "columns": [{"name": "id", "type": "integer"}]}]}}"#;
//!
//! let mut catalog = CatalogManager::new(1024);
//! catalog.load_catalog(payload).unwrap();
//! assert_eq!(catalog.version(), CatalogVersion::new(1));
//! assert_eq!(catalog.registry().table_id("T"), Some(TableId::new(1)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diff;
pub mod error;
pub mod manager;
pub mod model;
pub mod registry;
pub mod validate;
pub mod view;

pub use diff::{CatalogCommand, CatalogDiff};
pub use error::{CatalogError, CatalogResult};
pub use manager::{CatalogManager, CatalogStats, PrepareKind, PreparedCatalog};
pub use model::{CatalogPayload, DatabaseDef, FragmentDef, IndexDef, TableDef, ViewDef};
pub use registry::{CatalogDelegate, DelegateTarget, ReplayOp, SchemaLookup, TableRegistry};
pub use view::MaterializedView;
