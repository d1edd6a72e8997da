//! # partix-exec
//!
//! Plan fragments and their execution.
//!
//! A fragment is a tree of plan nodes stored in the catalog as JSON. The
//! first execution compiles it into an [`ExecutorVector`]: one executor per
//! node, in post-order, with every table and column resolved. Vectors are
//! cached per fragment and tagged with the catalog version they were built
//! against; a newer catalog makes the next lookup recompile.
//!
//! ```text
//!   ParameterSet ──► Dispatcher ──► FragmentCache ──► ExecutorVector
//!                        │                                 │
//!                        │          ExecutorContext ◄──────┘
//!                        │        (registry, undo, deps)
//!                        ▼
//!                  FragmentOutcome ──► DependencyStore (out_dep)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use partix_exec::{Expr, PlanNode};
//!
//! let plan = PlanNode::Send {
//!     input: Box::new(PlanNode::SeqScan {
//!         table: "T".into(),
//!         predicate: Some(Expr::eq(Expr::column("id"), Expr::param(0))),
//!         projection: None,
//!     }),
//! };
//! assert_eq!(plan.node_count(), 2);
//! assert_eq!(plan.tables(), vec!["T"]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod dependency;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod expr;
pub mod params;
pub mod plan;
pub mod tracker;
pub mod vector;

pub use cache::{CacheStats, CachedVector, FragmentCache};
pub use dependency::DependencyStore;
pub use dispatcher::{DispatchStats, Dispatcher, ExecutionRequest, FragmentOutcome};
pub use error::{ExecError, ExecResult};
pub use executor::{Executor, ExecutorContext, MutationOp, MutationRecord, MODIFIED_TUPLES_COLUMN};
pub use expr::{BoundExpr, CompareOp, Expr};
pub use params::{FragmentBatch, FragmentRequest, ParameterSet};
pub use plan::{Assignment, PlanNode};
pub use tracker::{ReadWriteSet, TrackerManager};
pub use vector::ExecutorVector;
