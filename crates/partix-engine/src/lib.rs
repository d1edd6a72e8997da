//! # partix-engine
//!
//! The per-partition execution engine.
//!
//! One [`ExecutionEngine`] owns a partition's tables and serves one caller
//! at a time. The caller loads a catalog, binds its buffers, and then drives
//! transactions: set an undo token, run fragments, release or undo the
//! token. Snapshot and recovery streams, stats, export, read/write set
//! tracking and log replay are driven through the same object between
//! fragment executions.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         ExecutionEngine                          │
//! │                                │                                 │
//! │     ┌──────────────────────────┼──────────────────────────┐      │
//! │     ▼                          ▼                          ▼      │
//! │ ┌──────────────┐      ┌─────────────────┐      ┌──────────────┐  │
//! │ │CatalogManager│      │   Dispatcher    │      │   UndoLog    │  │
//! │ │              │◄─────│                 │─────►│              │  │
//! │ │ - registry   │      │ - FragmentCache │      │ - quanta     │  │
//! │ │ - fragments  │      │ - dependencies  │      │ - state      │  │
//! │ └──────────────┘      └─────────────────┘      └──────────────┘  │
//! │        │                       │                                 │
//! │        ▼                       ▼                                 │
//! │ ┌──────────────────┐   ┌─────────────────────────────────────┐   │
//! │ │TableStreamManager│   │              BufferSet              │   │
//! │ │ StatsAgent       │   │ parameters │ result │ exception │ log│   │
//! │ │ ExportCoordinator│   └─────────────────────────────────────┘   │
//! │ └──────────────────┘                   │                         │
//! │                                        ▼                         │
//! │                              dyn StorageBackend                  │
//! │                     (saved tables, log records, evicted blocks)  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use partix_common::{EngineConfig, FragmentId, ResultCode, UndoToken};
//! use partix_engine::{BufferSet, ExecutionEngine};
//! use partix_exec::ExecutionRequest;
//! use partix_storage::Value;
//!
//! let catalog = br#"{
//!     "version": 1,
//!     "cluster": "cluster",
//!     "database": {
//!         "name": "db",
//!         "tables": [{"name": "T", "columns": [
//!             {"name": "id", "type": "integer", "nullable": false},
//!             {"name": "name", "type": "varchar", "nullable": true}
//!         ], "primary_key": ["id"]}],
//!         "fragments": [{"id": 1, "plan": {"type": "send", "input": {
//!             "type": "insert", "table": "T",
//!             "rows": [[{"kind": "param", "index": 0}, {"kind": "param", "index": 1}]]
//!         }}}]
//!     }
//! }"#;
//!
//! let mut engine = ExecutionEngine::new(EngineConfig::default()).unwrap();
//! engine.load_catalog(catalog).unwrap();
//! engine.set_buffers(BufferSet::with_capacity(64 * 1024));
//! engine.reset_reused_result_output_buffer(0).unwrap();
//!
//! engine.set_undo_token(UndoToken::new(1)).unwrap();
//! let params = [Value::Integer(1), Value::varchar("a")];
//! let code = engine.execute_query(&ExecutionRequest::new(FragmentId::new(1), &params));
//! assert_eq!(code, ResultCode::Success);
//!
//! engine.undo_undo_token(UndoToken::new(1));
//! assert!(engine.get_table_by_name("T").unwrap().is_empty());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffers;
pub mod engine;
pub mod error;
pub mod exception;
pub mod export;
pub mod log;
pub mod recovery;
pub mod stats;
pub mod stream;

pub use buffers::{BufferSet, OutputBuffer};
pub use engine::{hashinate, ExecutionEngine};
pub use error::{EngineError, EngineResult, Region};
pub use exception::SerializableException;
pub use export::{ExportActions, ExportCoordinator, ExportStats};
pub use log::LogRecord;
pub use recovery::{RecoveryKind, RecoveryMessage};
pub use stats::{EngineCounters, StatsAgent, StatsSelector};
pub use stream::{StreamStats, TableStreamManager};
