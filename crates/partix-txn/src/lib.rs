//! # partix-txn
//!
//! Undo-quantum transactions for one partix partition.
//!
//! The caller assigns each transaction (or batch) a 64-bit undo token. Every
//! mutation made while a token is current is recorded in that token's
//! quantum. Releasing a token commits its quanta; undoing a token unwinds
//! them, newest first.
//!
//! # Quantum states
//!
//! ```text
//!              set_undo_token(t)
//! ┌───────┐ ─────────────────────▶ ┌────────────┐ ◀──┐ set_undo_token(t' >= t)
//! │ Unset │                        │ Active(t)  │ ───┘
//! └───────┘                        └────────────┘
//!  records                           │        ▲
//!  discarded        release(>= t) /  │        │ set_undo_token(t' >= last)
//!                   undo(any)        ▼        │
//!                                  ┌────────────┐
//!                                  │    Idle    │  records rejected
//!                                  └────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use partix_common::UndoToken;
//! use partix_txn::UndoLog;
//!
//! let mut log: UndoLog<&str> = UndoLog::new();
//! log.set_undo_token(UndoToken::new(1)).unwrap();
//! log.record("insert a").unwrap();
//! log.record("insert b").unwrap();
//!
//! let mut undone = Vec::new();
//! log.undo(UndoToken::new(1), |action| undone.push(action));
//! assert_eq!(undone, vec!["insert b", "insert a"]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;

/// Undo log and quanta.
///
/// This module provides:
/// - [`undo::UndoLog`]: the per-partition undo log
/// - [`undo::UndoQuantum`]: the records attached to one token
/// - [`undo::QuantumState`]: which quantum, if any, is current
pub mod undo;

pub use error::{UndoError, UndoResult};
pub use undo::{QuantumState, UndoLog, UndoQuantum, UndoStats};
