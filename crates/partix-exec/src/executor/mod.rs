//! Executors and their per-call context.
//!
//! Each plan node compiles into one executor. An executor consumes the
//! output of its child (if it has one) and produces a temp table. DML
//! executors mutate tables only through the registry's mutation funnel and
//! record every undo action in the current quantum.

mod dml;
mod ops;
mod scan;

use std::fmt;

use partix_catalog::{SchemaLookup, TableRegistry};
use partix_common::{DependencyId, TableId, TxnId};
use partix_storage::{Column, ColumnType, Row, Table, TempLimit, TempTable, UndoAction, Value};
use partix_txn::UndoLog;

use crate::dependency::DependencyStore;
use crate::error::{ExecError, ExecResult};

pub use dml::{BoundAssignment, DeleteExec, InsertExec, UpdateExec};
pub use ops::{LimitExec, ProjectionExec, SendExec};
pub use scan::{ReceiveExec, SeqScanExec};

/// Name of the single column DML executors report.
pub const MODIFIED_TUPLES_COLUMN: &str = "modified_tuples";

/// An executable plan node.
pub trait Executor: fmt::Debug {
    /// Node name for diagnostics.
    fn name(&self) -> &'static str;

    /// Output columns, with types as far as they are known before execution.
    fn output_columns(&self) -> &[Column];

    /// Runs the node over its child's output.
    fn execute(&self, ctx: &mut ExecutorContext<'_>, input: Option<TempTable>)
        -> ExecResult<TempTable>;
}

/// Kind of a logged table mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    /// Row inserted.
    Insert,
    /// Row deleted.
    Delete,
    /// Row replaced.
    Update,
}

/// A table mutation as reported to the log buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    /// What happened.
    pub op: MutationOp,
    /// Table name.
    pub table: String,
    /// New image, or the key image for a delete.
    pub image: Row,
}

/// State shared by the executors of one fragment execution.
pub struct ExecutorContext<'a> {
    /// Live tables.
    pub registry: &'a mut TableRegistry,
    /// Undo log receiving every table mutation.
    pub undo: &'a mut UndoLog<UndoAction>,
    /// Batch dependencies.
    pub dependencies: &'a mut DependencyStore,
    /// Fragment parameters.
    pub params: &'a [Value],
    /// Executing transaction.
    pub txn_id: TxnId,
    /// Highest transaction known committed.
    pub last_committed: TxnId,
    /// Dependency `Receive` reads.
    pub input_dep: DependencyId,
    /// Temp-table memory accounting.
    pub temp: TempLimit,
    /// Rows inserted, updated or deleted so far.
    pub tuples_modified: u64,
    mutations: Option<Vec<MutationRecord>>,
}

impl<'a> ExecutorContext<'a> {
    /// Creates a context with an unlimited temp budget.
    pub fn new(
        registry: &'a mut TableRegistry,
        undo: &'a mut UndoLog<UndoAction>,
        dependencies: &'a mut DependencyStore,
        params: &'a [Value],
    ) -> Self {
        Self {
            registry,
            undo,
            dependencies,
            params,
            txn_id: TxnId::default(),
            last_committed: TxnId::default(),
            input_dep: DependencyId::NONE,
            temp: TempLimit::new(usize::MAX),
            tuples_modified: 0,
            mutations: None,
        }
    }

    /// Sets the executing and last committed transactions.
    pub fn with_txn(mut self, txn_id: TxnId, last_committed: TxnId) -> Self {
        self.txn_id = txn_id;
        self.last_committed = last_committed;
        self
    }

    /// Sets the input dependency.
    pub fn with_input(mut self, dep: DependencyId) -> Self {
        self.input_dep = dep;
        self
    }

    /// Keeps a record of every mutation for the log buffer.
    pub fn with_mutation_log(mut self) -> Self {
        self.mutations = Some(Vec::new());
        self
    }

    /// Takes the mutation records collected so far.
    pub fn take_mutations(&mut self) -> Vec<MutationRecord> {
        self.mutations.as_mut().map(std::mem::take).unwrap_or_default()
    }

    /// Looks up a table, refusing to run against a table that moved since
    /// the plan was compiled.
    pub(crate) fn table(&self, name: &str, id: TableId) -> ExecResult<&Table> {
        if self.registry.table_id(name) != Some(id) {
            return Err(ExecError::plan(format!(
                "table {} is no longer table {}",
                name, id
            )));
        }
        Ok(self.registry.table_named(name)?)
    }

    /// Records undo actions produced by the mutation funnel.
    pub(crate) fn record(&mut self, actions: Vec<UndoAction>) -> ExecResult<()> {
        for action in actions {
            self.undo.record(action)?;
        }
        Ok(())
    }

    pub(crate) fn log_mutation(&mut self, op: MutationOp, table: &str, image: Row) {
        if let Some(mutations) = self.mutations.as_mut() {
            mutations.push(MutationRecord {
                op,
                table: table.to_string(),
                image,
            });
        }
    }
}

impl fmt::Debug for ExecutorContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorContext")
            .field("params", &self.params.len())
            .field("txn_id", &self.txn_id)
            .field("input_dep", &self.input_dep)
            .field("temp", &self.temp)
            .field("tuples_modified", &self.tuples_modified)
            .finish()
    }
}

/// Columns of a DML executor's output.
pub(crate) fn modified_columns() -> Vec<Column> {
    vec![Column::new(MODIFIED_TUPLES_COLUMN, ColumnType::BigInt).not_null()]
}

/// One-row table holding a modified-tuple count.
pub(crate) fn modified_table(
    columns: &[Column],
    count: u64,
    temp: &mut TempLimit,
) -> ExecResult<TempTable> {
    let mut out = TempTable::new(columns.to_vec());
    out.push(Row::new(vec![Value::BigInt(count as i64)]), temp)?;
    Ok(out)
}
