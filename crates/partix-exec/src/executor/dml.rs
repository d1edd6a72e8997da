//! Table-mutating executors.
//!
//! Every mutation first checks that the undo log can take its records, then
//! goes through the registry so materialized views follow along, then
//! records the returned undo actions.

use partix_common::TableId;
use partix_storage::{Column, Row, RowId, TempTable};

use super::{modified_table, Executor, ExecutorContext, MutationOp};
use crate::error::ExecResult;
use crate::expr::BoundExpr;

/// Inserts literal rows or the rows of its child.
#[derive(Debug)]
pub struct InsertExec {
    table: String,
    table_id: TableId,
    rows: Vec<Vec<BoundExpr>>,
    columns: Vec<Column>,
}

impl InsertExec {
    /// Creates an insert. `rows` is empty when the child supplies rows.
    pub fn new(table: String, table_id: TableId, rows: Vec<Vec<BoundExpr>>, columns: Vec<Column>) -> Self {
        Self {
            table,
            table_id,
            rows,
            columns,
        }
    }

    fn insert(&self, ctx: &mut ExecutorContext<'_>, row: Row) -> ExecResult<()> {
        ctx.undo.check_active()?;
        let image = ctx.mutations.is_some().then(|| row.clone());
        let actions = ctx.registry.insert(&self.table, ctx.txn_id, row)?;
        ctx.record(actions)?;
        if let Some(image) = image {
            ctx.log_mutation(MutationOp::Insert, &self.table, image);
        }
        ctx.tuples_modified += 1;
        Ok(())
    }
}

impl Executor for InsertExec {
    fn name(&self) -> &'static str {
        "Insert"
    }

    fn output_columns(&self) -> &[Column] {
        &self.columns
    }

    fn execute(&self, ctx: &mut ExecutorContext<'_>, input: Option<TempTable>) -> ExecResult<TempTable> {
        ctx.table(&self.table, self.table_id)?;
        let mut count = 0u64;
        if let Some(input) = input {
            for row in input.into_rows() {
                self.insert(ctx, row)?;
                count += 1;
            }
        }
        for exprs in &self.rows {
            let empty = Row::default();
            let values = exprs
                .iter()
                .map(|e| e.eval(&empty, ctx.params))
                .collect::<ExecResult<Vec<_>>>()?;
            self.insert(ctx, Row::new(values))?;
            count += 1;
        }
        modified_table(&self.columns, count, &mut ctx.temp)
    }
}

/// Column assignment bound to a position.
#[derive(Debug)]
pub struct BoundAssignment {
    /// Target column position.
    pub column: usize,
    /// New value, evaluated against the old row.
    pub value: BoundExpr,
}

/// Updates matching rows in place.
#[derive(Debug)]
pub struct UpdateExec {
    table: String,
    table_id: TableId,
    predicate: Option<BoundExpr>,
    assignments: Vec<BoundAssignment>,
    columns: Vec<Column>,
}

impl UpdateExec {
    /// Creates an update.
    pub fn new(
        table: String,
        table_id: TableId,
        predicate: Option<BoundExpr>,
        assignments: Vec<BoundAssignment>,
        columns: Vec<Column>,
    ) -> Self {
        Self {
            table,
            table_id,
            predicate,
            assignments,
            columns,
        }
    }
}

impl Executor for UpdateExec {
    fn name(&self) -> &'static str {
        "Update"
    }

    fn output_columns(&self) -> &[Column] {
        &self.columns
    }

    fn execute(&self, ctx: &mut ExecutorContext<'_>, _input: Option<TempTable>) -> ExecResult<TempTable> {
        let targets = matching_rows(ctx, &self.table, self.table_id, self.predicate.as_ref())?;
        let mut updates = Vec::with_capacity(targets.len());
        for (row_id, old) in targets {
            let mut new = old.clone();
            for assignment in &self.assignments {
                new.set(assignment.column, assignment.value.eval(&old, ctx.params)?);
            }
            updates.push((row_id, new));
        }

        let count = updates.len() as u64;
        for (row_id, new) in updates {
            ctx.undo.check_active()?;
            let image = ctx.mutations.is_some().then(|| new.clone());
            let actions = ctx.registry.update(&self.table, row_id, new)?;
            ctx.record(actions)?;
            if let Some(image) = image {
                ctx.log_mutation(MutationOp::Update, &self.table, image);
            }
            ctx.tuples_modified += 1;
        }
        modified_table(&self.columns, count, &mut ctx.temp)
    }
}

/// Deletes matching rows.
#[derive(Debug)]
pub struct DeleteExec {
    table: String,
    table_id: TableId,
    predicate: Option<BoundExpr>,
    columns: Vec<Column>,
}

impl DeleteExec {
    /// Creates a delete.
    pub fn new(table: String, table_id: TableId, predicate: Option<BoundExpr>, columns: Vec<Column>) -> Self {
        Self {
            table,
            table_id,
            predicate,
            columns,
        }
    }
}

impl Executor for DeleteExec {
    fn name(&self) -> &'static str {
        "Delete"
    }

    fn output_columns(&self) -> &[Column] {
        &self.columns
    }

    fn execute(&self, ctx: &mut ExecutorContext<'_>, _input: Option<TempTable>) -> ExecResult<TempTable> {
        let targets = matching_rows(ctx, &self.table, self.table_id, self.predicate.as_ref())?;
        let count = targets.len() as u64;
        for (row_id, old) in targets {
            ctx.undo.check_active()?;
            let key = match ctx.mutations {
                Some(_) => Some(ctx.registry.table_named(&self.table)?.schema().key_of(&old)),
                None => None,
            };
            let actions = ctx.registry.delete(&self.table, row_id)?;
            ctx.record(actions)?;
            if let Some(key) = key {
                ctx.log_mutation(MutationOp::Delete, &self.table, key);
            }
            ctx.tuples_modified += 1;
        }
        modified_table(&self.columns, count, &mut ctx.temp)
    }
}

/// Collects matches before mutating so the scan never sees its own writes.
fn matching_rows(
    ctx: &ExecutorContext<'_>,
    name: &str,
    id: TableId,
    predicate: Option<&BoundExpr>,
) -> ExecResult<Vec<(RowId, Row)>> {
    let table = ctx.table(name, id)?;
    let mut out = Vec::new();
    for (row_id, row) in table.iter() {
        let hit = match predicate {
            Some(p) => p.matches(row, ctx.params)?,
            None => true,
        };
        if hit {
            out.push((row_id, row.clone()));
        }
    }
    Ok(out)
}
