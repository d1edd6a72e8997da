//! Leaf executors.

use partix_common::TableId;
use partix_storage::{Column, TempTable};

use super::{Executor, ExecutorContext};
use crate::error::{ExecError, ExecResult};
use crate::expr::BoundExpr;

/// Full scan of a persistent table with an optional filter and projection.
#[derive(Debug)]
pub struct SeqScanExec {
    table: String,
    table_id: TableId,
    predicate: Option<BoundExpr>,
    projection: Option<Vec<usize>>,
    columns: Vec<Column>,
}

impl SeqScanExec {
    /// Creates a scan. `columns` are the output columns after projection.
    pub fn new(
        table: String,
        table_id: TableId,
        predicate: Option<BoundExpr>,
        projection: Option<Vec<usize>>,
        columns: Vec<Column>,
    ) -> Self {
        Self {
            table,
            table_id,
            predicate,
            projection,
            columns,
        }
    }
}

impl Executor for SeqScanExec {
    fn name(&self) -> &'static str {
        "SeqScan"
    }

    fn output_columns(&self) -> &[Column] {
        &self.columns
    }

    fn execute(&self, ctx: &mut ExecutorContext<'_>, _input: Option<TempTable>) -> ExecResult<TempTable> {
        let mut out = TempTable::new(self.columns.clone());
        let mut temp = ctx.temp;
        let table = ctx.table(&self.table, self.table_id)?;
        for (_, row) in table.iter() {
            if let Some(predicate) = &self.predicate {
                if !predicate.matches(row, ctx.params)? {
                    continue;
                }
            }
            let row = match &self.projection {
                Some(indices) => row.project(indices),
                None => row.clone(),
            };
            out.push(row, &mut temp)?;
        }
        ctx.temp = temp;
        Ok(out)
    }
}

/// Reads the fragment's input dependency.
#[derive(Debug)]
pub struct ReceiveExec {
    columns: Vec<Column>,
}

impl ReceiveExec {
    /// Creates a receive node expecting `columns`; empty accepts any shape.
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }
}

impl Executor for ReceiveExec {
    fn name(&self) -> &'static str {
        "Receive"
    }

    fn output_columns(&self) -> &[Column] {
        &self.columns
    }

    fn execute(&self, ctx: &mut ExecutorContext<'_>, _input: Option<TempTable>) -> ExecResult<TempTable> {
        let id = ctx.input_dep;
        let table = ctx
            .dependencies
            .take(id)
            .ok_or(ExecError::DependencyMissing { id })?;
        if !self.columns.is_empty() && table.columns().len() != self.columns.len() {
            return Err(ExecError::TypeMismatch {
                reason: format!(
                    "dependency {} has {} columns, expected {}",
                    id,
                    table.columns().len(),
                    self.columns.len()
                ),
            });
        }
        ctx.temp.charge(table.byte_size())?;
        Ok(table)
    }
}
