//! Row-shaping executors.

use partix_storage::{Column, Row, TempTable};

use super::{Executor, ExecutorContext};
use crate::error::{ExecError, ExecResult};
use crate::expr::BoundExpr;

fn require_input(name: &str, input: Option<TempTable>) -> ExecResult<TempTable> {
    input.ok_or_else(|| ExecError::plan(format!("{} has no input", name)))
}

/// Computes output expressions for every input row.
#[derive(Debug)]
pub struct ProjectionExec {
    exprs: Vec<BoundExpr>,
    columns: Vec<Column>,
}

impl ProjectionExec {
    /// Creates a projection. `columns` carry the names and planned types.
    pub fn new(exprs: Vec<BoundExpr>, columns: Vec<Column>) -> Self {
        Self { exprs, columns }
    }
}

impl Executor for ProjectionExec {
    fn name(&self) -> &'static str {
        "Projection"
    }

    fn output_columns(&self) -> &[Column] {
        &self.columns
    }

    fn execute(&self, ctx: &mut ExecutorContext<'_>, input: Option<TempTable>) -> ExecResult<TempTable> {
        let input = require_input(self.name(), input)?;
        // parameter types are only known now
        let columns = self
            .columns
            .iter()
            .zip(&self.exprs)
            .map(|(c, e)| Column::new(c.name.clone(), e.result_type(ctx.params)))
            .collect();
        let mut out = TempTable::new(columns);
        for row in input.rows() {
            let values = self
                .exprs
                .iter()
                .map(|e| e.eval(row, ctx.params))
                .collect::<ExecResult<Vec<_>>>()?;
            out.push(Row::new(values), &mut ctx.temp)?;
        }
        Ok(out)
    }
}

/// Skips `offset` rows and keeps at most `limit`.
#[derive(Debug)]
pub struct LimitExec {
    limit: usize,
    offset: usize,
    columns: Vec<Column>,
}

impl LimitExec {
    /// Creates a limit over a child producing `columns`.
    pub fn new(limit: usize, offset: usize, columns: Vec<Column>) -> Self {
        Self {
            limit,
            offset,
            columns,
        }
    }
}

impl Executor for LimitExec {
    fn name(&self) -> &'static str {
        "Limit"
    }

    fn output_columns(&self) -> &[Column] {
        &self.columns
    }

    fn execute(&self, ctx: &mut ExecutorContext<'_>, input: Option<TempTable>) -> ExecResult<TempTable> {
        let input = require_input(self.name(), input)?;
        let mut out = TempTable::new(input.columns().to_vec());
        for row in input.into_rows().into_iter().skip(self.offset).take(self.limit) {
            out.push(row, &mut ctx.temp)?;
        }
        Ok(out)
    }
}

/// Marks its input as the fragment's result.
#[derive(Debug)]
pub struct SendExec {
    columns: Vec<Column>,
}

impl SendExec {
    /// Creates a send over a child producing `columns`.
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }
}

impl Executor for SendExec {
    fn name(&self) -> &'static str {
        "Send"
    }

    fn output_columns(&self) -> &[Column] {
        &self.columns
    }

    fn execute(&self, _ctx: &mut ExecutorContext<'_>, input: Option<TempTable>) -> ExecResult<TempTable> {
        require_input(self.name(), input)
    }
}
