//! Plan-node trees.
//!
//! A fragment's plan is a tree of nodes serialized as JSON inside the
//! catalog (or passed ad hoc). Children are held in `input`; the tree is
//! compiled bottom-up into an [`ExecutorVector`](crate::ExecutorVector).

use partix_storage::Column;
use serde::{Deserialize, Serialize};

use crate::error::{ExecError, ExecResult};
use crate::expr::Expr;

/// One column assignment of an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Target column.
    pub column: String,
    /// New value, evaluated against the old row.
    pub value: Expr,
}

/// A plan node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanNode {
    /// Full scan of a persistent table.
    SeqScan {
        /// Table name.
        table: String,
        /// Optional filter.
        #[serde(default)]
        predicate: Option<Expr>,
        /// Optional output columns, by name.
        #[serde(default)]
        projection: Option<Vec<String>>,
    },
    /// Insert literal rows, or every row of `input`.
    Insert {
        /// Table name.
        table: String,
        /// Rows of expressions evaluated with the fragment's parameters.
        #[serde(default)]
        rows: Vec<Vec<Expr>>,
        /// Child producing rows to insert.
        #[serde(default)]
        input: Option<Box<PlanNode>>,
    },
    /// Update matching rows in place.
    Update {
        /// Table name.
        table: String,
        /// Optional filter.
        #[serde(default)]
        predicate: Option<Expr>,
        /// Column assignments.
        assignments: Vec<Assignment>,
    },
    /// Delete matching rows.
    Delete {
        /// Table name.
        table: String,
        /// Optional filter.
        #[serde(default)]
        predicate: Option<Expr>,
    },
    /// Reads the fragment's input dependency.
    Receive {
        /// Expected columns; empty accepts whatever arrives.
        #[serde(default)]
        columns: Vec<Column>,
    },
    /// Computes output expressions.
    Projection {
        /// Child.
        input: Box<PlanNode>,
        /// Output expressions.
        exprs: Vec<Expr>,
        /// Output column names.
        names: Vec<String>,
    },
    /// Keeps at most `limit` rows after skipping `offset`.
    Limit {
        /// Child.
        input: Box<PlanNode>,
        /// Row limit.
        limit: usize,
        /// Rows to skip.
        #[serde(default)]
        offset: usize,
    },
    /// Marks its input as the fragment's result.
    Send {
        /// Child.
        input: Box<PlanNode>,
    },
}

impl PlanNode {
    /// Parses a plan from its catalog JSON form.
    pub fn from_json(value: &serde_json::Value) -> ExecResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| ExecError::plan(format!("malformed plan: {}", e)))
    }

    /// Parses a serialized ad hoc plan.
    pub fn from_slice(bytes: &[u8]) -> ExecResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ExecError::plan(format!("malformed plan: {}", e)))
    }

    /// Node name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SeqScan { .. } => "SeqScan",
            Self::Insert { .. } => "Insert",
            Self::Update { .. } => "Update",
            Self::Delete { .. } => "Delete",
            Self::Receive { .. } => "Receive",
            Self::Projection { .. } => "Projection",
            Self::Limit { .. } => "Limit",
            Self::Send { .. } => "Send",
        }
    }

    /// The child node, if any.
    pub fn input(&self) -> Option<&PlanNode> {
        match self {
            Self::Insert { input, .. } => input.as_deref(),
            Self::Projection { input, .. } | Self::Limit { input, .. } | Self::Send { input } => {
                Some(input)
            }
            _ => None,
        }
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        1 + self.input().map_or(0, PlanNode::node_count)
    }

    /// Tables whose rows the tree reads. Updates and deletes read the rows
    /// they match.
    pub fn tables_read(&self) -> Vec<&str> {
        self.collect_tables(|n| match n {
            Self::SeqScan { table, .. } | Self::Update { table, .. } | Self::Delete { table, .. } => {
                Some(table.as_str())
            }
            _ => None,
        })
    }

    /// Tables the tree modifies.
    pub fn tables_written(&self) -> Vec<&str> {
        self.collect_tables(|n| match n {
            Self::Insert { table, .. } | Self::Update { table, .. } | Self::Delete { table, .. } => {
                Some(table.as_str())
            }
            _ => None,
        })
    }

    fn collect_tables<'a, F>(&'a self, pick: F) -> Vec<&'a str>
    where
        F: Fn(&'a PlanNode) -> Option<&'a str>,
    {
        let mut out = Vec::new();
        let mut node = Some(self);
        while let Some(n) = node {
            out.extend(pick(n));
            node = n.input();
        }
        out
    }

    /// Names of every table the tree touches.
    pub fn tables(&self) -> Vec<&str> {
        self.collect_tables(|n| match n {
            Self::SeqScan { table, .. }
            | Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. } => Some(table.as_str()),
            _ => None,
        })
    }
}
