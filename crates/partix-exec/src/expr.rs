//! Scalar expressions.
//!
//! Plans carry `Expr`, which names columns. Building an executor binds each
//! expression against its input columns, producing a `BoundExpr` that
//! addresses columns by position.

use std::cmp::Ordering;
use std::fmt;

use partix_storage::{Column, ColumnType, Row, Value};
use serde::{Deserialize, Serialize};

use crate::error::{ExecError, ExecResult};

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// An unbound expression as it appears in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    /// Column by name.
    Column {
        /// Column name.
        name: String,
    },
    /// Fragment parameter by position.
    Param {
        /// Zero-based index.
        index: usize,
    },
    /// Constant.
    Literal {
        /// The value.
        value: Value,
    },
    /// Comparison.
    Compare {
        /// Operator.
        op: CompareOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Logical AND.
    And {
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Logical OR.
    Or {
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Logical NOT.
    Not {
        /// Operand.
        expr: Box<Expr>,
    },
    /// `IS NULL`.
    IsNull {
        /// Operand.
        expr: Box<Expr>,
    },
}

impl Expr {
    /// Column reference.
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column { name: name.into() }
    }

    /// Parameter reference.
    pub fn param(index: usize) -> Self {
        Self::Param { index }
    }

    /// Constant.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    /// Comparison.
    pub fn compare(op: CompareOp, left: Expr, right: Expr) -> Self {
        Self::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Equality.
    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::compare(CompareOp::Eq, left, right)
    }

    /// Binds column names to positions in `columns`.
    pub fn bind(&self, columns: &[Column]) -> ExecResult<BoundExpr> {
        let bind = |e: &Expr| e.bind(columns).map(Box::new);
        Ok(match self {
            Self::Column { name } => {
                let index = columns
                    .iter()
                    .position(|c| &c.name == name)
                    .ok_or_else(|| ExecError::plan(format!("unknown column {}", name)))?;
                BoundExpr::Column(index, columns[index].column_type)
            }
            Self::Param { index } => BoundExpr::Param(*index),
            Self::Literal { value } => BoundExpr::Literal(value.clone()),
            Self::Compare { op, left, right } => BoundExpr::Compare(*op, bind(left)?, bind(right)?),
            Self::And { left, right } => BoundExpr::And(bind(left)?, bind(right)?),
            Self::Or { left, right } => BoundExpr::Or(bind(left)?, bind(right)?),
            Self::Not { expr } => BoundExpr::Not(bind(expr)?),
            Self::IsNull { expr } => BoundExpr::IsNull(bind(expr)?),
        })
    }
}

/// An expression bound to input column positions.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundExpr {
    /// Input column and its type.
    Column(usize, ColumnType),
    /// Parameter.
    Param(usize),
    /// Constant.
    Literal(Value),
    /// Comparison.
    Compare(CompareOp, Box<BoundExpr>, Box<BoundExpr>),
    /// Logical AND.
    And(Box<BoundExpr>, Box<BoundExpr>),
    /// Logical OR.
    Or(Box<BoundExpr>, Box<BoundExpr>),
    /// Logical NOT.
    Not(Box<BoundExpr>),
    /// `IS NULL`.
    IsNull(Box<BoundExpr>),
}

impl BoundExpr {
    /// Evaluates against a row. NULL propagates through comparisons and
    /// logic follows three-valued rules.
    pub fn eval(&self, row: &Row, params: &[Value]) -> ExecResult<Value> {
        match self {
            Self::Column(index, _) => Ok(row.get(*index).cloned().unwrap_or(Value::Null)),
            Self::Param(index) => params.get(*index).cloned().ok_or(ExecError::ParamMissing {
                index: *index,
                count: params.len(),
            }),
            Self::Literal(value) => Ok(value.clone()),
            Self::Compare(op, left, right) => {
                let (l, r) = (left.eval(row, params)?, right.eval(row, params)?);
                if l.is_null() || r.is_null() {
                    return Ok(Value::Null);
                }
                if !l.comparable_with(&r) {
                    return Err(ExecError::TypeMismatch {
                        reason: format!("cannot compare {} {} {}", l, op, r),
                    });
                }
                Ok(Value::Boolean(op.holds(l.cmp(&r))))
            }
            Self::And(left, right) => {
                let l = truth(&left.eval(row, params)?)?;
                if l == Some(false) {
                    return Ok(Value::Boolean(false));
                }
                let r = truth(&right.eval(row, params)?)?;
                Ok(match (l, r) {
                    (_, Some(false)) => Value::Boolean(false),
                    (Some(true), Some(true)) => Value::Boolean(true),
                    _ => Value::Null,
                })
            }
            Self::Or(left, right) => {
                let l = truth(&left.eval(row, params)?)?;
                if l == Some(true) {
                    return Ok(Value::Boolean(true));
                }
                let r = truth(&right.eval(row, params)?)?;
                Ok(match (l, r) {
                    (_, Some(true)) => Value::Boolean(true),
                    (Some(false), Some(false)) => Value::Boolean(false),
                    _ => Value::Null,
                })
            }
            Self::Not(expr) => Ok(match truth(&expr.eval(row, params)?)? {
                Some(b) => Value::Boolean(!b),
                None => Value::Null,
            }),
            Self::IsNull(expr) => Ok(Value::Boolean(expr.eval(row, params)?.is_null())),
        }
    }

    /// Evaluates as a filter: only TRUE passes.
    pub fn matches(&self, row: &Row, params: &[Value]) -> ExecResult<bool> {
        Ok(truth(&self.eval(row, params)?)? == Some(true))
    }

    /// Result type, looking at parameter values where the plan cannot say.
    pub fn result_type(&self, params: &[Value]) -> ColumnType {
        match self {
            Self::Column(_, ty) => *ty,
            Self::Param(index) => params
                .get(*index)
                .and_then(Value::column_type)
                .unwrap_or(ColumnType::Varchar),
            Self::Literal(value) => value.column_type().unwrap_or(ColumnType::Varchar),
            Self::Compare(..) | Self::And(..) | Self::Or(..) | Self::Not(_) | Self::IsNull(_) => {
                ColumnType::Boolean
            }
        }
    }
}

fn truth(value: &Value) -> ExecResult<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Boolean(b) => Ok(Some(*b)),
        other => Err(ExecError::TypeMismatch {
            reason: format!("{} is not a boolean", other),
        }),
    }
}
