//! Tuples.
//!
//! Tables, temp tables, stream chunks, recovery messages and log records
//! all move data as `Row`s. Ordering and hashing are by value, so rows can
//! key indexes and stream images directly.

use std::fmt;

use crate::value::Value;

/// An ordered list of column values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Row(Vec<Value>);

impl Row {
    /// Wraps `values`.
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Column count.
    pub fn num_columns(&self) -> usize {
        self.0.len()
    }

    /// Value of column `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Overwrites column `index`. Out-of-range indexes are ignored.
    pub fn set(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = value;
        }
    }

    /// Adds a trailing column.
    pub fn push(&mut self, value: Value) {
        self.0.push(value);
    }

    /// Column values in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    /// The columns at `indices`, in that order. Missing columns read as NULL.
    pub fn project(&self, indices: &[usize]) -> Row {
        Row(indices
            .iter()
            .map(|&i| self.0.get(i).cloned().unwrap_or(Value::Null))
            .collect())
    }

    /// Size of the row as a length-prefixed tuple.
    pub fn serialized_size(&self) -> usize {
        4 + self.0.iter().map(Value::serialized_size).sum::<usize>()
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl IntoIterator for Row {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        let mut first = true;
        for value in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{}", value)?;
        }
        f.write_str(")")
    }
}

/// Builds a row from values convertible into `Value`.
#[macro_export]
macro_rules! row {
    ($($v:expr),* $(,)?) => {
        $crate::Row::new(vec![$($crate::Value::from($v)),*])
    };
}
