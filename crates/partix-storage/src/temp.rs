//! Temp tables for intermediate and result data.

use bytes::BufMut;

use crate::codec::{put_table, DecodedTable};
use crate::error::{StorageError, StorageResult};
use crate::row::Row;
use crate::schema::Column;

/// Memory accounting shared by every temp table of one fragment execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempLimit {
    used: usize,
    limit: usize,
}

impl TempLimit {
    /// Creates a limit of `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self { used: 0, limit }
    }

    /// Charges `bytes` against the limit.
    pub fn charge(&mut self, bytes: usize) -> StorageResult<()> {
        let used = self.used.saturating_add(bytes);
        if used > self.limit {
            return Err(StorageError::ResourceExhausted {
                used,
                limit: self.limit,
            });
        }
        self.used = used;
        Ok(())
    }

    /// Bytes charged so far.
    pub fn used(&self) -> usize {
        self.used
    }

    /// The limit in bytes.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// An in-memory table without indexes or undo.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TempTable {
    columns: Vec<Column>,
    rows: Vec<Row>,
    bytes: usize,
}

impl TempTable {
    /// Creates an empty temp table.
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            bytes: 0,
        }
    }

    /// Appends a row, charging its size to `limit`.
    pub fn push(&mut self, row: Row, limit: &mut TempLimit) -> StorageResult<()> {
        let size = row.serialized_size();
        limit.charge(size)?;
        self.bytes += size;
        self.rows.push(row);
        Ok(())
    }

    /// Returns the columns.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the rows.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Consumes the table and returns its rows.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Bytes held by the rows.
    pub fn byte_size(&self) -> usize {
        self.bytes
    }

    /// Writes the table in serialized-table format.
    pub fn serialize<B: BufMut>(&self, buf: &mut B) {
        put_table(buf, &self.columns, &self.rows);
    }
}

impl From<DecodedTable> for TempTable {
    fn from(decoded: DecodedTable) -> Self {
        let bytes = decoded.rows.iter().map(Row::serialized_size).sum();
        Self {
            columns: decoded.columns,
            rows: decoded.rows,
            bytes,
        }
    }
}
