//! Table-level undo actions.
//!
//! Every undo-logged mutation produces one `UndoAction` holding what is
//! needed to reverse it. Actions name their table rather than holding a
//! reference, so they stay valid across catalog updates. Each also carries
//! the table's incarnation; the registry skips an action whose table was
//! dropped, or dropped and re-created under the same name.

use crate::error::StorageResult;
use crate::row::Row;
use crate::table::{RowId, Table};

/// Reverses one table mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoAction {
    /// Undo an insert by deleting the row.
    Insert {
        table: String,
        incarnation: u64,
        row_id: RowId,
    },
    /// Undo a delete by putting the row back in its slot.
    Delete {
        table: String,
        incarnation: u64,
        row_id: RowId,
        row: Row,
    },
    /// Undo an update by restoring the old image.
    Update {
        table: String,
        incarnation: u64,
        row_id: RowId,
        old: Row,
    },
    /// Undo an export append by truncating the pending region.
    ExportAppend {
        table: String,
        incarnation: u64,
        mark: usize,
    },
}

impl UndoAction {
    /// Name of the table the action applies to.
    pub fn table(&self) -> &str {
        match self {
            Self::Insert { table, .. }
            | Self::Delete { table, .. }
            | Self::Update { table, .. }
            | Self::ExportAppend { table, .. } => table,
        }
    }

    /// Incarnation of the table the mutation was made on.
    pub fn incarnation(&self) -> u64 {
        match self {
            Self::Insert { incarnation, .. }
            | Self::Delete { incarnation, .. }
            | Self::Update { incarnation, .. }
            | Self::ExportAppend { incarnation, .. } => *incarnation,
        }
    }

    /// Reverses the mutation on `table`.
    pub fn apply(self, table: &mut Table) -> StorageResult<()> {
        match self {
            Self::Insert { row_id, .. } => table.delete(row_id).map(|_| ()),
            Self::Delete { row_id, row, .. } => table.restore(row_id, row),
            Self::Update { row_id, old, .. } => table.update(row_id, old).map(|_| ()),
            Self::ExportAppend { mark, .. } => {
                table.truncate_export(mark);
                Ok(())
            }
        }
    }
}
