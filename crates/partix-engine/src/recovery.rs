//! Recovery messages.
//!
//! A recovery message carries another partition's mutations into a table
//! here, usually while that table is being streamed. Replayed mutations are
//! not undo-logged; they reach the table's stream contexts as replays, so
//! the streamed image ends up with every replayed row exactly once. They go
//! through the registry like local mutations, so views stay current.
//!
//! ```text
//! u8 kind │ i32 table_id │ u32 count │ tuple × count
//! ```
//!
//! Delete messages carry key tuples; every other kind carries full rows.

use bytes::{Buf, BufMut, BytesMut};
use partix_catalog::{ReplayOp, TableRegistry};
use partix_common::TableId;
use partix_storage::codec::{get_tuple, put_tuple};
use partix_storage::{Row, Table};
use tracing::{info, trace};

use crate::error::{EngineError, EngineResult};

/// What a recovery message does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryKind {
    /// Insert rows.
    Insert,
    /// Replace the rows sharing each row's key.
    Update,
    /// Delete rows by key.
    Delete,
    /// Rows from the source partition's table scan.
    ScanTuples,
    /// The source has sent everything.
    Complete,
}

impl RecoveryKind {
    /// Wire code.
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Insert => 1,
            Self::Update => 2,
            Self::Delete => 3,
            Self::ScanTuples => 4,
            Self::Complete => 5,
        }
    }

    /// Parses a wire code.
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Insert),
            2 => Some(Self::Update),
            3 => Some(Self::Delete),
            4 => Some(Self::ScanTuples),
            5 => Some(Self::Complete),
            _ => None,
        }
    }
}

/// A decoded recovery message.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryMessage {
    /// What to do.
    pub kind: RecoveryKind,
    /// Target table.
    pub table_id: TableId,
    /// Rows, or keys for a delete.
    pub rows: Vec<Row>,
}

impl RecoveryMessage {
    /// Creates a message.
    pub fn new(kind: RecoveryKind, table_id: TableId, rows: Vec<Row>) -> Self {
        Self {
            kind,
            table_id,
            rows,
        }
    }

    /// Encodes the message.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(self.kind.as_u8());
        buf.put_i32(self.table_id.as_i32());
        buf.put_u32(self.rows.len() as u32);
        for row in &self.rows {
            put_tuple(&mut buf, row);
        }
        buf
    }

    /// Reads the kind and table id without decoding tuples.
    pub fn peek(bytes: &[u8]) -> EngineResult<(RecoveryKind, TableId)> {
        let mut buf = bytes;
        if buf.remaining() < 9 {
            return Err(EngineError::recovery("message header truncated"));
        }
        let code = buf.get_u8();
        let kind = RecoveryKind::from_u8(code)
            .ok_or_else(|| EngineError::recovery(format!("unknown message kind {}", code)))?;
        Ok((kind, TableId::new(buf.get_i32())))
    }

    /// Decodes a message addressed to `table`.
    pub fn decode(bytes: &[u8], table: &Table) -> EngineResult<Self> {
        let (kind, table_id) = Self::peek(bytes)?;
        let mut buf = &bytes[5..];
        let count = buf.get_u32() as usize;
        let types = match kind {
            RecoveryKind::Delete => table.schema().key_types(),
            _ => table.schema().types(),
        };
        let rows = (0..count)
            .map(|_| get_tuple(&mut buf, &types))
            .collect::<Result<Vec<_>, _>>()?;
        if buf.has_remaining() {
            return Err(EngineError::recovery(format!(
                "{} trailing bytes after {} tuples",
                buf.remaining(),
                count
            )));
        }
        Ok(Self {
            kind,
            table_id,
            rows,
        })
    }

    /// Applies the message through the registry, so views over the table
    /// are maintained. A message that fails part way leaves the table as it
    /// was. Returns the rows affected.
    pub fn apply(self, registry: &mut TableRegistry) -> EngineResult<usize> {
        let name = registry
            .name_of(self.table_id)
            .map(str::to_string)
            .ok_or(EngineError::TableNotFound { id: self.table_id })?;
        let op = match self.kind {
            RecoveryKind::Insert | RecoveryKind::ScanTuples => ReplayOp::Insert,
            RecoveryKind::Update => ReplayOp::Update,
            RecoveryKind::Delete => ReplayOp::Delete,
            RecoveryKind::Complete => {
                let rows = registry.by_name(&name).map_or(0, Table::len);
                info!(table = %name, rows, "recovery complete");
                return Ok(0);
            }
        };
        let count = registry.replay(&name, op, self.rows)?;
        trace!(table = %name, kind = ?self.kind, count, "recovery message applied");
        Ok(count)
    }
}
