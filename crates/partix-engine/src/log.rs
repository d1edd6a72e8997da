//! Per-mutation log records.
//!
//! ```text
//! u8 op │ i64 txn_id │ i64 undo_token │ u32 name_len │ name │ tuple
//! ```
//!
//! The tuple is the new image for inserts and updates and the key image
//! for deletes.

use bytes::{Buf, BufMut, BytesMut};
use partix_common::{TxnId, UndoToken};
use partix_exec::{MutationOp, MutationRecord};
use partix_storage::codec::{get_string, get_tuple, put_string, put_tuple};
use partix_storage::{ColumnType, Row, StorageError, StorageResult};

/// One log record.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// What happened.
    pub op: MutationOp,
    /// Transaction that made the change.
    pub txn_id: TxnId,
    /// Undo token of the quantum the change belongs to.
    pub undo_token: UndoToken,
    /// Table name.
    pub table: String,
    /// New image, or the key image for a delete.
    pub image: Row,
}

fn op_code(op: MutationOp) -> u8 {
    match op {
        MutationOp::Insert => 1,
        MutationOp::Delete => 2,
        MutationOp::Update => 3,
    }
}

impl LogRecord {
    /// Wraps a mutation reported by an executor.
    pub fn from_mutation(record: MutationRecord, txn_id: TxnId, undo_token: UndoToken) -> Self {
        Self {
            op: record.op,
            txn_id,
            undo_token,
            table: record.table,
            image: record.image,
        }
    }

    /// Encodes the record.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(1 + 8 + 8 + 4 + self.table.len() + self.image.serialized_size());
        buf.put_u8(op_code(self.op));
        buf.put_i64(self.txn_id.as_i64());
        buf.put_i64(self.undo_token.as_i64());
        put_string(&mut buf, &self.table);
        put_tuple(&mut buf, &self.image);
        buf
    }

    /// Reads one record whose tuple has the given types.
    pub fn read(buf: &mut &[u8], types: &[ColumnType]) -> StorageResult<Self> {
        let (op, txn_id, undo_token, table) = read_header(buf)?;
        let image = get_tuple(buf, types)?;
        Ok(Self {
            op,
            txn_id,
            undo_token,
            table,
            image,
        })
    }

    /// Reads one record, asking `types_for` for the tuple's types once the
    /// table and op are known. When it answers `None` the tuple is skipped
    /// and `None` is returned.
    pub fn read_with<F>(buf: &mut &[u8], types_for: F) -> StorageResult<Option<Self>>
    where
        F: FnOnce(&str, MutationOp) -> Option<Vec<ColumnType>>,
    {
        let (op, txn_id, undo_token, table) = read_header(buf)?;
        let Some(types) = types_for(&table, op) else {
            skip_tuple(buf)?;
            return Ok(None);
        };
        let image = get_tuple(buf, &types)?;
        Ok(Some(Self {
            op,
            txn_id,
            undo_token,
            table,
            image,
        }))
    }
}

fn read_header(buf: &mut &[u8]) -> StorageResult<(MutationOp, TxnId, UndoToken, String)> {
    if buf.remaining() < 17 {
        return Err(StorageError::decode("log record header truncated"));
    }
    let op = match buf.get_u8() {
        1 => MutationOp::Insert,
        2 => MutationOp::Delete,
        3 => MutationOp::Update,
        other => return Err(StorageError::decode(format!("unknown log op {}", other))),
    };
    let txn_id = TxnId::new(buf.get_i64());
    let undo_token = UndoToken::new(buf.get_i64());
    let table = get_string(buf)?;
    Ok((op, txn_id, undo_token, table))
}

fn skip_tuple(buf: &mut &[u8]) -> StorageResult<()> {
    if buf.remaining() < 4 {
        return Err(StorageError::decode("log tuple length truncated"));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(StorageError::decode("log tuple truncated"));
    }
    buf.advance(len);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use partix_storage::row;

    #[test]
    fn test_layout() {
        let record = LogRecord {
            op: MutationOp::Delete,
            txn_id: TxnId::new(9),
            undo_token: UndoToken::new(4),
            table: "T".into(),
            image: row![1],
        };
        let bytes = record.encode();
        assert_eq!(bytes[0], 2);
        assert_eq!(&bytes[1..9], &9i64.to_be_bytes());
        assert_eq!(&bytes[17..21], &1u32.to_be_bytes());
        assert_eq!(bytes[21], b'T');

        let mut buf = &bytes[..];
        assert_eq!(LogRecord::read(&mut buf, &[ColumnType::Integer]).unwrap(), record);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_read_with_skips_unwanted_tuples() {
        let skipped = LogRecord {
            op: MutationOp::Insert,
            txn_id: TxnId::new(1),
            undo_token: UndoToken::new(1),
            table: "GONE".into(),
            image: row![1, "x"],
        };
        let kept = LogRecord {
            table: "T".into(),
            image: row![2],
            ..skipped.clone()
        };
        let mut bytes = skipped.encode();
        bytes.extend_from_slice(&kept.encode());

        let mut buf = &bytes[..];
        let lookup = |table: &str, _: MutationOp| (table == "T").then(|| vec![ColumnType::Integer]);
        assert_eq!(LogRecord::read_with(&mut buf, lookup).unwrap(), None);
        assert_eq!(LogRecord::read_with(&mut buf, lookup).unwrap(), Some(kept));
        assert!(buf.is_empty());
    }
}
