//! Append-only export streams.
//!
//! Rows inserted into an export table are serialized and appended to the
//! stream's pending region, tagged with the inserting transaction. Once the
//! transaction is known to be committed they move into the committed region,
//! where a consumer polls them by universal byte offset and acknowledges them
//! to release memory.
//!
//! ```text
//!  released_offset      poll_offset                      committed end
//!        │                   │                                 │
//!        ▼                   ▼                                 ▼
//!        ├───── polled ──────┼────────── pollable ─────────────┤  pending rows
//!        └──────────────────── committed bytes ────────────────┘  (uncommitted)
//! ```

use bytes::{Buf, Bytes, BytesMut};
use partix_common::types::TxnId;

use crate::codec::put_tuple;
use crate::row::Row;

#[derive(Debug, Clone)]
struct PendingRow {
    txn_id: TxnId,
    bytes: Bytes,
}

/// An export stream for one table.
#[derive(Debug, Default)]
pub struct ExportStream {
    pending: Vec<PendingRow>,
    committed: BytesMut,
    released_offset: u64,
    poll_offset: u64,
    seq_no: i64,
    rows_committed: u64,
}

/// One polled block of committed export data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportBlock {
    /// Universal offset of the first byte.
    pub offset: u64,
    /// Serialized tuples.
    pub data: Bytes,
}

impl ExportStream {
    /// Creates an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row for `txn_id`. Returns the mark to truncate back to.
    pub fn append(&mut self, txn_id: TxnId, row: &Row) -> usize {
        let mark = self.pending.len();
        let mut buf = BytesMut::with_capacity(row.serialized_size());
        put_tuple(&mut buf, row);
        self.pending.push(PendingRow {
            txn_id,
            bytes: buf.freeze(),
        });
        mark
    }

    /// Drops pending rows from `mark` onwards.
    pub fn truncate(&mut self, mark: usize) {
        self.pending.truncate(mark);
    }

    /// Moves pending rows of transactions up to `last_committed` into the
    /// committed region. Returns the number of rows moved.
    pub fn commit_through(&mut self, last_committed: TxnId) -> usize {
        let split = self
            .pending
            .iter()
            .position(|r| r.txn_id > last_committed)
            .unwrap_or(self.pending.len());
        for row in self.pending.drain(..split) {
            self.committed.extend_from_slice(&row.bytes);
        }
        self.rows_committed += split as u64;
        split
    }

    /// Releases committed bytes below `offset`.
    pub fn ack(&mut self, offset: u64) {
        let end = self.end_offset();
        let offset = offset.min(end);
        if offset <= self.released_offset {
            return;
        }
        let released = (offset - self.released_offset) as usize;
        self.committed.advance(released);
        self.released_offset = offset;
        self.poll_offset = self.poll_offset.max(offset);
    }

    /// Rewinds the poll cursor to the release point.
    pub fn reset(&mut self) {
        self.poll_offset = self.released_offset;
    }

    /// Rebases the stream at `offset` with sequence number `seq_no`.
    pub fn sync(&mut self, offset: u64, seq_no: i64) {
        let polled = self.poll_offset - self.released_offset;
        self.released_offset = offset;
        self.poll_offset = offset + polled;
        self.seq_no = seq_no;
    }

    /// Returns the committed bytes not yet polled and advances the poll cursor.
    pub fn poll(&mut self) -> ExportBlock {
        let start = (self.poll_offset - self.released_offset) as usize;
        let data = Bytes::copy_from_slice(&self.committed[start..]);
        let offset = self.poll_offset;
        self.poll_offset = self.end_offset();
        ExportBlock { offset, data }
    }

    /// Universal offset one past the last committed byte.
    pub fn end_offset(&self) -> u64 {
        self.released_offset + self.committed.len() as u64
    }

    /// Current poll cursor.
    pub fn poll_offset(&self) -> u64 {
        self.poll_offset
    }

    /// Offset below which bytes have been released.
    pub fn released_offset(&self) -> u64 {
        self.released_offset
    }

    /// Sequence number set by the last sync.
    pub fn seq_no(&self) -> i64 {
        self.seq_no
    }

    /// Rows appended but not yet committed.
    pub fn pending_rows(&self) -> usize {
        self.pending.len()
    }

    /// Total rows moved into the committed region.
    pub fn rows_committed(&self) -> u64 {
        self.rows_committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn test_append_truncate() {
        let mut stream = ExportStream::new();
        let mark = stream.append(TxnId::new(1), &row![1]);
        stream.append(TxnId::new(1), &row![2]);
        assert_eq!(stream.pending_rows(), 2);

        stream.truncate(mark);
        assert_eq!(stream.pending_rows(), 0);
    }

    #[test]
    fn test_commit_poll_ack() {
        let mut stream = ExportStream::new();
        stream.append(TxnId::new(1), &row![1]);
        stream.append(TxnId::new(2), &row![2]);

        assert_eq!(stream.commit_through(TxnId::new(1)), 1);
        assert_eq!(stream.pending_rows(), 1);

        let tuple_len = row![1].serialized_size() as u64;
        let block = stream.poll();
        assert_eq!(block.offset, 0);
        assert_eq!(block.data.len() as u64, tuple_len);
        assert_eq!(stream.poll_offset(), tuple_len);

        // nothing new until another commit
        assert!(stream.poll().data.is_empty());

        stream.reset();
        assert_eq!(stream.poll().offset, 0);

        stream.ack(tuple_len);
        assert_eq!(stream.released_offset(), tuple_len);
        stream.reset();
        assert!(stream.poll().data.is_empty());
    }

    #[test]
    fn test_sync_rebases_offsets() {
        let mut stream = ExportStream::new();
        stream.append(TxnId::new(1), &row![1]);
        stream.commit_through(TxnId::new(1));
        stream.sync(1_000, 7);

        assert_eq!(stream.seq_no(), 7);
        assert_eq!(stream.poll().offset, 1_000);
    }
}
