//! Per-transaction read/write set tracking.
//!
//! Tracking is opt-in per transaction. While a transaction is tracked, every
//! fragment it runs to completion adds the tables its plan reads and writes.
//! A fragment that fails adds nothing.

use std::collections::{BTreeSet, HashMap};

use partix_common::TxnId;
use tracing::{debug, trace};

/// Tables one transaction has read and written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadWriteSet {
    /// Tables read, by name.
    pub reads: BTreeSet<String>,
    /// Tables written, by name.
    pub writes: BTreeSet<String>,
}

impl ReadWriteSet {
    /// Records a read.
    pub fn record_read(&mut self, table: &str) {
        if !self.reads.contains(table) {
            self.reads.insert(table.to_string());
        }
    }

    /// Records a write.
    pub fn record_write(&mut self, table: &str) {
        if !self.writes.contains(table) {
            self.writes.insert(table.to_string());
        }
    }
}

/// Read/write sets of the transactions being tracked.
#[derive(Debug, Default)]
pub struct TrackerManager {
    trackers: HashMap<TxnId, ReadWriteSet>,
}

impl TrackerManager {
    /// Creates a manager tracking nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `txn_id`. Enabling a tracked transaction again keeps
    /// what it has recorded.
    pub fn enable(&mut self, txn_id: TxnId) {
        self.trackers.entry(txn_id).or_default();
        trace!(txn = txn_id.as_i64(), "tracking enabled");
    }

    /// Stops tracking `txn_id` and returns what it recorded.
    pub fn finish(&mut self, txn_id: TxnId) -> Option<ReadWriteSet> {
        let set = self.trackers.remove(&txn_id)?;
        debug!(
            txn = txn_id.as_i64(),
            reads = set.reads.len(),
            writes = set.writes.len(),
            "tracking finished"
        );
        Some(set)
    }

    /// What `txn_id` has recorded so far.
    pub fn get(&self, txn_id: TxnId) -> Option<&ReadWriteSet> {
        self.trackers.get(&txn_id)
    }

    /// Returns true if `txn_id` is tracked.
    pub fn is_tracking(&self, txn_id: TxnId) -> bool {
        self.trackers.contains_key(&txn_id)
    }

    /// Adds a fragment's tables to `txn_id`'s sets, if it is tracked.
    pub fn record<R, W>(&mut self, txn_id: TxnId, reads: R, writes: W)
    where
        R: IntoIterator,
        R::Item: AsRef<str>,
        W: IntoIterator,
        W::Item: AsRef<str>,
    {
        let Some(set) = self.trackers.get_mut(&txn_id) else {
            return;
        };
        for table in reads {
            set.record_read(table.as_ref());
        }
        for table in writes {
            set.record_write(table.as_ref());
        }
    }

    /// Number of tracked transactions.
    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}
