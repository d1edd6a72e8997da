//! Fixed-capacity row blocks.

use std::fmt;

use crate::row::Row;

/// Address of a tuple slot: block number, then slot within the block.
///
/// Ordering follows scan order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RowId {
    /// Block number.
    pub block: u32,
    /// Slot within the block.
    pub slot: u32,
}

impl RowId {
    /// Creates a row id.
    #[inline]
    #[must_use]
    pub const fn new(block: u32, slot: u32) -> Self {
        Self { block, slot }
    }
}

impl fmt::Debug for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowId({}:{})", self.block, self.slot)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.slot)
    }
}

/// A block of tuple slots.
#[derive(Debug, Clone)]
pub(crate) struct Block {
    slots: Vec<Option<Row>>,
    live: usize,
}

impl Block {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            live: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }

    pub(crate) fn get(&self, slot: u32) -> Option<&Row> {
        self.slots.get(slot as usize).and_then(Option::as_ref)
    }

    /// Fills an empty slot. Returns false if the slot is occupied.
    pub(crate) fn put(&mut self, slot: u32, row: Row) -> bool {
        match self.slots.get_mut(slot as usize) {
            Some(entry) if entry.is_none() => {
                *entry = Some(row);
                self.live += 1;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn take(&mut self, slot: u32) -> Option<Row> {
        let row = self.slots.get_mut(slot as usize).and_then(Option::take);
        if row.is_some() {
            self.live -= 1;
        }
        row
    }

    pub(crate) fn replace(&mut self, slot: u32, row: Row) -> Option<Row> {
        self.slots
            .get_mut(slot as usize)
            .and_then(|entry| entry.as_mut().map(|old| std::mem::replace(old, row)))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (u32, &Row)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().map(|r| (i as u32, r)))
    }
}
