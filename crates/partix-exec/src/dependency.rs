//! Intermediate results passed between the fragments of a batch.

use std::collections::HashMap;

use partix_common::DependencyId;
use partix_storage::TempTable;

/// Dependency tables keyed by id, cleared at the end of every top-level call.
#[derive(Debug, Default)]
pub struct DependencyStore {
    tables: HashMap<DependencyId, TempTable>,
}

impl DependencyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `table` under `id`, replacing any previous table.
    pub fn stash(&mut self, id: DependencyId, table: TempTable) {
        self.tables.insert(id, table);
    }

    /// Removes and returns the table for `id`.
    pub fn take(&mut self, id: DependencyId) -> Option<TempTable> {
        self.tables.remove(&id)
    }

    /// Returns the table for `id` without consuming it.
    pub fn get(&self, id: DependencyId) -> Option<&TempTable> {
        self.tables.get(&id)
    }

    /// Number of stashed tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if nothing is stashed.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Drops every table.
    pub fn clear(&mut self) {
        self.tables.clear();
    }
}
