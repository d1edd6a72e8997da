//! Hash indexes over table rows.

use std::collections::HashMap;

use crate::row::Row;

use super::block::RowId;

/// A hash index on a list of columns.
#[derive(Debug, Clone)]
pub(crate) struct TableIndex {
    pub(crate) name: String,
    pub(crate) columns: Vec<usize>,
    pub(crate) unique: bool,
    entries: HashMap<Row, Vec<RowId>>,
}

impl TableIndex {
    pub(crate) fn new(name: impl Into<String>, columns: Vec<usize>, unique: bool) -> Self {
        Self {
            name: name.into(),
            columns,
            unique,
            entries: HashMap::new(),
        }
    }

    pub(crate) fn key(&self, row: &Row) -> Row {
        row.project(&self.columns)
    }

    /// Returns true if inserting `key` for `id` would break uniqueness.
    pub(crate) fn conflicts(&self, key: &Row, id: Option<RowId>) -> bool {
        if !self.unique || key.iter().any(|v| v.is_null()) {
            return false;
        }
        self.entries
            .get(key)
            .map_or(false, |ids| ids.iter().any(|existing| Some(*existing) != id))
    }

    pub(crate) fn add(&mut self, key: Row, id: RowId) {
        self.entries.entry(key).or_default().push(id);
    }

    pub(crate) fn remove(&mut self, key: &Row, id: RowId) {
        if let Some(ids) = self.entries.get_mut(key) {
            ids.retain(|existing| *existing != id);
            if ids.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    pub(crate) fn lookup(&self, key: &Row) -> &[RowId] {
        self.entries.get(key).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::value::Value;

    #[test]
    fn test_unique_conflicts() {
        let mut index = TableIndex::new("idx", vec![0], true);
        index.add(row![1], RowId::new(0, 0));

        assert!(index.conflicts(&row![1], None));
        assert!(!index.conflicts(&row![1], Some(RowId::new(0, 0))));
        assert!(!index.conflicts(&row![2], None));
        assert!(!index.conflicts(&Row::new(vec![Value::Null]), None));

        index.remove(&row![1], RowId::new(0, 0));
        assert!(index.lookup(&row![1]).is_empty());
    }
}
