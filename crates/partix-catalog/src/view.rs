//! Materialized view metadata.

use partix_storage::{Row, Schema, Value};

use crate::error::{CatalogError, CatalogResult};
use crate::model::ViewDef;

/// A count-per-group view resolved against its source schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedView {
    name: String,
    source: String,
    group_by: Vec<usize>,
}

impl MaterializedView {
    /// Resolves a view definition.
    pub fn resolve(def: &ViewDef, source: &Schema) -> CatalogResult<Self> {
        Ok(Self {
            name: def.name.clone(),
            source: def.source.clone(),
            group_by: source.indices_of(&def.source, &def.group_by)?,
        })
    }

    /// Destination table.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source table.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Position of the count column in the destination.
    pub fn count_column(&self) -> usize {
        self.group_by.len()
    }

    /// Group key of a source row, which is also the destination key.
    pub fn group_key(&self, row: &Row) -> Row {
        row.project(&self.group_by)
    }

    /// Count stored in a destination row.
    pub fn count_of(&self, row: &Row) -> i64 {
        row.get(self.count_column())
            .and_then(Value::to_i64)
            .unwrap_or(0)
    }
}
