//! Catalog object model.
//!
//! The catalog arrives as JSON:
//!
//! ```text
//! { "version": 1,
//!   "cluster": "c",
//!   "database": {
//!     "name": "db",
//!     "tables":    [ { "name", "columns": [..], "primary_key": [..], "indexes": [..],
//!                      "partition_column", "export" } ],
//!     "views":     [ { "name", "source", "group_by": [..] } ],
//!     "fragments": [ { "id", "statement", "plan" } ] } }
//! ```
//!
//! Table ids are the 1-based position of the table in `tables`.

use partix_common::{CatalogVersion, FragmentId, TableId};
use partix_storage::{Column, Schema};
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};

/// A full catalog snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogPayload {
    /// Catalog version.
    pub version: CatalogVersion,
    /// Cluster name.
    pub cluster: String,
    /// The single database.
    pub database: DatabaseDef,
}

impl CatalogPayload {
    /// Parses a JSON payload.
    pub fn from_slice(payload: &[u8]) -> CatalogResult<Self> {
        serde_json::from_slice(payload).map_err(|e| CatalogError::malformed(e.to_string()))
    }

    /// Serializes to JSON bytes.
    pub fn to_vec(&self) -> CatalogResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CatalogError::malformed(e.to_string()))
    }
}

/// A database: tables, views and plan fragments.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatabaseDef {
    /// Database name.
    pub name: String,
    /// Tables in id order.
    #[serde(default)]
    pub tables: Vec<TableDef>,
    /// Materialized views.
    #[serde(default)]
    pub views: Vec<ViewDef>,
    /// Plan fragments.
    #[serde(default)]
    pub fragments: Vec<FragmentDef>,
}

impl DatabaseDef {
    /// Looks up a table definition.
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Returns the id a table has in this catalog.
    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.tables
            .iter()
            .position(|t| t.name == name)
            .map(TableId::from_position)
    }

    /// Looks up a fragment definition.
    pub fn fragment(&self, id: FragmentId) -> Option<&FragmentDef> {
        self.fragments.iter().find(|f| f.id == id)
    }
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Columns in order.
    pub columns: Vec<Column>,
    /// Primary key column names.
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Secondary indexes.
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    /// Column the table is partitioned on, if any.
    #[serde(default)]
    pub partition_column: Option<String>,
    /// Append-only export table.
    #[serde(default)]
    pub export: bool,
}

impl TableDef {
    /// Creates a definition with the given columns.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key: Vec::new(),
            indexes: Vec::new(),
            partition_column: None,
            export: false,
        }
    }

    /// Sets the primary key.
    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Adds a secondary index.
    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Marks the table as an export table.
    pub fn exported(mut self) -> Self {
        self.export = true;
        self
    }

    /// Builds the table's schema.
    pub fn schema(&self) -> CatalogResult<Schema> {
        Ok(Schema::new(self.columns.clone()).with_primary_key(&self.primary_key)?)
    }
}

/// A secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name, unique within its table.
    pub name: String,
    /// Indexed column names.
    pub columns: Vec<String>,
    /// Whether keys must be unique.
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    /// Creates an index definition.
    pub fn new(name: impl Into<String>, columns: &[&str], unique: bool) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique,
        }
    }
}

/// A count-per-group materialized view.
///
/// `name` is the destination table. Its columns are the group-by columns
/// followed by one BIGINT count, and its primary key is the group-by
/// columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDef {
    /// Destination table.
    pub name: String,
    /// Source table.
    pub source: String,
    /// Source columns to group by.
    pub group_by: Vec<String>,
}

/// A plan fragment definition. The plan itself is interpreted by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentDef {
    /// Fragment id.
    pub id: FragmentId,
    /// Source statement, for diagnostics.
    #[serde(default)]
    pub statement: Option<String>,
    /// Plan node tree.
    pub plan: serde_json::Value,
}
