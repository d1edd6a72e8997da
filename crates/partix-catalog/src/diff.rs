//! Incremental catalog updates.
//!
//! An update payload is a list of commands applied in order to a copy of
//! the current database definition:
//!
//! ```text
//! { "commands": [ { "op": "add_table", "name": "U", "columns": [..] },
//!                 { "op": "drop_index", "table": "T", "name": "idx" } ] }
//! ```

use std::collections::BTreeSet;

use partix_common::FragmentId;
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};
use crate::model::{DatabaseDef, FragmentDef, IndexDef, TableDef, ViewDef};

/// One catalog change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CatalogCommand {
    /// Adds a table at the end of the table list.
    AddTable(TableDef),
    /// Drops a table. Later tables are renumbered.
    DropTable {
        /// Table name.
        name: String,
    },
    /// Adds a secondary index.
    AddIndex {
        /// Table name.
        table: String,
        /// Index definition.
        index: IndexDef,
    },
    /// Drops a secondary index.
    DropIndex {
        /// Table name.
        table: String,
        /// Index name.
        name: String,
    },
    /// Adds a materialized view.
    AddView(ViewDef),
    /// Drops a materialized view. Its destination table stays.
    DropView {
        /// Destination table name.
        name: String,
    },
    /// Adds a plan fragment.
    AddFragment(FragmentDef),
    /// Drops a plan fragment.
    DropFragment {
        /// Fragment id.
        id: FragmentId,
    },
}

/// An update payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CatalogDiff {
    /// Commands in application order.
    pub commands: Vec<CatalogCommand>,
}

impl CatalogDiff {
    /// Parses a JSON update payload.
    pub fn from_slice(payload: &[u8]) -> CatalogResult<Self> {
        serde_json::from_slice(payload).map_err(|e| CatalogError::malformed(e.to_string()))
    }

    /// Serializes to JSON bytes.
    pub fn to_vec(&self) -> CatalogResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CatalogError::malformed(e.to_string()))
    }

    /// Applies the commands to `database`.
    ///
    /// Returns the names of tables dropped and added again by this diff;
    /// they start empty.
    pub fn apply(&self, database: &mut DatabaseDef) -> CatalogResult<BTreeSet<String>> {
        let mut dropped = BTreeSet::new();
        let mut recreated = BTreeSet::new();

        for command in &self.commands {
            match command {
                CatalogCommand::AddTable(table) => {
                    if database.table(&table.name).is_some() {
                        return Err(CatalogError::invalid(format!(
                            "table {} already exists",
                            table.name
                        )));
                    }
                    if dropped.contains(&table.name) {
                        recreated.insert(table.name.clone());
                    }
                    database.tables.push(table.clone());
                }
                CatalogCommand::DropTable { name } => {
                    let before = database.tables.len();
                    database.tables.retain(|t| &t.name != name);
                    if database.tables.len() == before {
                        return Err(CatalogError::invalid(format!("no table {} to drop", name)));
                    }
                    dropped.insert(name.clone());
                }
                CatalogCommand::AddIndex { table, index } => {
                    let def = table_mut(database, table)?;
                    if def.indexes.iter().any(|i| i.name == index.name) {
                        return Err(CatalogError::invalid(format!(
                            "index {} already exists on table {}",
                            index.name, table
                        )));
                    }
                    def.indexes.push(index.clone());
                }
                CatalogCommand::DropIndex { table, name } => {
                    let def = table_mut(database, table)?;
                    let before = def.indexes.len();
                    def.indexes.retain(|i| &i.name != name);
                    if def.indexes.len() == before {
                        return Err(CatalogError::invalid(format!(
                            "no index {} on table {}",
                            name, table
                        )));
                    }
                }
                CatalogCommand::AddView(view) => {
                    if database.views.iter().any(|v| v.name == view.name) {
                        return Err(CatalogError::invalid(format!(
                            "view {} already exists",
                            view.name
                        )));
                    }
                    database.views.push(view.clone());
                }
                CatalogCommand::DropView { name } => {
                    let before = database.views.len();
                    database.views.retain(|v| &v.name != name);
                    if database.views.len() == before {
                        return Err(CatalogError::invalid(format!("no view {} to drop", name)));
                    }
                }
                CatalogCommand::AddFragment(fragment) => {
                    if database.fragment(fragment.id).is_some() {
                        return Err(CatalogError::invalid(format!(
                            "fragment {} already exists",
                            fragment.id
                        )));
                    }
                    database.fragments.push(fragment.clone());
                }
                CatalogCommand::DropFragment { id } => {
                    let before = database.fragments.len();
                    database.fragments.retain(|f| f.id != *id);
                    if database.fragments.len() == before {
                        return Err(CatalogError::invalid(format!("no fragment {} to drop", id)));
                    }
                }
            }
        }
        Ok(recreated)
    }
}

fn table_mut<'a>(database: &'a mut DatabaseDef, name: &str) -> CatalogResult<&'a mut TableDef> {
    database
        .tables
        .iter_mut()
        .find(|t| t.name == name)
        .ok_or_else(|| CatalogError::TableNotFound {
            name: name.to_string(),
        })
}
