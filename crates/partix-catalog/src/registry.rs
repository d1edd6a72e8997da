//! The live table registry.
//!
//! Tables are owned by the registry in catalog order, so a table's id is
//! its position plus one. Everything else (names, delegates, views) refers
//! to tables by id or name; nothing holds a reference across a rebuild.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       TableRegistry                           │
//! │  tables:    [Table id=1][Table id=2]...                       │
//! │  by_name:   "T" → 0, "V" → 1                                  │
//! │  views:     V = count(*) group by T.grp                       │
//! │  delegates: "tables/T" → Table(1), "views/V" → View{T}        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All undo-logged mutations go through `insert`, `update` and `delete`,
//! which maintain materialized views and return the undo records for both
//! the base table and its views.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use partix_common::constants::CATALOG_TABLE_PATH;
use partix_common::{TableId, TxnId};
use partix_storage::{Row, RowId, Schema, StorageResult, StreamType, Table, UndoAction, Value};
use tracing::{debug, trace, warn};

use crate::error::{CatalogError, CatalogResult};
use crate::model::DatabaseDef;
use crate::view::MaterializedView;

const CATALOG_VIEW_PATH: &str = "views";

/// Read-only view of table names, ids and schemas.
///
/// Plans are checked against this before they are cached, either against
/// the live registry or against a prepared catalog that is not yet live.
pub trait SchemaLookup {
    /// Id of the named table.
    fn table_id(&self, name: &str) -> Option<TableId>;

    /// Schema of the named table.
    fn schema(&self, name: &str) -> Option<&Schema>;

    /// Returns true for append-only export tables.
    fn is_export(&self, name: &str) -> bool;
}

/// What a catalog path refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegateTarget {
    /// A table and its current id.
    Table(TableId),
    /// A materialized view and its source table.
    View {
        /// Source table name.
        source: String,
    },
}

/// Links a catalog path to its runtime object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogDelegate {
    /// Catalog path, such as `tables/T`.
    pub path: String,
    /// Runtime object.
    pub target: DelegateTarget,
}

/// A mutation replayed from another partition or from the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOp {
    /// Insert a full row.
    Insert,
    /// Replace the row sharing the given row's key.
    Update,
    /// Delete the row with the given key.
    Delete,
}

/// One applied replay and what it takes to reverse it.
#[derive(Debug)]
enum Replayed {
    Inserted(Row),
    Updated(Row),
    Deleted(Row),
}

impl Replayed {
    fn inverse(self) -> (ReplayOp, Row) {
        match self {
            Self::Inserted(key) => (ReplayOp::Delete, key),
            Self::Updated(old) => (ReplayOp::Update, old),
            Self::Deleted(old) => (ReplayOp::Insert, old),
        }
    }

    fn revert(self, table: &mut Table) -> StorageResult<()> {
        match self.inverse() {
            (ReplayOp::Insert, row) => table.replay_insert(row).map(|_| ()),
            (ReplayOp::Update, row) => table.replay_update(row).map(|_| ()),
            (ReplayOp::Delete, key) => table.replay_delete(&key).map(|_| ()),
        }
    }
}

/// Owns the partition's live tables.
#[derive(Debug, Default)]
pub struct TableRegistry {
    tables: Vec<Table>,
    by_name: HashMap<String, usize>,
    views: Vec<MaterializedView>,
    delegates: BTreeMap<String, CatalogDelegate>,
}

impl TableRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry for `database`.
    ///
    /// Tables found in `retained` keep their rows and have their secondary
    /// indexes brought in line with the definition; the others start empty.
    /// Retained tables not in `database` are dropped.
    pub(crate) fn build(
        database: &DatabaseDef,
        mut retained: HashMap<String, Table>,
        rows_per_block: usize,
    ) -> CatalogResult<Self> {
        let mut registry = Self::new();

        for def in &database.tables {
            let table = match retained.remove(&def.name) {
                Some(mut table) => {
                    let wanted: BTreeSet<&str> =
                        def.indexes.iter().map(|i| i.name.as_str()).collect();
                    let stale: Vec<String> = table
                        .index_names()
                        .into_iter()
                        .filter(|name| !wanted.contains(name))
                        .map(str::to_string)
                        .collect();
                    for name in stale {
                        table.drop_index(&name);
                    }
                    for index in &def.indexes {
                        table.add_index(&index.name, &index.columns, index.unique)?;
                    }
                    table
                }
                None => {
                    let schema = def.schema()?;
                    let mut table = if def.export {
                        Table::new_export(&def.name, schema)
                    } else {
                        Table::new(&def.name, schema, rows_per_block)
                    };
                    for index in &def.indexes {
                        table.add_index(&index.name, &index.columns, index.unique)?;
                    }
                    table
                }
            };
            registry.by_name.insert(def.name.clone(), registry.tables.len());
            registry.tables.push(table);
        }

        for (name, table) in retained {
            debug!(table = %name, rows = table.len(), "table dropped");
        }

        registry.init_materialized_views(database)?;
        registry.rebuild_delegates();
        Ok(registry)
    }

    /// Resolves the database's view definitions.
    pub(crate) fn init_materialized_views(&mut self, database: &DatabaseDef) -> CatalogResult<()> {
        let mut views = Vec::with_capacity(database.views.len());
        for def in &database.views {
            let source = self.table_named(&def.source)?;
            views.push(MaterializedView::resolve(def, source.schema())?);
        }
        self.views = views;
        Ok(())
    }

    fn rebuild_delegates(&mut self) {
        let tables = self.tables.iter().enumerate().map(|(position, table)| {
            let path = format!("{}/{}", CATALOG_TABLE_PATH, table.name());
            (path, DelegateTarget::Table(TableId::from_position(position)))
        });
        let views = self.views.iter().map(|view| {
            let path = format!("{}/{}", CATALOG_VIEW_PATH, view.name());
            let target = DelegateTarget::View {
                source: view.source().to_string(),
            };
            (path, target)
        });
        self.delegates = tables
            .chain(views)
            .map(|(path, target)| (path.clone(), CatalogDelegate { path, target }))
            .collect();
    }

    /// Takes every table out, leaving the registry empty.
    pub(crate) fn take_tables(&mut self) -> HashMap<String, Table> {
        self.by_name.clear();
        self.views.clear();
        self.delegates.clear();
        std::mem::take(&mut self.tables)
            .into_iter()
            .map(|t| (t.name().to_string(), t))
            .collect()
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if no tables are registered.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Returns the table with this id.
    pub fn get(&self, id: TableId) -> Option<&Table> {
        let position = usize::try_from(id.as_i32()).ok()?.checked_sub(1)?;
        self.tables.get(position)
    }

    /// Returns the table with this id.
    pub fn get_mut(&mut self, id: TableId) -> Option<&mut Table> {
        let position = usize::try_from(id.as_i32()).ok()?.checked_sub(1)?;
        self.tables.get_mut(position)
    }

    /// Returns the named table.
    pub fn by_name(&self, name: &str) -> Option<&Table> {
        self.by_name.get(name).map(|&i| &self.tables[i])
    }

    /// Returns the named table.
    pub fn by_name_mut(&mut self, name: &str) -> Option<&mut Table> {
        let position = *self.by_name.get(name)?;
        self.tables.get_mut(position)
    }

    /// Returns the named table or `TableNotFound`.
    pub fn table_named(&self, name: &str) -> CatalogResult<&Table> {
        self.by_name(name).ok_or_else(|| CatalogError::TableNotFound {
            name: name.to_string(),
        })
    }

    /// Returns the named table or `TableNotFound`.
    pub fn table_named_mut(&mut self, name: &str) -> CatalogResult<&mut Table> {
        self.by_name_mut(name).ok_or_else(|| CatalogError::TableNotFound {
            name: name.to_string(),
        })
    }

    /// Name of the table with this id.
    pub fn name_of(&self, id: TableId) -> Option<&str> {
        self.get(id).map(Table::name)
    }

    /// Tables with their ids, in id order.
    pub fn iter(&self) -> impl Iterator<Item = (TableId, &Table)> {
        self.tables
            .iter()
            .enumerate()
            .map(|(position, table)| (TableId::from_position(position), table))
    }

    /// Resolved materialized views.
    pub fn views(&self) -> &[MaterializedView] {
        &self.views
    }

    /// Looks up a delegate by catalog path.
    pub fn delegate(&self, path: &str) -> Option<&CatalogDelegate> {
        self.delegates.get(path)
    }

    /// All delegates in path order.
    pub fn delegates(&self) -> impl Iterator<Item = &CatalogDelegate> {
        self.delegates.values()
    }

    /// Ids of tables with an active snapshot stream.
    pub fn snapshotting_tables(&self) -> BTreeSet<TableId> {
        self.iter()
            .filter(|(_, t)| t.is_streaming(StreamType::Snapshot))
            .map(|(id, _)| id)
            .collect()
    }

    /// Ids of export tables.
    pub fn exporting_tables(&self) -> BTreeSet<TableId> {
        self.iter()
            .filter(|(_, t)| t.is_export())
            .map(|(id, _)| id)
            .collect()
    }

    // =========================================================================
    // Mutation funnel
    // =========================================================================

    /// Inserts a row, or appends it to an export table's stream.
    pub fn insert(&mut self, name: &str, txn_id: TxnId, row: Row) -> CatalogResult<Vec<UndoAction>> {
        let table = self.table_named_mut(name)?;
        let incarnation = table.incarnation();
        if table.is_export() {
            let mark = table.append_export(txn_id, row)?;
            return Ok(vec![UndoAction::ExportAppend {
                table: name.to_string(),
                incarnation,
                mark,
            }]);
        }

        let row_id = table.insert(row)?;
        let stored = table.get(row_id).cloned();
        let mut actions = vec![UndoAction::Insert {
            table: name.to_string(),
            incarnation,
            row_id,
        }];
        self.maintain_views(name, None, stored.as_ref(), &mut actions)?;
        Ok(actions)
    }

    /// Replaces the row in a slot.
    pub fn update(&mut self, name: &str, row_id: RowId, row: Row) -> CatalogResult<Vec<UndoAction>> {
        let table = self.table_named_mut(name)?;
        let old = table.update(row_id, row)?;
        let stored = table.get(row_id).cloned();
        let mut actions = vec![UndoAction::Update {
            table: name.to_string(),
            incarnation: table.incarnation(),
            row_id,
            old: old.clone(),
        }];
        self.maintain_views(name, Some(&old), stored.as_ref(), &mut actions)?;
        Ok(actions)
    }

    /// Deletes the row in a slot.
    pub fn delete(&mut self, name: &str, row_id: RowId) -> CatalogResult<Vec<UndoAction>> {
        let table = self.table_named_mut(name)?;
        let old = table.delete(row_id)?;
        let mut actions = vec![UndoAction::Delete {
            table: name.to_string(),
            incarnation: table.incarnation(),
            row_id,
            row: old.clone(),
        }];
        self.maintain_views(name, Some(&old), None, &mut actions)?;
        Ok(actions)
    }

    /// Reverses one undo record.
    ///
    /// Records for dropped tables, and for tables dropped and re-created
    /// since the record was made, are skipped.
    pub fn apply_undo(&mut self, action: UndoAction) {
        let Some(table) = self.by_name_mut(action.table()) else {
            trace!(table = action.table(), "undo skipped for dropped table");
            return;
        };
        if table.incarnation() != action.incarnation() {
            trace!(table = action.table(), "undo skipped for re-created table");
            return;
        }
        let name = table.name().to_string();
        if let Err(e) = action.apply(table) {
            warn!(table = %name, error = %e, "undo action failed");
        }
    }

    fn rollback(&mut self, actions: Vec<UndoAction>) {
        for action in actions.into_iter().rev() {
            self.apply_undo(action);
        }
    }

    // =========================================================================
    // Replay
    // =========================================================================

    /// Applies mutations replayed from elsewhere to the named table.
    ///
    /// Replays are not undo-logged, reach stream contexts as replays, and
    /// maintain views like any other mutation. Deletes take key tuples.
    /// When one row fails, the rows before it are backed out and the error
    /// is returned. Returns the rows applied.
    pub fn replay(&mut self, name: &str, op: ReplayOp, rows: Vec<Row>) -> CatalogResult<usize> {
        let count = rows.len();
        let mut applied = Vec::with_capacity(count);
        for row in rows {
            match self.replay_one(name, op, row) {
                Ok(done) => applied.push(done),
                Err(e) => {
                    let backed_out = applied.len();
                    for done in applied.into_iter().rev() {
                        let (op, row) = done.inverse();
                        if let Err(undo) = self.replay_one(name, op, row) {
                            warn!(table = %name, error = %undo, "replay back-out failed");
                        }
                    }
                    debug!(table = %name, ?op, backed_out, error = %e, "replay rejected");
                    return Err(e);
                }
            }
        }
        Ok(count)
    }

    fn replay_one(&mut self, name: &str, op: ReplayOp, row: Row) -> CatalogResult<Replayed> {
        let table = self.table_named_mut(name)?;
        let (old, new, done) = match op {
            ReplayOp::Insert => {
                let row_id = table.replay_insert(row)?;
                let stored = table.get(row_id).cloned().unwrap_or_default();
                let key = table.schema().key_of(&stored);
                (None, Some(stored), Replayed::Inserted(key))
            }
            ReplayOp::Update => {
                let (row_id, old) = table.replay_update(row)?;
                let stored = table.get(row_id).cloned();
                (Some(old.clone()), stored, Replayed::Updated(old))
            }
            ReplayOp::Delete => {
                let (_, old) = table.replay_delete(&row)?;
                (Some(old.clone()), None, Replayed::Deleted(old))
            }
        };

        let mut views = Vec::new();
        if let Err(e) = self.maintain_views(name, old.as_ref(), new.as_ref(), &mut views) {
            let table = self.table_named_mut(name)?;
            if let Err(undo) = done.revert(table) {
                warn!(table = %name, error = %undo, "replay back-out failed");
            }
            return Err(e);
        }
        Ok(done)
    }

    // =========================================================================
    // Views
    // =========================================================================

    fn maintain_views(
        &mut self,
        source: &str,
        old: Option<&Row>,
        new: Option<&Row>,
        actions: &mut Vec<UndoAction>,
    ) -> CatalogResult<()> {
        let targets: Vec<usize> = self
            .views
            .iter()
            .enumerate()
            .filter(|(_, v)| v.source() == source)
            .map(|(i, _)| i)
            .collect();

        for view in targets {
            if let Err(e) = self.maintain_view(view, old, new, actions) {
                self.rollback(std::mem::take(actions));
                return Err(e);
            }
        }
        Ok(())
    }

    fn maintain_view(
        &mut self,
        view: usize,
        old: Option<&Row>,
        new: Option<&Row>,
        actions: &mut Vec<UndoAction>,
    ) -> CatalogResult<()> {
        let old_key = old.map(|r| self.views[view].group_key(r));
        let new_key = new.map(|r| self.views[view].group_key(r));
        if old_key == new_key {
            return Ok(());
        }
        if let Some(key) = old_key {
            self.adjust_group(view, key, -1, actions)?;
        }
        if let Some(key) = new_key {
            self.adjust_group(view, key, 1, actions)?;
        }
        Ok(())
    }

    fn adjust_group(
        &mut self,
        view: usize,
        key: Row,
        delta: i64,
        actions: &mut Vec<UndoAction>,
    ) -> CatalogResult<()> {
        let view = self.views[view].clone();
        let dest = self.table_named_mut(view.name())?;
        let table = view.name().to_string();
        let incarnation = dest.incarnation();

        match dest.find(&key) {
            Some(row_id) => {
                let current = dest.get(row_id).cloned().unwrap_or_default();
                let count = view.count_of(&current) + delta;
                if count <= 0 {
                    let row = dest.delete(row_id)?;
                    actions.push(UndoAction::Delete {
                        table,
                        incarnation,
                        row_id,
                        row,
                    });
                } else {
                    let mut updated = current;
                    updated.set(view.count_column(), Value::BigInt(count));
                    let old = dest.update(row_id, updated)?;
                    actions.push(UndoAction::Update {
                        table,
                        incarnation,
                        row_id,
                        old,
                    });
                }
            }
            None if delta > 0 => {
                let mut row = key;
                row.push(Value::BigInt(delta));
                let row_id = dest.insert(row)?;
                actions.push(UndoAction::Insert {
                    table,
                    incarnation,
                    row_id,
                });
            }
            None => {
                return Err(CatalogError::ViewInconsistent {
                    view: table,
                    key: key.to_string(),
                })
            }
        }
        Ok(())
    }

    /// Recomputes a view's destination from its source rows.
    ///
    /// Runs outside any undo quantum, when a view is added or one of its
    /// tables is recreated. Undo records made against the old contents no
    /// longer apply.
    pub(crate) fn backfill_view(&mut self, name: &str) -> CatalogResult<usize> {
        let Some(view) = self.views.iter().find(|v| v.name() == name).cloned() else {
            return Ok(0);
        };

        let mut counts: BTreeMap<Row, i64> = BTreeMap::new();
        for (_, row) in self.table_named(view.source())?.iter() {
            *counts.entry(view.group_key(row)).or_default() += 1;
        }

        let dest = self.table_named_mut(view.name())?;
        dest.renew_incarnation();
        let stale: Vec<RowId> = dest.iter().map(|(id, _)| id).collect();
        for id in stale {
            dest.delete(id)?;
        }
        let groups = counts.len();
        for (mut key, count) in counts {
            key.push(Value::BigInt(count));
            dest.insert(key)?;
        }
        debug!(view = %name, groups, "materialized view back-filled");
        Ok(groups)
    }
}

impl SchemaLookup for TableRegistry {
    fn table_id(&self, name: &str) -> Option<TableId> {
        self.by_name.get(name).map(|&i| TableId::from_position(i))
    }

    fn schema(&self, name: &str) -> Option<&Schema> {
        self.by_name(name).map(Table::schema)
    }

    fn is_export(&self, name: &str) -> bool {
        self.by_name(name).is_some_and(Table::is_export)
    }
}
