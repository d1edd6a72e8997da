//! Catalog lifecycle.
//!
//! Loads and updates are two-phase. `prepare_load` / `prepare_update` parse
//! and validate the payload against a copy of the current catalog without
//! touching anything live; the caller may check the prepared catalog further
//! (plan fragments, for instance) through `SchemaLookup`, and then `commit`
//! swaps it in. A rejected payload leaves the catalog and registry as they
//! were.
//!
//! ```text
//!   payload ──▶ prepare_* ──▶ PreparedCatalog ──▶ (caller checks) ──▶ commit
//!                  │                                                   │
//!                  └─ Malformed / Invalid / VersionMismatch            └─ registry rebuilt,
//!                                                                        version = new
//! ```

use std::collections::{BTreeSet, HashMap};

use partix_common::{CatalogVersion, FragmentId, TableId};
use partix_storage::Schema;
use tracing::{info, warn};

use crate::diff::CatalogDiff;
use crate::error::{CatalogError, CatalogResult};
use crate::model::{CatalogPayload, DatabaseDef, FragmentDef};
use crate::registry::{SchemaLookup, TableRegistry};
use crate::validate::validate;

/// Whether a prepared catalog replaces or updates the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareKind {
    /// Full load. Every table starts empty.
    Load,
    /// Incremental update. Surviving tables keep their rows.
    Update,
}

/// A validated catalog that is not yet live.
#[derive(Debug, Clone)]
pub struct PreparedCatalog {
    kind: PrepareKind,
    version: CatalogVersion,
    cluster: String,
    database: DatabaseDef,
    schemas: Vec<Schema>,
    recreated: BTreeSet<String>,
}

impl PreparedCatalog {
    fn new(
        kind: PrepareKind,
        version: CatalogVersion,
        cluster: String,
        database: DatabaseDef,
        recreated: BTreeSet<String>,
    ) -> CatalogResult<Self> {
        validate(&database)?;
        let schemas = database
            .tables
            .iter()
            .map(|t| t.schema())
            .collect::<CatalogResult<Vec<_>>>()?;
        Ok(Self {
            kind,
            version,
            cluster,
            database,
            schemas,
            recreated,
        })
    }

    /// Load or update.
    pub fn kind(&self) -> PrepareKind {
        self.kind
    }

    /// Version the catalog will have once committed.
    pub fn version(&self) -> CatalogVersion {
        self.version
    }

    /// The database definition.
    pub fn database(&self) -> &DatabaseDef {
        &self.database
    }

    /// Plan fragments of the prepared catalog.
    pub fn fragments(&self) -> &[FragmentDef] {
        &self.database.fragments
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.database.tables.iter().position(|t| t.name == name)
    }
}

impl SchemaLookup for PreparedCatalog {
    fn table_id(&self, name: &str) -> Option<TableId> {
        self.position(name).map(TableId::from_position)
    }

    fn schema(&self, name: &str) -> Option<&Schema> {
        self.position(name).map(|i| &self.schemas[i])
    }

    fn is_export(&self, name: &str) -> bool {
        self.database.table(name).is_some_and(|t| t.export)
    }
}

/// Cumulative catalog counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogStats {
    /// Full loads committed.
    pub loads: u64,
    /// Updates committed.
    pub updates: u64,
    /// Payloads rejected in prepare.
    pub rejected: u64,
}

/// Owns the live catalog and the table registry derived from it.
#[derive(Debug)]
pub struct CatalogManager {
    version: CatalogVersion,
    cluster: String,
    database: Option<DatabaseDef>,
    registry: TableRegistry,
    rows_per_block: usize,
    stats: CatalogStats,
}

impl CatalogManager {
    /// Creates a manager with no catalog.
    pub fn new(rows_per_block: usize) -> Self {
        Self {
            version: CatalogVersion::INITIAL,
            cluster: String::new(),
            database: None,
            registry: TableRegistry::new(),
            rows_per_block,
            stats: CatalogStats::default(),
        }
    }

    /// Returns true once a catalog has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.database.is_some()
    }

    /// Current catalog version.
    pub fn version(&self) -> CatalogVersion {
        self.version
    }

    /// Cluster name.
    pub fn cluster_name(&self) -> &str {
        &self.cluster
    }

    /// The live database definition.
    pub fn database(&self) -> Option<&DatabaseDef> {
        self.database.as_ref()
    }

    /// Database name, empty before a load.
    pub fn database_name(&self) -> &str {
        self.database.as_ref().map_or("", |d| d.name.as_str())
    }

    /// Looks up a plan fragment.
    pub fn fragment(&self, id: FragmentId) -> Option<&FragmentDef> {
        self.database.as_ref()?.fragment(id)
    }

    /// The live table registry.
    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    /// The live table registry.
    pub fn registry_mut(&mut self) -> &mut TableRegistry {
        &mut self.registry
    }

    /// Cumulative counters.
    pub fn stats(&self) -> CatalogStats {
        self.stats
    }

    /// Parses and validates a full catalog.
    pub fn prepare_load(&mut self, payload: &[u8]) -> CatalogResult<PreparedCatalog> {
        let result = CatalogPayload::from_slice(payload).and_then(|catalog| {
            PreparedCatalog::new(
                PrepareKind::Load,
                catalog.version,
                catalog.cluster,
                catalog.database,
                BTreeSet::new(),
            )
        });
        self.count_rejection(result)
    }

    /// Parses a diff and validates it against a copy of the current catalog.
    pub fn prepare_update(
        &mut self,
        payload: &[u8],
        version: CatalogVersion,
    ) -> CatalogResult<PreparedCatalog> {
        let result = self.prepare_update_inner(payload, version);
        self.count_rejection(result)
    }

    fn prepare_update_inner(
        &self,
        payload: &[u8],
        version: CatalogVersion,
    ) -> CatalogResult<PreparedCatalog> {
        let current = self.database.as_ref().ok_or(CatalogError::NotLoaded)?;
        let expected = self.version.next();
        if version != expected {
            return Err(CatalogError::VersionMismatch {
                expected,
                found: version,
            });
        }

        let diff = CatalogDiff::from_slice(payload)?;
        let mut database = current.clone();
        let recreated = diff.apply(&mut database)?;
        let prepared = PreparedCatalog::new(
            PrepareKind::Update,
            version,
            self.cluster.clone(),
            database,
            recreated,
        )?;
        self.check_unique_indexes(&prepared)?;
        Ok(prepared)
    }

    /// Unique indexes added to populated tables must hold for their rows.
    fn check_unique_indexes(&self, prepared: &PreparedCatalog) -> CatalogResult<()> {
        for def in &prepared.database.tables {
            if prepared.recreated.contains(&def.name) {
                continue;
            }
            let Some(table) = self.registry.by_name(&def.name) else {
                continue;
            };
            let existing = table.index_names();
            for index in def.indexes.iter().filter(|i| i.unique) {
                if existing.contains(&index.name.as_str()) {
                    continue;
                }
                let positions = table.schema().indices_of(&def.name, &index.columns)?;
                let mut seen = BTreeSet::new();
                for (_, row) in table.iter() {
                    let key = row.project(&positions);
                    if key.iter().any(|v| v.is_null()) {
                        continue;
                    }
                    if !seen.insert(key.clone()) {
                        return Err(CatalogError::invalid(format!(
                            "unique index {} on table {} violated by existing key {}",
                            index.name, def.name, key
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn count_rejection<T>(&mut self, result: CatalogResult<T>) -> CatalogResult<T> {
        if let Err(e) = &result {
            self.stats.rejected += 1;
            warn!(error = %e, "catalog payload rejected");
        }
        result
    }

    /// Makes a prepared catalog live and rebuilds the registry.
    ///
    /// For updates, additions are processed before deletes: surviving and
    /// added tables are placed first, then tables no longer in the catalog
    /// are released.
    pub fn commit(&mut self, prepared: PreparedCatalog) -> CatalogResult<CatalogVersion> {
        let PreparedCatalog {
            kind,
            version,
            cluster,
            database,
            recreated,
            ..
        } = prepared;

        let previous_views: BTreeSet<String> = self
            .database
            .iter()
            .flat_map(|d| d.views.iter().map(|v| v.name.clone()))
            .collect();

        let retained: HashMap<_, _> = match kind {
            PrepareKind::Load => HashMap::new(),
            PrepareKind::Update => self
                .registry
                .take_tables()
                .into_iter()
                .filter(|(name, _)| !recreated.contains(name))
                .collect(),
        };
        let mut registry = TableRegistry::build(&database, retained, self.rows_per_block)?;

        if kind == PrepareKind::Update {
            for view in &database.views {
                let touched = !previous_views.contains(&view.name)
                    || recreated.contains(&view.name)
                    || recreated.contains(&view.source);
                if touched {
                    registry.backfill_view(&view.name)?;
                }
            }
        }

        self.registry = registry;
        self.version = version;
        self.cluster = cluster;
        match kind {
            PrepareKind::Load => self.stats.loads += 1,
            PrepareKind::Update => self.stats.updates += 1,
        }
        info!(
            version = %version,
            database = %database.name,
            tables = database.tables.len(),
            fragments = database.fragments.len(),
            ?kind,
            "catalog committed"
        );
        self.database = Some(database);
        Ok(version)
    }

    /// Loads a full catalog. Validation and commit in one step.
    pub fn load_catalog(&mut self, payload: &[u8]) -> CatalogResult<CatalogVersion> {
        let prepared = self.prepare_load(payload)?;
        self.commit(prepared)
    }

    /// Applies an update. Validation and commit in one step.
    pub fn update_catalog(
        &mut self,
        payload: &[u8],
        version: CatalogVersion,
    ) -> CatalogResult<CatalogVersion> {
        let prepared = self.prepare_update(payload, version)?;
        self.commit(prepared)
    }
}
