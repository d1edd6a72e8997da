//! Cache of initialized plan fragments.
//!
//! Entries are tagged with the catalog version they were compiled against.
//! A lookup under a newer version drops the stale entry and reports a miss,
//! so the caller recompiles against the current registry instead of
//! running with table ids that may have been renumbered.

use std::collections::HashMap;
use std::sync::Arc;

use partix_catalog::{CatalogManager, PreparedCatalog};
use partix_common::{CatalogVersion, FragmentId};
use tracing::debug;

use crate::error::{ExecError, ExecResult};
use crate::plan::PlanNode;
use crate::vector::ExecutorVector;

/// A cached executor vector.
#[derive(Debug, Clone)]
pub struct CachedVector {
    /// The vector.
    pub vector: Arc<ExecutorVector>,
    /// Times the vector was handed out.
    pub use_count: u64,
}

impl CachedVector {
    fn new(vector: ExecutorVector) -> Self {
        Self {
            vector: Arc::new(vector),
            use_count: 0,
        }
    }

    fn record_use(&mut self) {
        self.use_count += 1;
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that had to compile.
    pub misses: u64,
    /// Entries dropped because their catalog version was out of date.
    pub stale: u64,
    /// Vectors compiled.
    pub compiles: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Initialized fragments keyed by id.
#[derive(Debug, Default)]
pub struct FragmentCache {
    entries: HashMap<FragmentId, CachedVector>,
    stats: CacheStats,
}

impl FragmentCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the vector for `id` if it was compiled for `generation`.
    pub fn get(&mut self, id: FragmentId, generation: CatalogVersion) -> Option<Arc<ExecutorVector>> {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.vector.generation() == generation => {
                entry.record_use();
                self.stats.hits += 1;
                Some(Arc::clone(&entry.vector))
            }
            Some(_) => {
                self.entries.remove(&id);
                self.stats.stale += 1;
                self.stats.misses += 1;
                None
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Caches `vector` under `id`.
    pub fn insert(&mut self, id: FragmentId, vector: ExecutorVector) -> Arc<ExecutorVector> {
        let entry = CachedVector::new(vector);
        let vector = Arc::clone(&entry.vector);
        self.entries.insert(id, entry);
        vector
    }

    /// Returns the cached vector for `id`, compiling it from the live
    /// catalog when missing or stale.
    pub fn resolve(
        &mut self,
        id: FragmentId,
        catalog: &CatalogManager,
        bytes_per_node: usize,
    ) -> ExecResult<Arc<ExecutorVector>> {
        let generation = catalog.version();
        if let Some(vector) = self.get(id, generation) {
            return Ok(vector);
        }
        let def = catalog.fragment(id).ok_or(ExecError::FragmentNotFound { id })?;
        let plan = PlanNode::from_json(&def.plan)?;
        let vector = ExecutorVector::compile(&plan, catalog.registry(), bytes_per_node, generation)?;
        self.stats.compiles += 1;
        debug!(fragment = %id, %generation, nodes = vector.len(), "fragment initialized");
        Ok(self.insert(id, vector))
    }

    /// Drops every entry and compiles every fragment of the live catalog.
    pub fn warm(&mut self, catalog: &CatalogManager, bytes_per_node: usize) -> ExecResult<usize> {
        self.clear();
        let ids: Vec<FragmentId> = catalog
            .database()
            .map(|db| db.fragments.iter().map(|f| f.id).collect())
            .unwrap_or_default();
        for &id in &ids {
            let generation = catalog.version();
            let def = catalog.fragment(id).ok_or(ExecError::FragmentNotFound { id })?;
            let plan = PlanNode::from_json(&def.plan)?;
            let vector = ExecutorVector::compile(&plan, catalog.registry(), bytes_per_node, generation)?;
            self.stats.compiles += 1;
            self.insert(id, vector);
        }
        debug!(fragments = ids.len(), version = %catalog.version(), "fragment cache warmed");
        Ok(ids.len())
    }

    /// Checks that every fragment of a prepared catalog initializes against
    /// the tables it will have.
    pub fn check_prepared(prepared: &PreparedCatalog, bytes_per_node: usize) -> ExecResult<()> {
        for def in prepared.fragments() {
            let plan = PlanNode::from_json(&def.plan)?;
            ExecutorVector::compile(&plan, prepared, bytes_per_node, prepared.version()).map_err(|e| {
                ExecError::plan(format!("fragment {}: {}", def.id, e))
            })?;
        }
        Ok(())
    }

    /// Entry for `id`, stale or not.
    pub fn entry(&self, id: FragmentId) -> Option<&CachedVector> {
        self.entries.get(&id)
    }

    /// Cached fragment ids, sorted.
    pub fn fragment_ids(&self) -> Vec<FragmentId> {
        let mut ids: Vec<_> = self.entries.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counters.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partix_catalog::{CatalogCommand, CatalogDiff, CatalogPayload, DatabaseDef, FragmentDef, TableDef};
    use partix_storage::{Column, ColumnType};

    fn scan(table: &str) -> serde_json::Value {
        serde_json::json!({"type": "send", "input": {"type": "seq_scan", "table": table}})
    }

    fn loaded() -> CatalogManager {
        let payload = CatalogPayload {
            version: CatalogVersion::new(1),
            cluster: "c".into(),
            database: DatabaseDef {
                name: "db".into(),
                tables: vec![
                    TableDef::new("A", vec![Column::new("x", ColumnType::Integer)]),
                    TableDef::new("T", vec![Column::new("x", ColumnType::Integer)]),
                ],
                views: vec![],
                fragments: vec![FragmentDef {
                    id: FragmentId::new(10),
                    statement: None,
                    plan: scan("T"),
                }],
            },
        };
        let mut manager = CatalogManager::new(8);
        manager.load_catalog(&payload.to_vec().unwrap()).unwrap();
        manager
    }

    #[test]
    fn test_resolve_reuses_vector() {
        let manager = loaded();
        let mut cache = FragmentCache::new();
        let first = cache.resolve(FragmentId::new(10), &manager, 64).unwrap();
        let second = cache.resolve(FragmentId::new(10), &manager, 64).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().compiles, 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.entry(FragmentId::new(10)).unwrap().use_count, 1);
    }

    #[test]
    fn test_stale_generation_rebuilds() {
        let mut manager = loaded();
        let mut cache = FragmentCache::new();
        let before = cache.resolve(FragmentId::new(10), &manager, 64).unwrap();

        // dropping A renumbers T
        let diff = CatalogDiff {
            commands: vec![CatalogCommand::DropTable { name: "A".into() }],
        };
        manager
            .update_catalog(&diff.to_vec().unwrap(), CatalogVersion::new(2))
            .unwrap();

        let after = cache.resolve(FragmentId::new(10), &manager, 64).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.generation(), CatalogVersion::new(2));
        assert_eq!(cache.stats().stale, 1);
    }

    #[test]
    fn test_unknown_fragment() {
        let manager = loaded();
        let mut cache = FragmentCache::new();
        assert!(matches!(
            cache.resolve(FragmentId::new(99), &manager, 64),
            Err(ExecError::FragmentNotFound { .. })
        ));
    }

    #[test]
    fn test_warm() {
        let manager = loaded();
        let mut cache = FragmentCache::new();
        assert_eq!(cache.warm(&manager, 64).unwrap(), 1);
        assert_eq!(cache.fragment_ids(), vec![FragmentId::new(10)]);
    }
}
