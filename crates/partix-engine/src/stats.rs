//! Statistics tables.
//!
//! Each selector produces one temp table that the engine serializes into the
//! result buffer. Interval mode reports the change since the previous
//! interval call for the same source; the baseline is only advanced by
//! interval calls.

use std::collections::HashMap;

use partix_catalog::TableRegistry;
use partix_common::{CatalogVersion, TableId};
use partix_storage::{Column, ColumnType, Row, TableCounters, TempLimit, TempTable, Value};

use crate::error::{EngineError, EngineResult};

/// What a stats request reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatsSelector {
    /// One row per table.
    Table = 0,
    /// One row for the engine.
    Engine = 1,
}

impl StatsSelector {
    /// Decodes a caller-supplied selector.
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Table),
            1 => Some(Self::Engine),
            _ => None,
        }
    }
}

/// Engine-wide counters sampled for the `Engine` selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCounters {
    /// Fragments run to completion.
    pub fragments_executed: u64,
    /// Fragment cache hits.
    pub cache_hits: u64,
    /// Fragment cache misses.
    pub cache_misses: u64,
    /// Undo quanta released.
    pub quanta_released: u64,
    /// Undo quanta rolled back.
    pub quanta_undone: u64,
}

impl EngineCounters {
    fn since(&self, base: &Self) -> Self {
        Self {
            fragments_executed: self.fragments_executed.saturating_sub(base.fragments_executed),
            cache_hits: self.cache_hits.saturating_sub(base.cache_hits),
            cache_misses: self.cache_misses.saturating_sub(base.cache_misses),
            quanta_released: self.quanta_released.saturating_sub(base.quanta_released),
            quanta_undone: self.quanta_undone.saturating_sub(base.quanta_undone),
        }
    }
}

fn counters_since(now: TableCounters, base: TableCounters) -> TableCounters {
    TableCounters {
        inserts: now.inserts.saturating_sub(base.inserts),
        updates: now.updates.saturating_sub(base.updates),
        deletes: now.deletes.saturating_sub(base.deletes),
    }
}

fn big(v: u64) -> Value {
    Value::BigInt(v as i64)
}

/// Produces stats tables and keeps interval baselines.
#[derive(Debug, Default)]
pub struct StatsAgent {
    table_baselines: HashMap<String, TableCounters>,
    engine_baseline: EngineCounters,
}

impl StatsAgent {
    /// Creates an agent with zero baselines.
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns of the `Table` selector.
    pub fn table_columns() -> Vec<Column> {
        vec![
            Column::new("TIMESTAMP", ColumnType::BigInt),
            Column::new("PARTITION_ID", ColumnType::Integer),
            Column::new("TABLE_NAME", ColumnType::Varchar),
            Column::new("TUPLE_COUNT", ColumnType::BigInt),
            Column::new("BLOCK_COUNT", ColumnType::BigInt),
            Column::new("INSERTS", ColumnType::BigInt),
            Column::new("UPDATES", ColumnType::BigInt),
            Column::new("DELETES", ColumnType::BigInt),
        ]
    }

    /// Columns of the `Engine` selector.
    pub fn engine_columns() -> Vec<Column> {
        vec![
            Column::new("TIMESTAMP", ColumnType::BigInt),
            Column::new("PARTITION_ID", ColumnType::Integer),
            Column::new("FRAGMENTS_EXECUTED", ColumnType::BigInt),
            Column::new("CACHE_HITS", ColumnType::BigInt),
            Column::new("CACHE_MISSES", ColumnType::BigInt),
            Column::new("QUANTA_RELEASED", ColumnType::BigInt),
            Column::new("QUANTA_UNDONE", ColumnType::BigInt),
            Column::new("CATALOG_VERSION", ColumnType::BigInt),
        ]
    }

    /// One row per requested table; every table when `locators` is empty.
    pub fn table_stats(
        &mut self,
        registry: &TableRegistry,
        partition_id: i32,
        locators: &[TableId],
        interval: bool,
        now: i64,
    ) -> EngineResult<TempTable> {
        let ids: Vec<TableId> = if locators.is_empty() {
            registry.iter().map(|(id, _)| id).collect()
        } else {
            locators.to_vec()
        };

        let mut out = TempTable::new(Self::table_columns());
        let mut limit = TempLimit::new(usize::MAX);
        for id in ids {
            let table = registry.get(id).ok_or(EngineError::TableNotFound { id })?;
            let current = table.counters();
            let reported = if interval {
                let base = self
                    .table_baselines
                    .insert(table.name().to_string(), current)
                    .unwrap_or_default();
                counters_since(current, base)
            } else {
                current
            };
            let row = Row::new(vec![
                Value::BigInt(now),
                Value::Integer(partition_id),
                Value::varchar(table.name()),
                big(table.len() as u64),
                big(table.block_count() as u64),
                big(reported.inserts),
                big(reported.updates),
                big(reported.deletes),
            ]);
            out.push(row, &mut limit)?;
        }
        Ok(out)
    }

    /// A single row of engine counters.
    pub fn engine_stats(
        &mut self,
        counters: EngineCounters,
        version: CatalogVersion,
        partition_id: i32,
        interval: bool,
        now: i64,
    ) -> EngineResult<TempTable> {
        let reported = if interval {
            let base = std::mem::replace(&mut self.engine_baseline, counters);
            counters.since(&base)
        } else {
            counters
        };
        let mut out = TempTable::new(Self::engine_columns());
        let mut limit = TempLimit::new(usize::MAX);
        out.push(
            Row::new(vec![
                Value::BigInt(now),
                Value::Integer(partition_id),
                big(reported.fragments_executed),
                big(reported.cache_hits),
                big(reported.cache_misses),
                big(reported.quanta_released),
                big(reported.quanta_undone),
                big(version.as_u64()),
            ]),
            &mut limit,
        )?;
        Ok(out)
    }

    /// Drops baselines of tables that no longer exist.
    pub fn retain_tables(&mut self, registry: &TableRegistry) {
        self.table_baselines
            .retain(|name, _| registry.by_name(name).is_some());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partix_catalog::{CatalogManager, CatalogPayload, DatabaseDef, TableDef};
    use partix_common::TxnId;
    use partix_storage::row;

    fn loaded() -> CatalogManager {
        let payload = CatalogPayload {
            version: CatalogVersion::new(1),
            cluster: "c".into(),
            database: DatabaseDef {
                name: "db".into(),
                tables: vec![
                    TableDef::new("A", vec![Column::new("id", ColumnType::Integer)]),
                    TableDef::new("B", vec![Column::new("id", ColumnType::Integer)]),
                ],
                ..Default::default()
            },
        };
        let mut manager = CatalogManager::new(16);
        manager.load_catalog(&payload.to_vec().unwrap()).unwrap();
        manager
    }

    #[test]
    fn test_selector_codes() {
        assert_eq!(StatsSelector::from_i32(0), Some(StatsSelector::Table));
        assert_eq!(StatsSelector::from_i32(1), Some(StatsSelector::Engine));
        assert_eq!(StatsSelector::from_i32(7), None);
    }

    #[test]
    fn test_table_stats_all_and_interval() {
        let mut catalog = loaded();
        catalog
            .registry_mut()
            .insert("A", TxnId::new(1), row![1])
            .unwrap();

        let mut agent = StatsAgent::new();
        let all = agent
            .table_stats(catalog.registry(), 0, &[], false, 100)
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.rows()[0].get(2), Some(&Value::varchar("A")));
        assert_eq!(all.rows()[0].get(5), Some(&Value::BigInt(1)));

        let first = agent
            .table_stats(catalog.registry(), 0, &[TableId::new(1)], true, 100)
            .unwrap();
        assert_eq!(first.rows()[0].get(5), Some(&Value::BigInt(1)));

        catalog
            .registry_mut()
            .insert("A", TxnId::new(1), row![2])
            .unwrap();
        let second = agent
            .table_stats(catalog.registry(), 0, &[TableId::new(1)], true, 200)
            .unwrap();
        assert_eq!(second.rows()[0].get(5), Some(&Value::BigInt(1)));
        assert_eq!(second.rows()[0].get(3), Some(&Value::BigInt(2)));
    }

    #[test]
    fn test_unknown_locator() {
        let catalog = loaded();
        let mut agent = StatsAgent::new();
        assert!(matches!(
            agent.table_stats(catalog.registry(), 0, &[TableId::new(9)], false, 0),
            Err(EngineError::TableNotFound { .. })
        ));
    }

    #[test]
    fn test_engine_interval() {
        let mut agent = StatsAgent::new();
        let mut counters = EngineCounters {
            fragments_executed: 5,
            ..Default::default()
        };
        let first = agent
            .engine_stats(counters, CatalogVersion::new(3), 0, true, 0)
            .unwrap();
        assert_eq!(first.rows()[0].get(2), Some(&Value::BigInt(5)));
        assert_eq!(first.rows()[0].get(7), Some(&Value::BigInt(3)));

        counters.fragments_executed = 8;
        let second = agent
            .engine_stats(counters, CatalogVersion::new(3), 0, true, 0)
            .unwrap();
        assert_eq!(second.rows()[0].get(2), Some(&Value::BigInt(3)));
    }
}
