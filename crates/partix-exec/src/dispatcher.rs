//! Fragment dispatch.
//!
//! The dispatcher resolves a fragment's executor vector, runs it against
//! the live registry and the current undo quantum, and publishes the sent
//! table as the fragment's output dependency. It also keeps the per-batch
//! bookkeeping bracketed by the first/last-in-batch flags.

use std::sync::Arc;

use partix_catalog::CatalogManager;
use partix_common::{DependencyId, FragmentId, TxnId};
use partix_storage::{TempTable, UndoAction, Value};
use partix_txn::UndoLog;
use tracing::{debug, trace};

use crate::cache::FragmentCache;
use crate::dependency::DependencyStore;
use crate::error::ExecResult;
use crate::executor::{ExecutorContext, MutationRecord};
use crate::plan::PlanNode;
use crate::tracker::{ReadWriteSet, TrackerManager};
use crate::vector::ExecutorVector;

/// Arguments of one fragment execution.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'p> {
    /// Fragment id. Ignored for ad hoc plans.
    pub fragment_id: FragmentId,
    /// Dependency the result is published under.
    pub out_dep: DependencyId,
    /// Dependency `Receive` reads.
    pub in_dep: DependencyId,
    /// Parameters.
    pub params: &'p [Value],
    /// Executing transaction.
    pub txn_id: TxnId,
    /// Highest committed transaction.
    pub last_committed: TxnId,
    /// First fragment of its batch.
    pub first_in_batch: bool,
    /// Last fragment of its batch.
    pub last_in_batch: bool,
}

impl<'p> ExecutionRequest<'p> {
    /// A single-fragment batch with no dependencies.
    pub fn new(fragment_id: FragmentId, params: &'p [Value]) -> Self {
        Self {
            fragment_id,
            out_dep: DependencyId::NONE,
            in_dep: DependencyId::NONE,
            params,
            txn_id: TxnId::default(),
            last_committed: TxnId::default(),
            first_in_batch: true,
            last_in_batch: true,
        }
    }

    /// Sets the transaction ids.
    pub fn with_txn(mut self, txn_id: TxnId, last_committed: TxnId) -> Self {
        self.txn_id = txn_id;
        self.last_committed = last_committed;
        self
    }

    /// Sets the dependency channel.
    pub fn with_deps(mut self, out_dep: DependencyId, in_dep: DependencyId) -> Self {
        self.out_dep = out_dep;
        self.in_dep = in_dep;
        self
    }

    /// Sets the batch position.
    pub fn in_batch(mut self, first: bool, last: bool) -> Self {
        self.first_in_batch = first;
        self.last_in_batch = last;
        self
    }
}

/// What one fragment produced.
#[derive(Debug, Default)]
pub struct FragmentOutcome {
    /// Sent table; `None` when the fragment produced nothing.
    pub result: Option<TempTable>,
    /// Rows inserted, updated or deleted.
    pub tuples_modified: u64,
    /// Mutations, when mutation logging is on.
    pub mutations: Vec<MutationRecord>,
}

/// Dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Fragments run to completion.
    pub fragments_executed: u64,
    /// Fragments that failed.
    pub fragments_failed: u64,
    /// Ad hoc plans run.
    pub ad_hoc_executed: u64,
    /// Batches closed by a last-in-batch fragment.
    pub batches: u64,
    /// Rows modified across every fragment.
    pub tuples_modified: u64,
}

#[derive(Debug, Default)]
struct BatchState {
    dirty: bool,
    fragments: u32,
    tuples_modified: u64,
}

/// Runs plan fragments.
#[derive(Debug)]
pub struct Dispatcher {
    cache: FragmentCache,
    dependencies: DependencyStore,
    bytes_per_node: usize,
    log_mutations: bool,
    trackers: TrackerManager,
    batch: BatchState,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Creates a dispatcher giving every plan node `bytes_per_node` of
    /// temp-table memory.
    pub fn new(bytes_per_node: usize) -> Self {
        Self {
            cache: FragmentCache::new(),
            dependencies: DependencyStore::new(),
            bytes_per_node,
            log_mutations: false,
            trackers: TrackerManager::new(),
            batch: BatchState::default(),
            stats: DispatchStats::default(),
        }
    }

    /// Collects a record of every mutation in each outcome.
    pub fn with_mutation_log(mut self, enabled: bool) -> Self {
        self.log_mutations = enabled;
        self
    }

    /// Temp-table bytes per plan node.
    pub fn bytes_per_node(&self) -> usize {
        self.bytes_per_node
    }

    /// The fragment cache.
    pub fn cache(&self) -> &FragmentCache {
        &self.cache
    }

    /// The fragment cache, mutably.
    pub fn cache_mut(&mut self) -> &mut FragmentCache {
        &mut self.cache
    }

    /// Supplies an input dependency.
    pub fn stash_dependency(&mut self, id: DependencyId, table: TempTable) {
        self.dependencies.stash(id, table);
    }

    /// Removes a published dependency.
    pub fn take_dependency(&mut self, id: DependencyId) -> Option<TempTable> {
        self.dependencies.take(id)
    }

    /// Returns true if the current batch has modified any tuple.
    pub fn is_dirty_batch(&self) -> bool {
        self.batch.dirty
    }

    /// Drops per-call scratch state.
    pub fn reset_scratch(&mut self) {
        self.dependencies.clear();
    }

    /// Counters.
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Starts recording the tables `txn_id` reads and writes.
    pub fn tracking_enable(&mut self, txn_id: TxnId) {
        self.trackers.enable(txn_id);
    }

    /// Stops recording for `txn_id`, returning what was recorded.
    pub fn tracking_finish(&mut self, txn_id: TxnId) -> Option<ReadWriteSet> {
        self.trackers.finish(txn_id)
    }

    /// What `txn_id` has recorded so far.
    pub fn tracked(&self, txn_id: TxnId) -> Option<&ReadWriteSet> {
        self.trackers.get(txn_id)
    }

    /// Runs a cataloged fragment.
    pub fn execute_query(
        &mut self,
        catalog: &mut CatalogManager,
        undo: &mut UndoLog<UndoAction>,
        request: &ExecutionRequest<'_>,
    ) -> ExecResult<FragmentOutcome> {
        self.begin(request);
        let result = match self
            .cache
            .resolve(request.fragment_id, catalog, self.bytes_per_node)
        {
            Ok(vector) => self.run(&vector, catalog, undo, request),
            Err(e) => Err(e),
        };
        self.finish(request, result)
    }

    /// Parses, initializes and runs an uncached plan.
    pub fn execute_plan_fragment(
        &mut self,
        catalog: &mut CatalogManager,
        undo: &mut UndoLog<UndoAction>,
        plan: &[u8],
        request: &ExecutionRequest<'_>,
    ) -> ExecResult<FragmentOutcome> {
        self.begin(request);
        let compiled = PlanNode::from_slice(plan).and_then(|plan| {
            ExecutorVector::compile(&plan, catalog.registry(), self.bytes_per_node, catalog.version())
        });
        let result = match compiled {
            Ok(vector) => self.run(&Arc::new(vector), catalog, undo, request),
            Err(e) => Err(e),
        };
        if result.is_ok() {
            self.stats.ad_hoc_executed += 1;
        }
        self.finish(request, result)
    }

    fn begin(&mut self, request: &ExecutionRequest<'_>) {
        if request.first_in_batch {
            self.batch = BatchState::default();
        }
    }

    fn run(
        &mut self,
        vector: &Arc<ExecutorVector>,
        catalog: &mut CatalogManager,
        undo: &mut UndoLog<UndoAction>,
        request: &ExecutionRequest<'_>,
    ) -> ExecResult<FragmentOutcome> {
        let mut ctx = ExecutorContext::new(
            catalog.registry_mut(),
            undo,
            &mut self.dependencies,
            request.params,
        )
        .with_txn(request.txn_id, request.last_committed)
        .with_input(request.in_dep);
        if self.log_mutations {
            ctx = ctx.with_mutation_log();
        }

        let result = vector.execute(&mut ctx)?;
        self.trackers
            .record(request.txn_id, vector.tables_read(), vector.tables_written());
        let outcome = FragmentOutcome {
            mutations: ctx.take_mutations(),
            tuples_modified: ctx.tuples_modified,
            result,
        };
        if let (Some(table), true) = (&outcome.result, request.out_dep.is_some()) {
            self.dependencies.stash(request.out_dep, table.clone());
        }
        Ok(outcome)
    }

    fn finish(
        &mut self,
        request: &ExecutionRequest<'_>,
        result: ExecResult<FragmentOutcome>,
    ) -> ExecResult<FragmentOutcome> {
        self.batch.fragments += 1;
        match &result {
            Ok(outcome) => {
                self.stats.fragments_executed += 1;
                self.stats.tuples_modified += outcome.tuples_modified;
                self.batch.tuples_modified += outcome.tuples_modified;
                if outcome.tuples_modified > 0 {
                    self.batch.dirty = true;
                }
                trace!(
                    fragment = %request.fragment_id,
                    modified = outcome.tuples_modified,
                    "fragment executed"
                );
            }
            Err(_) => self.stats.fragments_failed += 1,
        }
        if request.last_in_batch {
            self.stats.batches += 1;
            debug!(
                fragments = self.batch.fragments,
                modified = self.batch.tuples_modified,
                dirty = self.batch.dirty,
                "batch complete"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partix_catalog::{CatalogPayload, DatabaseDef, FragmentDef, TableDef};
    use partix_common::{CatalogVersion, ErrorCode, UndoToken};
    use partix_storage::{row, Column, ColumnType};

    fn loaded() -> CatalogManager {
        let insert = serde_json::json!({
            "type": "send",
            "input": {"type": "insert", "table": "T",
                      "rows": [[{"kind": "param", "index": 0}, {"kind": "param", "index": 1}]]}
        });
        let scan = serde_json::json!({"type": "send", "input": {"type": "seq_scan", "table": "T"}});
        let count = serde_json::json!({
            "type": "send",
            "input": {"type": "limit", "limit": 1, "input": {"type": "receive"}}
        });
        let payload = CatalogPayload {
            version: CatalogVersion::new(1),
            cluster: "c".into(),
            database: DatabaseDef {
                name: "db".into(),
                tables: vec![TableDef::new(
                    "T",
                    vec![
                        Column::new("id", ColumnType::Integer).not_null(),
                        Column::new("name", ColumnType::Varchar),
                    ],
                )
                .with_primary_key(&["id"])],
                views: vec![],
                fragments: vec![
                    FragmentDef {
                        id: FragmentId::new(1),
                        statement: Some("INSERT INTO T VALUES (?, ?)".into()),
                        plan: insert,
                    },
                    FragmentDef {
                        id: FragmentId::new(2),
                        statement: None,
                        plan: scan,
                    },
                    FragmentDef {
                        id: FragmentId::new(3),
                        statement: None,
                        plan: count,
                    },
                ],
            },
        };
        let mut manager = CatalogManager::new(16);
        manager.load_catalog(&payload.to_vec().unwrap()).unwrap();
        manager
    }

    #[test]
    fn test_insert_then_rollback() {
        let mut catalog = loaded();
        let mut undo = UndoLog::new();
        let mut dispatcher = Dispatcher::new(1 << 20);
        undo.set_undo_token(UndoToken::new(1)).unwrap();

        let params = [Value::Integer(1), Value::varchar("a")];
        let request = ExecutionRequest::new(FragmentId::new(1), &params);
        let outcome = dispatcher.execute_query(&mut catalog, &mut undo, &request).unwrap();
        assert_eq!(outcome.tuples_modified, 1);
        assert!(dispatcher.is_dirty_batch());
        assert_eq!(catalog.registry().by_name("T").unwrap().len(), 1);

        let registry = catalog.registry_mut();
        undo.undo(UndoToken::new(1), |action| registry.apply_undo(action));
        assert!(catalog.registry().by_name("T").unwrap().is_empty());
    }

    #[test]
    fn test_dependencies_flow_between_fragments() {
        let mut catalog = loaded();
        let mut undo = UndoLog::new();
        let mut dispatcher = Dispatcher::new(1 << 20);
        for id in 1..=3i32 {
            let params = [Value::Integer(id), Value::Null];
            let request = ExecutionRequest::new(FragmentId::new(1), &params);
            dispatcher.execute_query(&mut catalog, &mut undo, &request).unwrap();
        }

        let dep = DependencyId::new(7);
        let scan = ExecutionRequest::new(FragmentId::new(2), &[])
            .with_deps(dep, DependencyId::NONE)
            .in_batch(true, false);
        let first = dispatcher.execute_query(&mut catalog, &mut undo, &scan).unwrap();
        assert_eq!(first.result.unwrap().len(), 3);
        assert!(!dispatcher.is_dirty_batch());

        let limit = ExecutionRequest::new(FragmentId::new(3), &[])
            .with_deps(DependencyId::NONE, dep)
            .in_batch(false, true);
        let second = dispatcher.execute_query(&mut catalog, &mut undo, &limit).unwrap();
        assert_eq!(second.result.unwrap().rows(), &[row![1, Value::Null]]);
        assert_eq!(dispatcher.stats().fragments_executed, 5);
    }

    #[test]
    fn test_tracking_records_tables_of_completed_fragments() {
        let mut catalog = loaded();
        let mut undo = UndoLog::new();
        let mut dispatcher = Dispatcher::new(1 << 20);
        let txn = TxnId::new(5);
        dispatcher.tracking_enable(txn);

        let scan = ExecutionRequest::new(FragmentId::new(2), &[]).with_txn(txn, TxnId::new(4));
        dispatcher.execute_query(&mut catalog, &mut undo, &scan).unwrap();
        let set = dispatcher.tracked(txn).unwrap();
        assert!(set.reads.contains("T"));
        assert!(set.writes.is_empty());

        // the second insert fails and adds nothing new; the first already wrote T
        let params = [Value::Integer(1), Value::Null];
        let insert = ExecutionRequest::new(FragmentId::new(1), &params).with_txn(txn, TxnId::new(4));
        dispatcher.execute_query(&mut catalog, &mut undo, &insert).unwrap();
        assert!(dispatcher.execute_query(&mut catalog, &mut undo, &insert).is_err());

        let other = ExecutionRequest::new(FragmentId::new(2), &[]).with_txn(TxnId::new(6), txn);
        dispatcher.execute_query(&mut catalog, &mut undo, &other).unwrap();
        assert!(dispatcher.tracked(TxnId::new(6)).is_none());

        let set = dispatcher.tracking_finish(txn).unwrap();
        assert_eq!(set.writes.iter().collect::<Vec<_>>(), vec!["T"]);
        assert!(dispatcher.tracked(txn).is_none());
    }

    #[test]
    fn test_errors_are_counted() {
        let mut catalog = loaded();
        let mut undo = UndoLog::new();
        let mut dispatcher = Dispatcher::new(1 << 20);

        let missing = ExecutionRequest::new(FragmentId::new(42), &[]);
        let err = dispatcher.execute_query(&mut catalog, &mut undo, &missing).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FragmentNotFound);

        let params = [Value::Integer(1), Value::Null];
        let insert = ExecutionRequest::new(FragmentId::new(1), &params);
        dispatcher.execute_query(&mut catalog, &mut undo, &insert).unwrap();
        let err = dispatcher.execute_query(&mut catalog, &mut undo, &insert).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConstraintViolation);
        assert_eq!(dispatcher.stats().fragments_failed, 2);
    }

    #[test]
    fn test_ad_hoc_plan() {
        let mut catalog = loaded();
        let mut undo = UndoLog::new();
        let mut dispatcher = Dispatcher::new(1 << 20).with_mutation_log(true);

        let plan = br#"{"type": "insert", "table": "T",
                        "rows": [[{"kind": "literal", "value": {"integer": 5}},
                                  {"kind": "literal", "value": "null"}]]}"#;
        let request = ExecutionRequest::new(FragmentId::new(0), &[]);
        let outcome = dispatcher
            .execute_plan_fragment(&mut catalog, &mut undo, plan, &request)
            .unwrap();
        assert!(outcome.result.is_none());
        assert_eq!(outcome.mutations.len(), 1);
        assert!(dispatcher.cache().is_empty());
        assert_eq!(dispatcher.stats().ad_hoc_executed, 1);
    }
}
