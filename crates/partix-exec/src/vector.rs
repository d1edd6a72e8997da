//! Compiled executor chains.
//!
//! ```text
//!   Send                       [0] SeqScan(T)
//!    └─ Projection      ==>    [1] Projection
//!        └─ SeqScan(T)         [2] Send
//! ```
//!
//! The vector holds executors in post-order, so running it front to back
//! feeds every node its child's output.

use partix_catalog::SchemaLookup;
use partix_common::{CatalogVersion, TableId};
use partix_storage::{Column, Schema, TempLimit, TempTable};
use tracing::trace;

use crate::error::{ExecError, ExecResult};
use crate::executor::{
    modified_columns, BoundAssignment, DeleteExec, Executor, ExecutorContext, InsertExec, LimitExec,
    ProjectionExec, ReceiveExec, SendExec, SeqScanExec, UpdateExec,
};
use crate::expr::Expr;
use crate::plan::PlanNode;

/// An initialized plan fragment.
#[derive(Debug)]
pub struct ExecutorVector {
    executors: Vec<Box<dyn Executor>>,
    temp_budget: usize,
    generation: CatalogVersion,
    sends: bool,
    tables: Vec<String>,
    reads: Vec<String>,
    writes: Vec<String>,
}

impl ExecutorVector {
    /// Compiles `plan`, resolving every table and column through `schemas`.
    ///
    /// The temp-table budget is `bytes_per_node` for every node in the
    /// tree. `generation` is the catalog version the vector is valid for.
    pub fn compile(
        plan: &PlanNode,
        schemas: &dyn SchemaLookup,
        bytes_per_node: usize,
        generation: CatalogVersion,
    ) -> ExecResult<Self> {
        let mut executors = Vec::with_capacity(plan.node_count());
        build(plan, schemas, &mut executors, true)?;
        trace!(nodes = executors.len(), %generation, "executor vector compiled");
        Ok(Self {
            temp_budget: bytes_per_node.saturating_mul(executors.len()),
            executors,
            generation,
            sends: matches!(plan, PlanNode::Send { .. }),
            tables: plan.tables().into_iter().map(str::to_string).collect(),
            reads: plan.tables_read().into_iter().map(str::to_string).collect(),
            writes: plan.tables_written().into_iter().map(str::to_string).collect(),
        })
    }

    /// Runs every executor in order.
    ///
    /// Returns the sent table, or `None` when the plan has no `Send` root.
    pub fn execute(&self, ctx: &mut ExecutorContext<'_>) -> ExecResult<Option<TempTable>> {
        ctx.temp = TempLimit::new(self.temp_budget);
        let mut current = None;
        for executor in &self.executors {
            trace!(node = executor.name(), "executing");
            current = Some(executor.execute(ctx, current.take())?);
        }
        Ok(if self.sends { current } else { None })
    }

    /// Catalog version the vector was compiled against.
    pub fn generation(&self) -> CatalogVersion {
        self.generation
    }

    /// Temp-table budget in bytes.
    pub fn temp_budget(&self) -> usize {
        self.temp_budget
    }

    /// Number of executors.
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Returns true for an empty vector.
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Executor names in execution order.
    pub fn node_names(&self) -> Vec<&'static str> {
        self.executors.iter().map(|e| e.name()).collect()
    }

    /// Tables the fragment touches.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Tables the fragment reads.
    pub fn tables_read(&self) -> &[String] {
        &self.reads
    }

    /// Tables the fragment modifies.
    pub fn tables_written(&self) -> &[String] {
        &self.writes
    }
}

fn resolve<'s>(schemas: &'s dyn SchemaLookup, table: &str) -> ExecResult<(TableId, &'s Schema)> {
    match (schemas.table_id(table), schemas.schema(table)) {
        (Some(id), Some(schema)) => Ok((id, schema)),
        _ => Err(ExecError::plan(format!("unknown table {}", table))),
    }
}

fn bind_all(exprs: &[Expr], columns: &[Column]) -> ExecResult<Vec<crate::expr::BoundExpr>> {
    exprs.iter().map(|e| e.bind(columns)).collect()
}

fn persistent<'s>(
    schemas: &'s dyn SchemaLookup,
    table: &str,
    node: &str,
) -> ExecResult<(TableId, &'s Schema)> {
    let resolved = resolve(schemas, table)?;
    if schemas.is_export(table) {
        return Err(ExecError::plan(format!(
            "{} is not allowed on export table {}",
            node, table
        )));
    }
    Ok(resolved)
}

/// Pushes the executors for `node` and its subtree. Returns the output columns.
fn build(
    node: &PlanNode,
    schemas: &dyn SchemaLookup,
    out: &mut Vec<Box<dyn Executor>>,
    root: bool,
) -> ExecResult<Vec<Column>> {
    let child = match node.input() {
        Some(input) => Some(build(input, schemas, out, false)?),
        None => None,
    };

    let executor: Box<dyn Executor> = match node {
        PlanNode::SeqScan {
            table,
            predicate,
            projection,
        } => {
            let (id, schema) = persistent(schemas, table, "scan")?;
            let predicate = predicate.as_ref().map(|p| p.bind(schema.columns())).transpose()?;
            let (indices, columns) = match projection {
                Some(names) => {
                    let indices = schema
                        .indices_of(table, names.as_slice())
                        .map_err(|e| ExecError::plan(e.to_string()))?;
                    let columns = indices.iter().map(|&i| schema.columns()[i].clone()).collect();
                    (Some(indices), columns)
                }
                None => (None, schema.columns().to_vec()),
            };
            Box::new(SeqScanExec::new(table.clone(), id, predicate, indices, columns))
        }
        PlanNode::Insert { table, rows, input } => {
            let (id, schema) = resolve(schemas, table)?;
            let width = schema.len();
            if let Some(columns) = &child {
                if columns.len() != width {
                    return Err(ExecError::plan(format!(
                        "insert into {} expects {} columns, input has {}",
                        table,
                        width,
                        columns.len()
                    )));
                }
            }
            if input.is_none() && rows.is_empty() {
                return Err(ExecError::plan(format!("insert into {} has no rows", table)));
            }
            let rows = rows
                .iter()
                .map(|row| {
                    if row.len() != width {
                        return Err(ExecError::plan(format!(
                            "insert into {} expects {} values, got {}",
                            table,
                            width,
                            row.len()
                        )));
                    }
                    bind_all(row, &[])
                })
                .collect::<ExecResult<Vec<_>>>()?;
            Box::new(InsertExec::new(table.clone(), id, rows, modified_columns()))
        }
        PlanNode::Update {
            table,
            predicate,
            assignments,
        } => {
            let (id, schema) = persistent(schemas, table, "update")?;
            let predicate = predicate.as_ref().map(|p| p.bind(schema.columns())).transpose()?;
            let assignments = assignments
                .iter()
                .map(|a| {
                    let column = schema.index_of(&a.column).ok_or_else(|| {
                        ExecError::plan(format!("unknown column {}.{}", table, a.column))
                    })?;
                    if schema.primary_key().contains(&column) {
                        return Err(ExecError::plan(format!(
                            "cannot assign primary key column {}.{}",
                            table, a.column
                        )));
                    }
                    Ok(BoundAssignment {
                        column,
                        value: a.value.bind(schema.columns())?,
                    })
                })
                .collect::<ExecResult<Vec<_>>>()?;
            Box::new(UpdateExec::new(
                table.clone(),
                id,
                predicate,
                assignments,
                modified_columns(),
            ))
        }
        PlanNode::Delete { table, predicate } => {
            let (id, schema) = persistent(schemas, table, "delete")?;
            let predicate = predicate.as_ref().map(|p| p.bind(schema.columns())).transpose()?;
            Box::new(DeleteExec::new(table.clone(), id, predicate, modified_columns()))
        }
        PlanNode::Receive { columns } => Box::new(ReceiveExec::new(columns.clone())),
        PlanNode::Projection { exprs, names, .. } => {
            let input = child.unwrap_or_default();
            if exprs.len() != names.len() {
                return Err(ExecError::plan(format!(
                    "projection has {} expressions but {} names",
                    exprs.len(),
                    names.len()
                )));
            }
            let bound = bind_all(exprs, &input)?;
            let columns = names
                .iter()
                .zip(&bound)
                .map(|(name, e)| Column::new(name.clone(), e.result_type(&[])))
                .collect();
            Box::new(ProjectionExec::new(bound, columns))
        }
        PlanNode::Limit { limit, offset, .. } => {
            Box::new(LimitExec::new(*limit, *offset, child.unwrap_or_default()))
        }
        PlanNode::Send { .. } => {
            if !root {
                return Err(ExecError::plan("send must be the root of a fragment"));
            }
            Box::new(SendExec::new(child.unwrap_or_default()))
        }
    };

    let columns = executor.output_columns().to_vec();
    out.push(executor);
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use partix_catalog::{CatalogManager, CatalogPayload, DatabaseDef, TableDef};
    use partix_storage::{row, ColumnType, UndoAction, Value};
    use partix_common::UndoToken;
    use partix_txn::UndoLog;

    use crate::dependency::DependencyStore;
    use crate::expr::CompareOp;

    fn catalog() -> CatalogManager {
        let database = DatabaseDef {
            name: "db".into(),
            tables: vec![
                TableDef::new(
                    "T",
                    vec![
                        Column::new("id", ColumnType::Integer).not_null(),
                        Column::new("name", ColumnType::Varchar),
                    ],
                )
                .with_primary_key(&["id"]),
                TableDef::new("E", vec![Column::new("v", ColumnType::Integer)]).exported(),
            ],
            views: vec![],
            fragments: vec![],
        };
        let payload = CatalogPayload {
            version: CatalogVersion::new(1),
            cluster: "c".into(),
            database,
        };
        let mut manager = CatalogManager::new(4);
        manager.load_catalog(&payload.to_vec().unwrap()).unwrap();
        manager
    }

    fn insert_plan() -> PlanNode {
        PlanNode::Send {
            input: Box::new(PlanNode::Insert {
                table: "T".into(),
                rows: vec![vec![Expr::param(0), Expr::param(1)]],
                input: None,
            }),
        }
    }

    fn run(
        manager: &mut CatalogManager,
        undo: &mut UndoLog<UndoAction>,
        plan: &PlanNode,
        params: &[Value],
    ) -> ExecResult<Option<TempTable>> {
        let vector =
            ExecutorVector::compile(plan, manager.registry(), 1 << 20, manager.version())?;
        let mut deps = DependencyStore::new();
        let mut ctx = ExecutorContext::new(manager.registry_mut(), undo, &mut deps, params);
        vector.execute(&mut ctx)
    }

    #[test]
    fn test_post_order() {
        let manager = catalog();
        let plan = PlanNode::Send {
            input: Box::new(PlanNode::Limit {
                input: Box::new(PlanNode::SeqScan {
                    table: "T".into(),
                    predicate: None,
                    projection: Some(vec!["name".into()]),
                }),
                limit: 1,
                offset: 0,
            }),
        };
        let vector =
            ExecutorVector::compile(&plan, manager.registry(), 100, manager.version()).unwrap();
        assert_eq!(vector.node_names(), vec!["SeqScan", "Limit", "Send"]);
        assert_eq!(vector.temp_budget(), 300);
        assert_eq!(vector.tables(), &["T".to_string()]);
    }

    #[test]
    fn test_unresolved_references() {
        let manager = catalog();
        let bad_table = PlanNode::Delete {
            table: "missing".into(),
            predicate: None,
        };
        let bad_column = PlanNode::SeqScan {
            table: "T".into(),
            predicate: Some(Expr::eq(Expr::column("nope"), Expr::literal(1))),
            projection: None,
        };
        let export_delete = PlanNode::Delete {
            table: "E".into(),
            predicate: None,
        };
        let nested_send = PlanNode::Limit {
            input: Box::new(insert_plan()),
            limit: 1,
            offset: 0,
        };
        for plan in [bad_table, bad_column, export_delete, nested_send] {
            assert!(matches!(
                ExecutorVector::compile(&plan, manager.registry(), 100, manager.version()),
                Err(ExecError::PlanInit { .. })
            ));
        }
    }

    #[test]
    fn test_insert_scan_update_delete() {
        let mut manager = catalog();
        let mut undo = UndoLog::new();
        undo.set_undo_token(UndoToken::new(1)).unwrap();

        for (id, name) in [(1i32, "a"), (2, "b"), (3, "c")] {
            let out = run(&mut manager, &mut undo, &insert_plan(), &[id.into(), name.into()])
                .unwrap()
                .unwrap();
            assert_eq!(out.rows(), &[row![1i64]]);
        }

        let update = PlanNode::Update {
            table: "T".into(),
            predicate: Some(Expr::compare(CompareOp::Ge, Expr::column("id"), Expr::param(0))),
            assignments: vec![crate::plan::Assignment {
                column: "name".into(),
                value: Expr::literal("z"),
            }],
        };
        // no Send root, so nothing is returned
        assert!(run(&mut manager, &mut undo, &update, &[Value::Integer(2)]).unwrap().is_none());

        let scan = PlanNode::Send {
            input: Box::new(PlanNode::SeqScan {
                table: "T".into(),
                predicate: Some(Expr::eq(Expr::column("name"), Expr::literal("z"))),
                projection: Some(vec!["id".into()]),
            }),
        };
        let out = run(&mut manager, &mut undo, &scan, &[]).unwrap().unwrap();
        assert_eq!(out.len(), 2);

        let delete = PlanNode::Send {
            input: Box::new(PlanNode::Delete {
                table: "T".into(),
                predicate: None,
            }),
        };
        let out = run(&mut manager, &mut undo, &delete, &[]).unwrap().unwrap();
        assert_eq!(out.rows(), &[row![3i64]]);
        assert!(manager.registry().by_name("T").unwrap().is_empty());

        // 3 inserts, 2 updates, 3 deletes
        assert_eq!(undo.current_quantum().unwrap().len(), 8);
    }

    #[test]
    fn test_mutation_refused_when_idle() {
        let mut manager = catalog();
        let mut undo = UndoLog::new();
        undo.set_undo_token(UndoToken::new(1)).unwrap();
        undo.release(UndoToken::new(1));

        let err = run(&mut manager, &mut undo, &insert_plan(), &[Value::Integer(1), "a".into()]).unwrap_err();
        assert_eq!(err.code(), partix_common::ErrorCode::NoActiveQuantum);
        assert!(manager.registry().by_name("T").unwrap().is_empty());
    }

    #[test]
    fn test_temp_budget_exhausted() {
        let mut manager = catalog();
        let mut undo = UndoLog::new();
        for id in 0..10i32 {
            run(&mut manager, &mut undo, &insert_plan(), &[id.into(), "row".into()]).unwrap();
        }
        let scan = PlanNode::Send {
            input: Box::new(PlanNode::SeqScan {
                table: "T".into(),
                predicate: None,
                projection: None,
            }),
        };
        let vector =
            ExecutorVector::compile(&scan, manager.registry(), 16, manager.version()).unwrap();
        let mut deps = DependencyStore::new();
        let mut ctx = ExecutorContext::new(manager.registry_mut(), &mut undo, &mut deps, &[]);
        let err = vector.execute(&mut ctx).unwrap_err();
        assert_eq!(err.code(), partix_common::ErrorCode::ResourceExhausted);
    }

    #[test]
    fn test_receive_and_project() {
        let mut manager = catalog();
        let mut undo = UndoLog::new();
        let plan = PlanNode::Send {
            input: Box::new(PlanNode::Projection {
                input: Box::new(PlanNode::Receive { columns: vec![] }),
                exprs: vec![Expr::IsNull {
                    expr: Box::new(Expr::param(0)),
                }],
                names: vec!["missing".into()],
            }),
        };
        let vector =
            ExecutorVector::compile(&plan, manager.registry(), 1 << 20, manager.version()).unwrap();

        let mut deps = DependencyStore::new();
        let dep = partix_common::DependencyId::new(4);
        let mut input = TempTable::new(vec![Column::new("x", ColumnType::Integer)]);
        input.push(row![1], &mut TempLimit::new(1 << 10)).unwrap();
        deps.stash(dep, input);

        let params = [Value::Null];
        let mut ctx = ExecutorContext::new(manager.registry_mut(), &mut undo, &mut deps, &params)
            .with_input(dep);
        let out = vector.execute(&mut ctx).unwrap().unwrap();
        assert_eq!(out.rows(), &[row![true]]);

        let mut ctx = ExecutorContext::new(manager.registry_mut(), &mut undo, &mut deps, &params)
            .with_input(dep);
        assert!(matches!(
            vector.execute(&mut ctx),
            Err(ExecError::DependencyMissing { .. })
        ));
    }
}
