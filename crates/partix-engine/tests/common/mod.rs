//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use bytes::BytesMut;
use partix_catalog::{CatalogPayload, DatabaseDef, FragmentDef, TableDef, ViewDef};
use partix_common::{CatalogVersion, EngineConfig, FragmentId, ResultCode, TxnId};
use partix_engine::{BufferSet, ExecutionEngine};
use partix_exec::{Assignment, ExecutionRequest, Expr, PlanNode};
use partix_storage::codec::put_table;
use partix_storage::{Column, ColumnType, DecodedTable, Row, TableReader, Value};
use tracing_subscriber::EnvFilter;

pub const INSERT_T: i64 = 1;
pub const SCAN_T: i64 = 2;
pub const DELETE_T: i64 = 3;
pub const RENAME_T: i64 = 4;
pub const INSERT_E: i64 = 5;

/// Installs a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn t_columns() -> Vec<Column> {
    vec![
        Column::new("id", ColumnType::Integer).not_null(),
        Column::new("name", ColumnType::Varchar),
    ]
}

pub fn t_table(name: &str) -> TableDef {
    TableDef::new(name, t_columns()).with_primary_key(&["id"])
}

pub fn fragment(id: i64, plan: PlanNode) -> FragmentDef {
    FragmentDef {
        id: FragmentId::new(id),
        statement: None,
        plan: serde_json::to_value(plan).unwrap(),
    }
}

fn send(input: PlanNode) -> PlanNode {
    PlanNode::Send {
        input: Box::new(input),
    }
}

pub fn insert_plan(table: &str) -> PlanNode {
    send(PlanNode::Insert {
        table: table.into(),
        rows: vec![vec![Expr::param(0), Expr::param(1)]],
        input: None,
    })
}

pub fn scan_plan(table: &str) -> PlanNode {
    send(PlanNode::SeqScan {
        table: table.into(),
        predicate: None,
        projection: None,
    })
}

pub fn by_id() -> Option<Expr> {
    Some(Expr::eq(Expr::column("id"), Expr::param(0)))
}

/// `T(id, name)` and export table `E(id, name)` with the standard fragments.
pub fn database() -> DatabaseDef {
    DatabaseDef {
        name: "db".into(),
        tables: vec![
            t_table("T"),
            TableDef::new("E", t_columns()).exported(),
        ],
        views: vec![],
        fragments: vec![
            fragment(INSERT_T, insert_plan("T")),
            fragment(SCAN_T, scan_plan("T")),
            fragment(
                DELETE_T,
                send(PlanNode::Delete {
                    table: "T".into(),
                    predicate: by_id(),
                }),
            ),
            fragment(
                RENAME_T,
                send(PlanNode::Update {
                    table: "T".into(),
                    predicate: by_id(),
                    assignments: vec![Assignment {
                        column: "name".into(),
                        value: Expr::param(1),
                    }],
                }),
            ),
            fragment(INSERT_E, insert_plan("E")),
        ],
    }
}

/// `T(id, grp)` with view `V(grp, cnt)` counting rows per group.
pub fn grouped_database() -> DatabaseDef {
    DatabaseDef {
        name: "db".into(),
        tables: vec![
            TableDef::new(
                "T",
                vec![
                    Column::new("id", ColumnType::Integer).not_null(),
                    Column::new("grp", ColumnType::Integer).not_null(),
                ],
            )
            .with_primary_key(&["id"]),
            TableDef::new(
                "V",
                vec![
                    Column::new("grp", ColumnType::Integer).not_null(),
                    Column::new("cnt", ColumnType::BigInt),
                ],
            )
            .with_primary_key(&["grp"]),
        ],
        views: vec![ViewDef {
            name: "V".into(),
            source: "T".into(),
            group_by: vec!["grp".into()],
        }],
        fragments: vec![fragment(INSERT_T, insert_plan("T"))],
    }
}

pub fn payload(database: DatabaseDef, version: u64) -> Vec<u8> {
    CatalogPayload {
        version: CatalogVersion::new(version),
        cluster: "cluster".into(),
        database,
    }
    .to_vec()
    .unwrap()
}

pub fn engine_with(config: EngineConfig, database: DatabaseDef) -> ExecutionEngine {
    init_tracing();
    let mut engine = ExecutionEngine::new(config).unwrap();
    engine.load_catalog(&payload(database, 1)).unwrap();
    engine.set_buffers(BufferSet::with_capacity(4 << 20));
    engine.reset_reused_result_output_buffer(0).unwrap();
    engine
}

pub fn engine() -> ExecutionEngine {
    engine_with(EngineConfig::default(), database())
}

/// Runs one fragment on freshly reset output buffers.
pub fn run(engine: &mut ExecutionEngine, fragment: i64, params: &[Value]) -> ResultCode {
    run_txn(engine, fragment, params, TxnId::new(1))
}

pub fn run_txn(
    engine: &mut ExecutionEngine,
    fragment: i64,
    params: &[Value],
    txn_id: TxnId,
) -> ResultCode {
    engine.reset_reused_result_output_buffer(0).unwrap();
    let request = ExecutionRequest::new(FragmentId::new(fragment), params)
        .with_txn(txn_id, TxnId::new(txn_id.as_i64() - 1));
    engine.execute_query(&request)
}

pub fn insert(engine: &mut ExecutionEngine, id: i32, name: &str) -> ResultCode {
    run(engine, INSERT_T, &[Value::Integer(id), Value::varchar(name)])
}

/// Decodes every `(dependency, table)` entry of the result buffer.
pub fn result_tables(engine: &ExecutionEngine) -> Vec<(i32, DecodedTable)> {
    let mut body = engine.buffers().unwrap().result().body();
    let mut out = Vec::new();
    while !body.is_empty() {
        let dep = i32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        body = &body[4..];
        out.push((dep, TableReader::read(&mut body).unwrap()));
    }
    out
}

/// Rows of `name`, sorted.
pub fn rows_of(engine: &ExecutionEngine, name: &str) -> Vec<Row> {
    let mut rows: Vec<Row> = engine
        .get_table_by_name(name)
        .unwrap()
        .iter()
        .map(|(_, row)| row.clone())
        .collect();
    rows.sort();
    rows
}

/// Serialized table of `count` rows `(i, "row-i")`.
pub fn serialized_rows(count: i32) -> BytesMut {
    let rows: Vec<Row> = (0..count)
        .map(|i| Row::new(vec![Value::Integer(i), Value::varchar(format!("row-{}", i))]))
        .collect();
    let mut buf = BytesMut::new();
    put_table(&mut buf, &t_columns(), rows.iter());
    buf
}
