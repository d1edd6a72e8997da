//! Read/write set tracking and log replay.

mod common;

use common::*;
use partix_common::{BackendConfig, EngineConfig, ResultCode, TxnId, UndoToken};
use partix_storage::{row, TableReader, Value};

fn logging_engine() -> partix_engine::ExecutionEngine {
    let config = EngineConfig {
        log_records: true,
        ..Default::default()
    };
    engine_with(config, database())
}

fn table_set(engine: &mut partix_engine::ExecutionEngine, txn: TxnId, writes: bool) -> Vec<Value> {
    engine.reset_reused_result_output_buffer(0).unwrap();
    assert_eq!(engine.tracking_table_set(txn, writes), 1);
    let mut body = engine.buffers().unwrap().result().body();
    let table = TableReader::read(&mut body).unwrap();
    assert_eq!(table.columns[0].name, "TABLE_NAME");
    table
        .rows
        .iter()
        .map(|row| row.get(0).cloned().unwrap())
        .collect()
}

/// Inserts three rows, renames one and deletes another, one transaction
/// per fragment. Returns the log buffer.
fn mutate(engine: &mut partix_engine::ExecutionEngine) -> Vec<u8> {
    engine.set_undo_token(UndoToken::new(1)).unwrap();
    for (txn, (id, name)) in [(1, "a"), (2, "b"), (3, "c")].into_iter().enumerate() {
        let code = run_txn(
            engine,
            INSERT_T,
            &[Value::Integer(id), Value::varchar(name)],
            TxnId::new(txn as i64 + 1),
        );
        assert_eq!(code, ResultCode::Success);
    }
    run_txn(engine, RENAME_T, &[Value::Integer(2), Value::varchar("bee")], TxnId::new(4));
    run_txn(engine, DELETE_T, &[Value::Integer(1)], TxnId::new(5));
    run_txn(engine, INSERT_E, &[Value::Integer(9), Value::varchar("e")], TxnId::new(6));
    engine.release_undo_token(UndoToken::new(1));
    engine.buffers().unwrap().log().as_slice().to_vec()
}

#[test]
fn test_tracking_reports_tables_read_and_written() {
    let mut engine = engine();
    let tracked = TxnId::new(5);
    engine.set_undo_token(UndoToken::new(1)).unwrap();
    engine.tracking_enable(tracked);

    run_txn(&mut engine, INSERT_T, &[Value::Integer(1), Value::varchar("a")], tracked);
    run_txn(&mut engine, SCAN_T, &[], tracked);
    run_txn(&mut engine, INSERT_E, &[Value::Integer(1), Value::varchar("a")], TxnId::new(6));

    assert_eq!(table_set(&mut engine, tracked, true), vec![Value::varchar("T")]);
    assert_eq!(table_set(&mut engine, tracked, false), vec![Value::varchar("T")]);

    assert!(engine.tracking_finish(tracked));
    assert!(!engine.tracking_finish(tracked));
    assert_eq!(engine.tracking_table_set(tracked, true), -1);
    assert_eq!(engine.tracking_table_set(TxnId::new(6), true), -1);
}

#[test]
fn test_failed_fragment_is_not_tracked() {
    let mut engine = engine();
    let tracked = TxnId::new(3);
    engine.set_undo_token(UndoToken::new(1)).unwrap();
    engine.tracking_enable(tracked);

    insert(&mut engine, 1, "a");
    let code = run_txn(&mut engine, INSERT_T, &[Value::Integer(1), Value::varchar("b")], tracked);
    assert_eq!(code, ResultCode::Error);
    assert!(table_set(&mut engine, tracked, true).is_empty());
}

#[test]
fn test_replaying_the_log_rebuilds_tables() {
    let mut source = logging_engine();
    let log = mutate(&mut source);
    assert_eq!(rows_of(&source, "T"), vec![row![2, "bee"], row![3, "c"]]);

    let mut target = engine();
    // the export record is skipped
    assert_eq!(target.replay_log(&log, TxnId::new(0)).unwrap(), 5);
    assert_eq!(rows_of(&target, "T"), rows_of(&source, "T"));
    assert!(target.undo_log().outstanding_tokens().is_empty());
}

#[test]
fn test_replay_skips_transactions_up_to_the_given_one() {
    let mut source = logging_engine();
    let log = mutate(&mut source);

    let mut target = engine();
    target.set_undo_token(UndoToken::new(1)).unwrap();
    insert(&mut target, 1, "a");
    insert(&mut target, 2, "b");
    insert(&mut target, 3, "c");
    target.release_undo_token(UndoToken::new(1));

    assert_eq!(target.replay_log(&log, TxnId::new(3)).unwrap(), 2);
    assert_eq!(rows_of(&target, "T"), vec![row![2, "bee"], row![3, "c"]]);
}

#[test]
fn test_failed_log_record_stops_the_replay() {
    let mut source = logging_engine();
    let log = mutate(&mut source);

    let mut target = engine();
    target.set_undo_token(UndoToken::new(1)).unwrap();
    insert(&mut target, 3, "z");
    target.release_undo_token(UndoToken::new(1));

    // rows 1 and 2 go in, row 3 clashes
    assert!(target.replay_log(&log, TxnId::new(0)).is_err());
    assert_eq!(
        rows_of(&target, "T"),
        vec![row![1, "a"], row![2, "b"], row![3, "z"]]
    );
    assert!(target.replay_log(&log[..log.len() - 1], TxnId::new(6)).is_err());
}

#[test]
fn test_recovery_from_the_backend_log_maintains_views() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        log_records: true,
        backend: BackendConfig::File {
            dir: dir.path().to_path_buf(),
        },
        ..Default::default()
    };

    let mut source = engine_with(config.clone(), grouped_database());
    source.set_undo_token(UndoToken::new(1)).unwrap();
    for (txn, (id, grp)) in [(1, 10), (2, 10), (3, 20)].into_iter().enumerate() {
        run_txn(
            &mut source,
            INSERT_T,
            &[Value::Integer(id), Value::Integer(grp)],
            TxnId::new(txn as i64 + 1),
        );
    }
    source.release_undo_token(UndoToken::new(1));
    source.sync_log().unwrap();
    drop(source);

    let mut target = engine_with(config, grouped_database());
    assert_eq!(target.recover_from_log(TxnId::new(1)).unwrap(), 2);
    assert_eq!(rows_of(&target, "T"), vec![row![2, 10], row![3, 20]]);
    assert_eq!(
        rows_of(&target, "V"),
        vec![row![10, Value::BigInt(1)], row![20, Value::BigInt(1)]]
    );
}
