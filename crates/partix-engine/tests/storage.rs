//! Table persistence, anti-cache eviction and stats.

mod common;

use std::path::Path;

use bytes::BytesMut;
use common::*;
use partix_common::{BackendConfig, EngineConfig, ResultCode, TableId, TxnId, UndoToken};
use partix_engine::{ExecutionEngine, StatsSelector};
use partix_storage::{row, TableReader, Value};

const T: TableId = TableId::new(1);
const E: TableId = TableId::new(2);

fn file_engine(dir: &Path) -> ExecutionEngine {
    let config = EngineConfig {
        backend: BackendConfig::File {
            dir: dir.to_path_buf(),
        },
        ..Default::default()
    };
    engine_with(config, database())
}

fn load(engine: &mut ExecutionEngine, count: i32) {
    engine
        .load_table(T, &serialized_rows(count), TxnId::new(1), TxnId::new(0), false)
        .unwrap();
}

#[test]
fn test_save_and_restore_through_file_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = Path::new("snapshots/T.tbl");

    let mut source = file_engine(dir.path());
    load(&mut source, 50);
    let written = source.save_table_to_disk("cluster", "db", T, path).unwrap();
    assert!(written > 0);
    assert!(dir.path().join(path).exists());

    let mut target = file_engine(dir.path());
    assert_eq!(target.restore_table_from_disk(path).unwrap(), 50);
    assert_eq!(rows_of(&target, "T"), rows_of(&source, "T"));
    assert_eq!(
        target.table_hash_code(T).unwrap(),
        source.table_hash_code(T).unwrap()
    );

    // restoring twice would duplicate rows
    assert!(target.restore_table_from_disk(path).is_err());
}

#[test]
fn test_restored_rows_survive_undo() {
    let dir = tempfile::tempdir().unwrap();
    let path = Path::new("T.tbl");

    let mut source = file_engine(dir.path());
    load(&mut source, 5);
    source.save_table_to_disk("cluster", "db", T, path).unwrap();

    let mut target = file_engine(dir.path());
    target.set_undo_token(UndoToken::new(1)).unwrap();
    assert_eq!(target.restore_table_from_disk(path).unwrap(), 5);
    assert!(target.undo_log().current_quantum().unwrap().is_empty());

    target.undo_undo_token(UndoToken::new(1));
    assert_eq!(rows_of(&target, "T"), rows_of(&source, "T"));
}

#[test]
fn test_restore_rejects_foreign_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = Path::new("t.tbl");

    let mut source = file_engine(dir.path());
    load(&mut source, 3);
    source.save_table_to_disk("cluster", "other", T, path).unwrap();

    let mut target = file_engine(dir.path());
    assert!(target.restore_table_from_disk(path).is_err());
    assert!(target.get_table(T).unwrap().is_empty());
    assert!(target.restore_table_from_disk(Path::new("missing.tbl")).is_err());
}

#[test]
fn test_load_table_rules() {
    let mut engine = engine();
    load(&mut engine, 3);

    // only empty tables can be loaded
    let again = engine.load_table(T, &serialized_rows(1), TxnId::new(2), TxnId::new(1), false);
    assert!(again.is_err());

    let export = engine.load_table(E, &serialized_rows(2), TxnId::new(2), TxnId::new(1), false);
    assert!(export.is_err());
    let export = engine.load_table(E, &serialized_rows(2), TxnId::new(2), TxnId::new(1), true);
    assert_eq!(export.unwrap(), 2);

    assert!(engine
        .load_table(TableId::new(77), &serialized_rows(1), TxnId::new(2), TxnId::new(1), false)
        .is_err());
}

#[test]
fn test_load_table_is_undoable() {
    let mut engine = engine();
    engine.set_undo_token(UndoToken::new(1)).unwrap();
    load(&mut engine, 10);
    assert_eq!(engine.get_table(T).unwrap().len(), 10);

    engine.undo_undo_token(UndoToken::new(1));
    assert!(engine.get_table(T).unwrap().is_empty());
}

#[test]
fn test_serialize_table_matches_contents() {
    let mut engine = engine();
    load(&mut engine, 4);

    let mut out = BytesMut::new();
    engine.serialize_table(T, &mut out).unwrap();
    let decoded = TableReader::decode(&out).unwrap();
    assert_eq!(decoded.columns.len(), 2);
    let mut rows = decoded.rows;
    rows.sort();
    assert_eq!(rows, rows_of(&engine, "T"));
}

#[test]
fn test_anti_cache_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = file_engine(dir.path());
    load(&mut engine, 20);
    let before = rows_of(&engine, "T");

    let block = engine.anti_cache_evict_block(T, 8).unwrap();
    assert_eq!(engine.get_table(T).unwrap().len(), 12);
    assert_eq!(engine.get_table(T).unwrap().evicted_blocks(), vec![block]);

    assert_eq!(engine.anti_cache_read_blocks(T, &[block]).unwrap(), 8);
    assert!(engine.anti_cache_read_blocks(T, &[block + 1]).is_err());
    assert_eq!(engine.anti_cache_merge_blocks(T).unwrap(), 1);

    assert_eq!(rows_of(&engine, "T"), before);
    assert!(engine.get_table(T).unwrap().evicted_blocks().is_empty());
}

#[test]
fn test_merge_waits_for_a_clashing_key_to_go() {
    let mut engine = engine();
    load(&mut engine, 3);
    let block = engine.anti_cache_evict_block(T, 3).unwrap();
    assert_eq!(insert(&mut engine, 0, "dup"), ResultCode::Success);

    assert_eq!(engine.anti_cache_read_blocks(T, &[block]).unwrap(), 3);
    assert!(engine.anti_cache_merge_blocks(T).is_err());
    assert_eq!(rows_of(&engine, "T"), vec![row![0, "dup"]]);
    assert_eq!(engine.get_table(T).unwrap().evicted_blocks(), vec![block]);

    assert_eq!(run(&mut engine, DELETE_T, &[Value::Integer(0)]), ResultCode::Success);
    assert_eq!(engine.anti_cache_merge_blocks(T).unwrap(), 1);
    assert_eq!(
        rows_of(&engine, "T"),
        vec![row![0, "row-0"], row![1, "row-1"], row![2, "row-2"]]
    );
}

#[test]
fn test_evicting_an_empty_table_fails() {
    let mut engine = engine();
    assert!(engine.anti_cache_evict_block(T, 4).is_err());
}

#[test]
fn test_table_stats_selector() {
    let mut engine = engine();
    load(&mut engine, 3);
    engine.set_undo_token(UndoToken::new(1)).unwrap();
    run(&mut engine, DELETE_T, &[Value::Integer(0)]);

    engine.reset_reused_result_output_buffer(0).unwrap();
    assert_eq!(
        engine.get_stats(StatsSelector::Table as i32, &[T.as_i32()], false, 42),
        1
    );
    let mut body = engine.buffers().unwrap().result().body();
    let stats = TableReader::read(&mut body).unwrap();
    assert_eq!(stats.columns[2].name, "TABLE_NAME");
    assert_eq!(stats.rows.len(), 1);
    let row = &stats.rows[0];
    assert_eq!(row.get(0), Some(&Value::BigInt(42)));
    assert_eq!(row.get(2), Some(&Value::varchar("T")));
    assert_eq!(row.get(3), Some(&Value::BigInt(2)));
    assert_eq!(row.get(5), Some(&Value::BigInt(3)));
    assert_eq!(row.get(7), Some(&Value::BigInt(1)));

    engine.reset_reused_result_output_buffer(0).unwrap();
    assert_eq!(engine.get_stats(StatsSelector::Table as i32, &[99], false, 42), -1);
}

#[test]
fn test_interval_stats_report_deltas() {
    let mut engine = engine();
    load(&mut engine, 3);

    let inserts = |engine: &mut ExecutionEngine| {
        engine.reset_reused_result_output_buffer(0).unwrap();
        assert_eq!(engine.get_stats(0, &[1], true, 0), 1);
        let mut body = engine.buffers().unwrap().result().body();
        TableReader::read(&mut body).unwrap().rows[0].get(5).cloned()
    };
    assert_eq!(inserts(&mut engine), Some(Value::BigInt(3)));
    assert_eq!(inserts(&mut engine), Some(Value::BigInt(0)));

    engine.set_undo_token(UndoToken::new(1)).unwrap();
    insert(&mut engine, 10, "x");
    assert_eq!(inserts(&mut engine), Some(Value::BigInt(1)));
}

#[test]
fn test_engine_stats_selector() {
    let mut engine = engine();
    engine.set_undo_token(UndoToken::new(1)).unwrap();
    insert(&mut engine, 1, "a");
    engine.release_undo_token(UndoToken::new(1));

    engine.reset_reused_result_output_buffer(0).unwrap();
    assert_eq!(engine.get_stats(StatsSelector::Engine as i32, &[0], false, 7), 1);
    let mut body = engine.buffers().unwrap().result().body();
    let stats = TableReader::read(&mut body).unwrap();
    let row = &stats.rows[0];
    assert_eq!(row.get(2), Some(&Value::BigInt(1)));
    assert_eq!(row.get(5), Some(&Value::BigInt(1)));
    assert_eq!(row.get(7), Some(&Value::BigInt(1)));

    assert_eq!(engine.get_stats(StatsSelector::Engine as i32, &[3], false, 7), -1);
    assert_eq!(engine.get_stats(9, &[], false, 7), -1);
    assert_eq!(rows_of(&engine, "T"), vec![row![1, "a"]]);
}
