//! Fragment execution under undo quanta.

mod common;

use bytes::BytesMut;
use common::*;
use partix_common::{
    DependencyId, EngineConfig, ErrorCode, ExceptionType, FragmentId, ResultCode, TableId, TxnId,
    UndoToken,
};
use partix_engine::{ExportActions, LogRecord, SerializableException};
use partix_exec::{ExecutionRequest, FragmentBatch, FragmentRequest, MutationOp, PlanNode};
use partix_storage::codec::get_tuple;
use partix_storage::{row, ColumnType, Value};
use partix_txn::QuantumState;
use proptest::prelude::*;

#[test]
fn test_insert_then_undo_leaves_table_empty() {
    let mut engine = engine();
    engine.set_undo_token(UndoToken::new(1)).unwrap();

    assert_eq!(insert(&mut engine, 1, "a"), ResultCode::Success);
    assert_eq!(engine.tuples_modified(), 1);
    assert_eq!(rows_of(&engine, "T"), vec![row![1, "a"]]);

    engine.undo_undo_token(UndoToken::new(1));
    assert!(engine.get_table_by_name("T").unwrap().is_empty());
    assert_eq!(engine.undo_state(), QuantumState::Idle);
}

#[test]
fn test_release_keeps_rows_and_is_idempotent() {
    let mut engine = engine();
    engine.set_undo_token(UndoToken::new(1)).unwrap();
    insert(&mut engine, 1, "a");
    engine.set_undo_token(UndoToken::new(2)).unwrap();
    insert(&mut engine, 2, "b");

    assert_eq!(engine.release_undo_token(UndoToken::new(1)), 1);
    assert_eq!(engine.release_undo_token(UndoToken::new(1)), 0);
    assert_eq!(engine.undo_state(), QuantumState::Active(UndoToken::new(2)));

    // token 1 is committed, so undoing from 1 only reverts token 2
    engine.undo_undo_token(UndoToken::new(1));
    assert_eq!(rows_of(&engine, "T"), vec![row![1, "a"]]);
}

#[test]
fn test_mutation_after_release_needs_new_token() {
    let mut engine = engine();
    engine.set_undo_token(UndoToken::new(1)).unwrap();
    insert(&mut engine, 1, "a");
    engine.release_undo_token(UndoToken::new(1));

    assert_eq!(insert(&mut engine, 2, "b"), ResultCode::Error);
    assert_eq!(rows_of(&engine, "T"), vec![row![1, "a"]]);

    engine.set_undo_token(UndoToken::new(2)).unwrap();
    assert_eq!(insert(&mut engine, 2, "b"), ResultCode::Success);
}

#[test]
fn test_token_regression_is_rejected() {
    let mut engine = engine();
    engine.set_undo_token(UndoToken::new(5)).unwrap();
    assert!(engine.set_undo_token(UndoToken::new(3)).is_err());
    assert_eq!(engine.undo_state(), QuantumState::Active(UndoToken::new(5)));
    // the no-op token never changes state
    engine.set_undo_token(UndoToken::NO_OP).unwrap();
    assert_eq!(engine.undo_state(), QuantumState::Active(UndoToken::new(5)));
}

#[test]
fn test_constraint_violation_is_reported() {
    let mut engine = engine();
    engine.set_undo_token(UndoToken::new(1)).unwrap();
    insert(&mut engine, 1, "a");

    assert_eq!(insert(&mut engine, 1, "again"), ResultCode::Error);
    let exception = SerializableException::decode(
        engine.buffers().unwrap().exception().as_slice(),
    )
    .unwrap()
    .unwrap();
    assert_eq!(exception.exception_type, ExceptionType::ConstraintFailure);
    assert_eq!(exception.code, ErrorCode::ConstraintViolation.as_u16());
    assert_eq!(engine.tuples_modified(), 0);
}

#[test]
fn test_update_and_delete_roll_back() {
    let mut engine = engine();
    engine.set_undo_token(UndoToken::new(1)).unwrap();
    for id in 0..4 {
        insert(&mut engine, id, "x");
    }
    engine.release_undo_token(UndoToken::new(1));

    engine.set_undo_token(UndoToken::new(2)).unwrap();
    assert_eq!(
        run(&mut engine, RENAME_T, &[Value::Integer(1), Value::varchar("renamed")]),
        ResultCode::Success
    );
    assert_eq!(run(&mut engine, DELETE_T, &[Value::Integer(2)]), ResultCode::Success);
    assert_eq!(
        rows_of(&engine, "T"),
        vec![row![0, "x"], row![1, "renamed"], row![3, "x"]]
    );

    engine.undo_undo_token(UndoToken::new(2));
    assert_eq!(
        rows_of(&engine, "T"),
        vec![row![0, "x"], row![1, "x"], row![2, "x"], row![3, "x"]]
    );
}

#[test]
fn test_batch_from_parameter_buffer() {
    let mut engine = engine();
    engine.set_undo_token(UndoToken::new(1)).unwrap();

    let batch = FragmentBatch::new(vec![
        FragmentRequest::new(FragmentId::new(INSERT_T), vec![Value::Integer(1), Value::varchar("a")]),
        FragmentRequest::new(FragmentId::new(SCAN_T), Vec::<Value>::new())
            .with_output(DependencyId::new(7)),
    ]);
    let mut bytes = BytesMut::new();
    batch.serialize(&mut bytes);
    engine.buffers_mut().unwrap().write_parameters(&bytes).unwrap();
    engine.reset_reused_result_output_buffer(0).unwrap();

    let code = engine.execute_query_plan_fragments_and_get_results(TxnId::new(1), TxnId::new(0));
    assert_eq!(code, ResultCode::Success);
    assert_eq!(engine.tuples_modified(), 1);

    let tables = result_tables(&engine);
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[1].0, 7);
    assert_eq!(tables[1].1.rows, vec![row![1, "a"]]);
}

#[test]
fn test_batch_stops_at_first_error() {
    let mut engine = engine();
    engine.set_undo_token(UndoToken::new(1)).unwrap();
    insert(&mut engine, 1, "a");

    let params = |id: i32| vec![Value::Integer(id), Value::varchar("b")];
    let batch = FragmentBatch::new(vec![
        FragmentRequest::new(FragmentId::new(INSERT_T), params(2)),
        FragmentRequest::new(FragmentId::new(INSERT_T), params(1)),
        FragmentRequest::new(FragmentId::new(INSERT_T), params(3)),
    ]);
    let mut bytes = BytesMut::new();
    batch.serialize(&mut bytes);
    engine.buffers_mut().unwrap().write_parameters(&bytes).unwrap();
    engine.reset_reused_result_output_buffer(0).unwrap();

    let code = engine.execute_query_plan_fragments_and_get_results(TxnId::new(2), TxnId::new(1));
    assert_eq!(code, ResultCode::Error);
    assert_eq!(rows_of(&engine, "T"), vec![row![1, "a"], row![2, "b"]]);

    // the caller rolls the batch back
    engine.undo_undo_token(UndoToken::new(1));
    assert!(rows_of(&engine, "T").is_empty());
}

#[test]
fn test_log_records_follow_mutations() {
    let config = EngineConfig {
        log_records: true,
        ..Default::default()
    };
    let mut engine = engine_with(config, database());
    engine.set_undo_token(UndoToken::new(3)).unwrap();
    run_txn(
        &mut engine,
        INSERT_T,
        &[Value::Integer(1), Value::varchar("a")],
        TxnId::new(9),
    );
    assert!(engine.log_buffer_len() > 0);

    let types = [ColumnType::Integer, ColumnType::Varchar];
    let mut log = engine.buffers().unwrap().log().as_slice();
    let record = LogRecord::read(&mut log, &types).unwrap();
    assert_eq!(record.op, MutationOp::Insert);
    assert_eq!(record.txn_id, TxnId::new(9));
    assert_eq!(record.undo_token, UndoToken::new(3));
    assert_eq!(record.table, "T");
    assert_eq!(record.image, row![1, "a"]);
    assert!(log.is_empty());

    engine.rewind_log_buffer().unwrap();
    assert_eq!(engine.log_buffer_len(), 0);
    engine.sync_log().unwrap();
}

#[test]
fn test_view_maintenance_rolls_back() {
    let mut engine = engine_with(EngineConfig::default(), grouped_database());

    engine.set_undo_token(UndoToken::new(1)).unwrap();
    run(&mut engine, INSERT_T, &[Value::Integer(1), Value::Integer(10)]);
    engine.release_undo_token(UndoToken::new(1));

    engine.set_undo_token(UndoToken::new(2)).unwrap();
    run(&mut engine, INSERT_T, &[Value::Integer(2), Value::Integer(10)]);
    run(&mut engine, INSERT_T, &[Value::Integer(3), Value::Integer(20)]);
    assert_eq!(
        rows_of(&engine, "V"),
        vec![row![10, Value::BigInt(2)], row![20, Value::BigInt(1)]]
    );

    engine.undo_undo_token(UndoToken::new(2));
    assert_eq!(rows_of(&engine, "V"), vec![row![10, Value::BigInt(1)]]);
    assert_eq!(rows_of(&engine, "T"), vec![row![1, 10]]);
}

#[test]
fn test_export_flush_and_poll() {
    let mut engine = engine();
    let export = TableId::new(2);

    engine.set_undo_token(UndoToken::new(1)).unwrap();
    run_txn(&mut engine, INSERT_E, &[Value::Integer(1), Value::varchar("a")], TxnId::new(7));
    engine.release_undo_token(UndoToken::new(1));

    engine.set_undo_token(UndoToken::new(2)).unwrap();
    run_txn(&mut engine, INSERT_E, &[Value::Integer(2), Value::varchar("b")], TxnId::new(8));
    engine.undo_undo_token(UndoToken::new(2));
    assert_eq!(
        engine.get_table(export).unwrap().export().unwrap().pending_rows(),
        1
    );

    engine.tick(1_000, TxnId::new(7));
    engine.reset_reused_result_output_buffer(0).unwrap();
    assert_eq!(engine.export_action(ExportActions::POLL, 0, 0, export), 0);

    let mut body = engine.buffers().unwrap().result().body();
    let offset = i64::from_be_bytes(body[..8].try_into().unwrap());
    let len = u32::from_be_bytes(body[8..12].try_into().unwrap()) as usize;
    body = &body[12..];
    assert_eq!(offset, 0);
    assert_eq!(body.len(), len);
    let tuple = get_tuple(&mut body, &[ColumnType::Integer, ColumnType::Varchar]).unwrap();
    assert_eq!(tuple, row![1, "a"]);

    assert_eq!(
        engine.export_action(ExportActions::ACK, len as i64, 0, export),
        len as i64
    );
    assert_eq!(engine.export_action(ExportActions::POLL, 0, 0, TableId::new(40)), -1);
}

#[test]
fn test_ad_hoc_delete_on_export_table_is_a_plan_fault() {
    let mut engine = engine();
    let plan = serde_json::to_vec(&PlanNode::Send {
        input: Box::new(PlanNode::Delete {
            table: "E".into(),
            predicate: None,
        }),
    })
    .unwrap();
    let request = ExecutionRequest::new(FragmentId::new(0), &[]);

    assert_eq!(engine.execute_plan_fragment(&plan, &request), ResultCode::Error);
    let exception = SerializableException::decode(
        engine.buffers().unwrap().exception().as_slice(),
    )
    .unwrap()
    .unwrap();
    assert_eq!(exception.exception_type, ExceptionType::PlanFault);
    assert_eq!(exception.code, ErrorCode::PlanInvalid.as_u16());
}

// =============================================================================
// Rollback properties
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Insert(i32),
    Rename(i32),
    Delete(i32),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..20i32).prop_map(Op::Insert),
        (0..20i32).prop_map(Op::Rename),
        (0..20i32).prop_map(Op::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_undo_restores_state_before_token(
        quanta in prop::collection::vec(prop::collection::vec(op(), 0..6), 1..6),
        undo_from in 0usize..6,
    ) {
        let mut engine = engine();
        let mut snapshots = Vec::new();

        for (i, ops) in quanta.iter().enumerate() {
            snapshots.push(rows_of(&engine, "T"));
            engine.set_undo_token(UndoToken::new(i as i64 + 1)).unwrap();
            for op in ops {
                // failures such as duplicate keys leave the table unchanged
                let _ = match *op {
                    Op::Insert(id) => insert(&mut engine, id, "v"),
                    Op::Rename(id) => run(&mut engine, RENAME_T, &[Value::Integer(id), Value::varchar("w")]),
                    Op::Delete(id) => run(&mut engine, DELETE_T, &[Value::Integer(id)]),
                };
            }
        }

        let k = undo_from % quanta.len();
        engine.undo_undo_token(UndoToken::new(k as i64 + 1));
        prop_assert_eq!(rows_of(&engine, "T"), snapshots[k].clone());
    }

    #[test]
    fn prop_monotonic_tokens_track_the_latest(tokens in prop::collection::vec(1i64..1_000, 1..20)) {
        let mut engine = engine();
        let mut sorted = tokens.clone();
        sorted.sort_unstable();
        for token in sorted {
            engine.set_undo_token(UndoToken::new(token)).unwrap();
            prop_assert_eq!(engine.undo_state(), QuantumState::Active(UndoToken::new(token)));
        }
    }
}
