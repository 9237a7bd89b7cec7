//! Export streams and recovery messages through the bridge.

mod common;

use common::{account, accounts, ctx, numbers, start, start_with, ACCOUNTS, NUMBERS};
use ee_bridge::memory::MemoryEngine;
use ee_bridge::wire::request::FragmentCall;
use ee_bridge::wire::{ExportBlock, ExportPositions, ParameterSet, StreamType, Table, Value};
use ee_bridge::{BridgeError, ExecutionEngine, StreamDestination};
use ee_common::config::BridgeConfig;
use ee_common::error::EngineErrorKind;
use ee_common::types::{FragmentId, PartitionId, UndoToken};

const INSERT_ACCOUNT: FragmentId = FragmentId::new(20);
const SIGNATURE: &str = "accounts";

fn records(rows: &[Vec<Value>]) -> Vec<u8> {
    let mut out = Vec::new();
    for row in rows {
        Table::encode_row(row, &mut out);
    }
    out
}

fn offset(rows: &[Vec<Value>]) -> i64 {
    i64::try_from(records(rows).len()).unwrap()
}

fn poll(ee: &mut ExecutionEngine<MemoryEngine>, ack_offset: i64, seq_no: i64) -> ExportBlock {
    ee.export_action(false, ack_offset, seq_no, PartitionId::new(0), SIGNATURE)
        .unwrap()
}

#[test]
fn test_released_rows_reach_export_stream() {
    let (mut ee, _pool) = start();
    assert!(ee.engine_mut().enable_export(ACCOUNTS));
    let first = vec![account(1, "ann"), account(2, "bob")];
    ee.load_table(ACCOUNTS, &accounts(&[(1, "ann"), (2, "bob")]), ctx(1), false, false)
        .unwrap();
    assert_eq!(ee.export_positions(SIGNATURE).unwrap().uso, 0);

    ee.release_undo_token(UndoToken::new(1)).unwrap();
    assert_eq!(
        ee.export_positions(SIGNATURE).unwrap(),
        ExportPositions {
            uso: offset(&first),
            seq_no: -1,
        }
    );

    let block = poll(&mut ee, 0, -1);
    assert_eq!(block.uso, 0);
    assert_eq!(Table::decode_rows(&block.data).unwrap(), first);

    let acked = poll(&mut ee, block.end_uso(), 1);
    assert!(acked.is_empty());
    assert_eq!(acked.uso, block.end_uso());
    assert_eq!(ee.export_positions(SIGNATURE).unwrap().seq_no, 1);
}

#[test]
fn test_partial_ack_keeps_the_rest() {
    let (mut ee, _pool) = start();
    ee.engine_mut().enable_export(ACCOUNTS);
    ee.load_table(
        ACCOUNTS,
        &accounts(&[(1, "ann"), (2, "bob"), (3, "cy")]),
        ctx(1).with_undo_token(UndoToken::NO_UNDO),
        false,
        false,
    )
    .unwrap();

    let first_row = offset(&[account(1, "ann")]);
    let block = poll(&mut ee, first_row, 0);
    assert_eq!(block.uso, first_row);
    assert_eq!(
        Table::decode_rows(&block.data).unwrap(),
        vec![account(2, "bob"), account(3, "cy")]
    );
}

#[test]
fn test_undone_rows_are_never_exported() {
    let (mut ee, _pool) = start();
    ee.engine_mut().enable_export(ACCOUNTS);
    ee.load_table(ACCOUNTS, &accounts(&[(1, "ann")]), ctx(1), false, false)
        .unwrap();
    ee.undo_undo_token(UndoToken::new(1)).unwrap();
    ee.load_table(ACCOUNTS, &accounts(&[(2, "bob")]), ctx(2), false, false)
        .unwrap();
    ee.release_undo_token(UndoToken::new(2)).unwrap();

    let block = poll(&mut ee, 0, -1);
    assert_eq!(Table::decode_rows(&block.data).unwrap(), vec![account(2, "bob")]);
}

#[test]
fn test_fragment_inserts_are_exported() {
    let mut engine = MemoryEngine::new();
    engine.register_insert(INSERT_ACCOUNT, ACCOUNTS);
    let (mut ee, _pool) = start_with(engine, BridgeConfig::for_testing());
    ee.engine_mut().enable_export(ACCOUNTS);

    let call = FragmentCall::new(
        INSERT_ACCOUNT,
        ParameterSet::from_values(account(9, "ivy")).unwrap(),
    );
    ee.execute_plan_fragments(&[call], ctx(1)).unwrap();
    ee.release_undo_token(UndoToken::new(1)).unwrap();

    let block = poll(&mut ee, 0, -1);
    assert_eq!(Table::decode_rows(&block.data).unwrap(), vec![account(9, "ivy")]);
}

#[test]
fn test_sync_realigns_stream() {
    let (mut ee, _pool) = start();
    ee.engine_mut().enable_export(ACCOUNTS);
    ee.load_table(
        ACCOUNTS,
        &accounts(&[(1, "ann")]),
        ctx(1).with_undo_token(UndoToken::NO_UNDO),
        false,
        false,
    )
    .unwrap();

    let block = ee
        .export_action(true, 1_000, 5, PartitionId::new(0), SIGNATURE)
        .unwrap();
    assert!(block.is_empty());
    assert_eq!(block.uso, 1_000);
    assert_eq!(
        ee.export_positions(SIGNATURE).unwrap(),
        ExportPositions {
            uso: 1_000,
            seq_no: 5,
        }
    );

    ee.load_table(
        ACCOUNTS,
        &accounts(&[(2, "bob")]),
        ctx(2).with_undo_token(UndoToken::NO_UNDO),
        false,
        false,
    )
    .unwrap();
    let block = poll(&mut ee, 0, -1);
    assert_eq!(block.uso, 1_000);
    assert_eq!(Table::decode_rows(&block.data).unwrap(), vec![account(2, "bob")]);
}

#[test]
fn test_export_errors_are_surfaced() {
    let (mut ee, _pool) = start();
    ee.engine_mut().enable_export(ACCOUNTS);

    let err = ee
        .export_action(false, 0, -1, PartitionId::new(0), "numbers")
        .unwrap_err();
    match &err {
        BridgeError::Engine(engine) => assert_eq!(engine.sql_state.as_deref(), Some("42S02")),
        other => panic!("expected an engine error, got {other:?}"),
    }
    assert!(err.is_recoverable());
    assert!(ee.export_positions("numbers").is_err());

    let err = ee
        .export_action(false, 64, -1, PartitionId::new(0), SIGNATURE)
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Engine(ref engine) if engine.kind == EngineErrorKind::EeException
    ));
    assert_eq!(ee.export_positions(SIGNATURE).unwrap().uso, 0);
}

#[test]
fn test_recovery_stream_rebuilds_table() {
    let (mut source, _source_pool) = start();
    source
        .load_table(NUMBERS, &numbers(0..50), ctx(1), false, false)
        .unwrap();
    source.release_undo_token(UndoToken::new(1)).unwrap();
    source
        .activate_table_stream(NUMBERS, StreamType::Recovery, UndoToken::NO_UNDO, &[])
        .unwrap();

    let (mut target, _target_pool) = start();
    let mut dest = [StreamDestination::new(PartitionId::new(0), 128)];
    let mut messages = 0;
    let mut loaded = 0;
    loop {
        let progress = source
            .table_stream_serialize_more(NUMBERS, StreamType::Recovery, &mut dest)
            .unwrap();
        let filled = usize::try_from(progress.positions[0]).unwrap();
        loaded += target
            .process_recovery_message(NUMBERS, dest[0].filled(filled))
            .unwrap();
        messages += 1;
        if progress.is_complete() {
            break;
        }
    }

    assert!(messages > 1);
    assert_eq!(loaded, 50);
    assert!(target.take_dirty());
    assert_eq!(
        target.table_hash_code(NUMBERS).unwrap(),
        source.table_hash_code(NUMBERS).unwrap()
    );
}

#[test]
fn test_recovery_skips_present_rows_and_rejects_conflicts() {
    let (mut ee, _pool) = start();
    ee.load_table(ACCOUNTS, &accounts(&[(1, "ann")]), ctx(1), false, false)
        .unwrap();

    let rows = records(&[account(1, "ann"), account(2, "bob")]);
    assert_eq!(ee.process_recovery_message(ACCOUNTS, &rows).unwrap(), 1);

    let conflicting = records(&[account(3, "cy"), account(2, "zed")]);
    let err = ee.process_recovery_message(ACCOUNTS, &conflicting).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Engine(ref engine) if engine.kind == EngineErrorKind::ConstraintViolation
    ));
    assert_eq!(ee.engine().row(ACCOUNTS, &Value::BigInt(2)), Some(account(2, "bob")));
    assert_eq!(ee.engine().row(ACCOUNTS, &Value::BigInt(3)), None);
}

#[test]
fn test_recovered_rows_survive_undo() {
    let (mut ee, _pool) = start();
    ee.load_table(ACCOUNTS, &accounts(&[(1, "ann")]), ctx(1), false, false)
        .unwrap();
    ee.process_recovery_message(ACCOUNTS, &records(&[account(2, "bob")]))
        .unwrap();

    ee.undo_undo_token(UndoToken::new(1)).unwrap();
    assert_eq!(ee.engine().row(ACCOUNTS, &Value::BigInt(1)), None);
    assert_eq!(ee.engine().row(ACCOUNTS, &Value::BigInt(2)), Some(account(2, "bob")));
}

#[test]
fn test_malformed_recovery_message_loads_nothing() {
    let (mut ee, _pool) = start();
    let err = ee
        .process_recovery_message(NUMBERS, &[0, 0, 0, 9, 1])
        .unwrap_err();
    assert!(err.is_recoverable());

    let wrong_shape = records(&[account(1, "ann")]);
    assert!(ee.process_recovery_message(NUMBERS, &wrong_shape).is_err());
    assert_eq!(ee.engine().row_count(NUMBERS), Some(0));
    assert!(!ee.is_dirty());
}
