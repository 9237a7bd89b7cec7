//! Binary log application through the bridge.

mod common;

use common::{account, accounts, ctx, start, ACCOUNTS};
use ee_bridge::wire::{BinaryLogSegment, Conflict, ConflictKind, Encode, LogRecord, Value};
use ee_bridge::{ApplyOutcome, BridgeError};
use ee_common::types::{ClusterId, ReplicationContext, UndoToken};

fn replication_ctx(token: i64) -> ReplicationContext {
    ReplicationContext::new(ctx(token), ClusterId::new(2))
}

#[test]
fn test_clean_segment_applies_every_record() {
    let (mut ee, _pool) = start();
    let segment = BinaryLogSegment::new()
        .with(LogRecord::insert(ACCOUNTS, account(1, "ann")))
        .with(LogRecord::insert(ACCOUNTS, account(2, "bob")))
        .with(LogRecord::update(ACCOUNTS, account(1, "anne")));

    let outcome = ee
        .apply_binary_log(&segment.to_bytes(), &replication_ctx(1))
        .unwrap();
    assert_eq!(
        outcome,
        ApplyOutcome {
            applied_rows: 3,
            conflicts: vec![],
        }
    );
    assert!(ee.is_dirty());
    assert_eq!(ee.engine().row(ACCOUNTS, &Value::BigInt(1)), Some(account(1, "anne")));
}

#[test]
fn test_conflicting_records_are_reported() {
    let (mut ee, _pool) = start();
    ee.load_table(ACCOUNTS, &accounts(&[(1, "ann"), (2, "bob")]), ctx(1), false, false)
        .unwrap();

    let segment = BinaryLogSegment::new()
        .with(LogRecord::insert(ACCOUNTS, account(1, "ann")))
        .with(LogRecord::insert(ACCOUNTS, account(2, "zed")))
        .with(LogRecord::delete(ACCOUNTS, account(9, "nobody")))
        .with(LogRecord::insert(ACCOUNTS, account(3, "cy")))
        .with(LogRecord::update(ACCOUNTS, account(1, "anne")));
    let outcome = ee
        .apply_binary_log(&segment.to_bytes(), &replication_ctx(2))
        .unwrap();

    assert!(!outcome.is_clean());
    assert_eq!(outcome.applied_rows, 2);
    assert_eq!(
        outcome.conflicts,
        vec![
            Conflict {
                record_index: 0,
                kind: ConflictKind::Duplicate,
            },
            Conflict {
                record_index: 1,
                kind: ConflictKind::ExistingRow,
            },
            Conflict {
                record_index: 2,
                kind: ConflictKind::MissingRow,
            },
        ]
    );
    assert_eq!(outcome.count_of(ConflictKind::MissingRow), 1);
    assert_eq!(ee.engine().row(ACCOUNTS, &Value::BigInt(2)), Some(account(2, "bob")));

    let totals = ee.replication();
    assert_eq!(totals.segments(), 1);
    assert_eq!(totals.applied_rows(), 2);
    assert_eq!(totals.conflicts(), 3);
}

#[test]
fn test_malformed_record_rejects_segment() {
    let (mut ee, _pool) = start();
    let segment = BinaryLogSegment::new()
        .with(LogRecord::insert(ACCOUNTS, account(1, "ann")))
        .with(LogRecord::insert(ACCOUNTS, vec![Value::BigInt(2)]));

    let err = ee
        .apply_binary_log(&segment.to_bytes(), &replication_ctx(1))
        .unwrap_err();
    assert!(matches!(err, BridgeError::Engine(_)));
    assert_eq!(ee.engine().row_count(ACCOUNTS), Some(0));
    assert_eq!(ee.replication().segments(), 0);
}

#[test]
fn test_applied_segment_can_be_undone() {
    let (mut ee, _pool) = start();
    ee.load_table(ACCOUNTS, &accounts(&[(1, "ann")]), ctx(1), false, false)
        .unwrap();
    ee.release_undo_token(UndoToken::new(1)).unwrap();

    let segment = BinaryLogSegment::new()
        .with(LogRecord::delete(ACCOUNTS, account(1, "ann")))
        .with(LogRecord::insert(ACCOUNTS, account(5, "eve")));
    ee.apply_binary_log(&segment.to_bytes(), &replication_ctx(2))
        .unwrap();
    assert_eq!(ee.engine().row(ACCOUNTS, &Value::BigInt(1)), None);

    ee.undo_undo_token(UndoToken::new(2)).unwrap();
    assert_eq!(ee.engine().row(ACCOUNTS, &Value::BigInt(1)), Some(account(1, "ann")));
    assert_eq!(ee.engine().row_count(ACCOUNTS), Some(1));
}

#[test]
fn test_garbage_segment_is_engine_error() {
    let (mut ee, _pool) = start();
    let err = ee
        .apply_binary_log(&[0xFF, 0x01], &replication_ctx(1))
        .unwrap_err();
    assert!(err.is_recoverable());
}
