//! End-to-end tests of the bridge against the in-memory engine.
//!
//! Each test starts its own bridge and buffer pool, so they can run in
//! parallel.

mod common;

use std::sync::Arc;

use bytes::Bytes;
use common::{account, accounts, ctx, numbers, start, start_with, ACCOUNTS, NUMBERS};
use ee_bridge::hashinator::legacy_partition;
use ee_bridge::memory::MemoryEngine;
use ee_bridge::wire::request::FragmentCall;
use ee_bridge::wire::response::{DependencyResult, FragmentResponse};
use ee_bridge::wire::{
    Column, Encode, HashinatorType, ParameterSet, PartitionConfig, Table, Value, ValueType,
};
use ee_bridge::{BridgeError, ExecutionEngine, Opcode};
use ee_buffer::BufferPool;
use ee_common::config::{BridgeConfig, EngineIdentity};
use ee_common::error::{ConstraintType, EngineError, EngineErrorKind};
use ee_common::types::{DependencyId, FragmentId, PartitionId, UndoToken};

const INSERT_ACCOUNT: FragmentId = FragmentId::new(10);
const SCAN_ACCOUNTS: FragmentId = FragmentId::new(11);
const COUNT_INPUT: FragmentId = FragmentId::new(12);

/// Builds a fragment call with typed parameters.
fn call(fragment_id: FragmentId, values: Vec<Value>) -> FragmentCall {
    FragmentCall::new(fragment_id, ParameterSet::from_values(values).unwrap())
}

/// A memory engine with the account fragments registered.
fn account_engine() -> MemoryEngine {
    let mut engine = MemoryEngine::new();
    engine.register_insert(INSERT_ACCOUNT, ACCOUNTS);
    engine.register_scan(SCAN_ACCOUNTS, ACCOUNTS);
    engine.register_fragment(COUNT_INPUT, |ctx, _| {
        let count = ctx.input().map_or(0, Table::row_count);
        Table::new(vec![Column::new("count", ValueType::BigInt)])
            .with_row(vec![Value::BigInt(i64::try_from(count).unwrap())])
            .map_err(|err| EngineError::unexpected(err.to_string()))
    });
    engine
}

fn insert(ee: &mut ExecutionEngine<MemoryEngine>, token: i64, id: i64, owner: &str) {
    ee.execute_plan_fragments(&[call(INSERT_ACCOUNT, account(id, owner))], ctx(token))
        .unwrap();
}

#[test]
fn test_lifecycle_releases_every_buffer() {
    let (mut ee, pool) = start();
    assert!(ee.handle().is_live());
    assert_eq!(pool.stats().live_buffers, 3);

    ee.release().unwrap();
    assert!(!ee.handle().is_live());
    assert!(ee.engine().is_destroyed());
    assert_eq!(pool.stats().live_buffers, 0);
    assert_eq!(pool.stats().leaked(), 0);
}

#[test]
fn test_calls_after_release_never_reach_engine() {
    let (mut ee, _pool) = start();
    ee.release().unwrap();
    let calls = ee.engine().invocations().len();

    assert!(matches!(ee.tick(1, 1), Err(BridgeError::EngineUnavailable)));
    assert!(matches!(
        ee.serialize_table(ACCOUNTS),
        Err(BridgeError::EngineUnavailable)
    ));
    assert!(matches!(
        ee.release_undo_token(UndoToken::new(1)),
        Err(BridgeError::EngineUnavailable)
    ));
    assert!(matches!(ee.release(), Err(BridgeError::EngineUnavailable)));
    assert_eq!(ee.engine().invocations().len(), calls);
}

#[test]
fn test_drop_releases_live_engine() {
    let pool = {
        let (ee, pool) = start();
        assert_eq!(pool.stats().live_buffers, 3);
        drop(ee);
        pool
    };
    assert_eq!(pool.stats().live_buffers, 0);
}

#[test]
fn test_failed_initialize_releases_buffers() {
    common::init_tracing();
    let pool = Arc::new(BufferPool::new());
    let mut engine = MemoryEngine::new();
    engine.fail_next(Opcode::Initialize, Some(EngineError::unexpected("no memory")));

    let err = ExecutionEngine::initialize(
        engine,
        Arc::clone(&pool),
        BridgeConfig::for_testing(),
        PartitionConfig::legacy(2),
    )
    .unwrap_err();
    match err {
        BridgeError::Engine(err) => assert_eq!(err.message, "no memory"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(pool.stats().live_buffers, 0);
}

#[test]
fn test_initialize_rejects_bad_arguments_before_allocating() {
    common::init_tracing();
    let pool = Arc::new(BufferPool::new());

    let err = ExecutionEngine::initialize(
        MemoryEngine::new(),
        Arc::clone(&pool),
        BridgeConfig::for_testing().with_request_buffer_size(0),
        PartitionConfig::legacy(2),
    )
    .unwrap_err();
    assert!(matches!(err, BridgeError::Config(_)));

    let err = ExecutionEngine::initialize(
        MemoryEngine::new(),
        Arc::clone(&pool),
        BridgeConfig::for_testing(),
        PartitionConfig::legacy(0),
    )
    .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArgument { .. }));
    assert_eq!(pool.stats().allocations, 0);
}

#[test]
fn test_engine_receives_identity() {
    let config = BridgeConfig::for_testing().with_engine(EngineIdentity::new(7, PartitionId::new(3)));
    let (ee, _pool) = start_with(MemoryEngine::new(), config);
    let identity = ee.engine().identity().unwrap();
    assert_eq!(identity.site_id, 7);
    assert_eq!(identity.partition_id, PartitionId::new(3));
    assert_eq!(
        ee.engine().invocations()[..3],
        [Opcode::Initialize, Opcode::UpdateHashinator, Opcode::LoadCatalog]
    );
}

#[test]
fn test_fragment_results_follow_submission_order() {
    let (mut ee, _pool) = start_with(account_engine(), BridgeConfig::for_testing());
    let batch = [
        call(INSERT_ACCOUNT, account(1, "ann")),
        call(INSERT_ACCOUNT, account(2, "bob")),
        call(SCAN_ACCOUNTS, vec![]),
    ];

    let results = ee.execute_plan_fragments(&batch, ctx(1)).unwrap();
    assert!(results.dirty);
    assert_eq!(results.len(), 3);
    for (i, dependency) in results.dependencies.iter().enumerate() {
        assert_eq!(dependency.id, DependencyId::new(i32::try_from(i).unwrap()));
    }
    let modified = results.dependencies[0].table.to_table().unwrap();
    assert_eq!(modified.rows(), &[vec![Value::BigInt(1)]]);
    let scanned = results.dependencies[2].table.to_table().unwrap();
    assert_eq!(scanned, accounts(&[(1, "ann"), (2, "bob")]));

    assert!(ee.take_dirty());
    assert!(!ee.is_dirty());
}

#[test]
fn test_read_only_batch_is_clean() {
    let (mut ee, _pool) = start_with(account_engine(), BridgeConfig::for_testing());
    insert(&mut ee, 1, 1, "ann");
    ee.take_dirty();

    let results = ee
        .execute_plan_fragments(&[call(SCAN_ACCOUNTS, vec![])], ctx(2))
        .unwrap();
    assert!(!results.dirty);
    assert_eq!(results.tables().next().unwrap().row_count(), 1);
    assert!(!ee.is_dirty());
}

#[test]
fn test_read_only_call_keeps_unconsumed_mutation() {
    let (mut ee, _pool) = start_with(account_engine(), BridgeConfig::for_testing());
    ee.load_table(ACCOUNTS, &accounts(&[(1, "ann")]), ctx(1), false, false)
        .unwrap();
    assert!(ee.is_dirty());

    assert_eq!(ee.serialize_table(ACCOUNTS).unwrap().row_count(), 1);
    ee.execute_plan_fragments(&[call(SCAN_ACCOUNTS, vec![])], ctx(2))
        .unwrap();
    assert!(ee.take_dirty());

    assert_eq!(ee.serialize_table(ACCOUNTS).unwrap().row_count(), 1);
    assert!(!ee.take_dirty());
}

#[test]
fn test_fragment_reads_input_dependency() {
    let (mut ee, _pool) = start_with(account_engine(), BridgeConfig::for_testing());
    insert(&mut ee, 1, 1, "ann");
    insert(&mut ee, 1, 2, "bob");

    let batch = [
        call(SCAN_ACCOUNTS, vec![]),
        call(COUNT_INPUT, vec![]).with_input_dependency(DependencyId::new(0)),
    ];
    let results = ee.execute_plan_fragments(&batch, ctx(1)).unwrap();
    let count = results.dependencies[1].table.to_table().unwrap();
    assert_eq!(count.rows(), &[vec![Value::BigInt(2)]]);
}

#[test]
fn test_unknown_fragment_is_sql_error() {
    let (mut ee, _pool) = start();
    let err = ee
        .execute_plan_fragments(&[call(FragmentId::new(404), vec![])], ctx(1))
        .unwrap_err();
    assert!(err.is_recoverable());
    match err {
        BridgeError::Engine(err) => {
            assert_eq!(err.kind, EngineErrorKind::Sql);
            assert_eq!(err.sql_state.as_deref(), Some("42000"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_duplicate_key_is_constraint_violation() {
    let (mut ee, _pool) = start_with(account_engine(), BridgeConfig::for_testing());
    insert(&mut ee, 1, 1, "ann");

    let err = ee
        .execute_plan_fragments(&[call(INSERT_ACCOUNT, account(1, "eve"))], ctx(1))
        .unwrap_err();
    match err {
        BridgeError::Engine(err) => {
            assert_eq!(err.kind, EngineErrorKind::ConstraintViolation);
            let constraint = err.constraint.unwrap();
            assert_eq!(constraint.constraint_type, ConstraintType::PrimaryKey);
            assert_eq!(constraint.table_name, "accounts");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_failure_without_details_reports_status() {
    let (mut ee, _pool) = start();
    ee.engine_mut().fail_next(Opcode::Tick, None);
    assert!(matches!(
        ee.tick(5, 4),
        Err(BridgeError::EngineStatus { status: 1 })
    ));

    ee.engine_mut().fail_next(Opcode::TableHashCode, None);
    assert!(matches!(
        ee.table_hash_code(ACCOUNTS),
        Err(BridgeError::EngineStatus { status: -1 })
    ));

    // The handle stays usable.
    ee.tick(6, 5).unwrap();
    assert_eq!(ee.engine().last_tick(), Some((6, 5)));
}

#[test]
fn test_undo_rolls_back_token_and_later_tokens() {
    let (mut ee, _pool) = start_with(account_engine(), BridgeConfig::for_testing());
    insert(&mut ee, 1, 1, "ann");
    insert(&mut ee, 2, 2, "bob");
    insert(&mut ee, 3, 3, "cy");
    assert_eq!(ee.engine().row_count(ACCOUNTS), Some(3));

    ee.undo_undo_token(UndoToken::new(2)).unwrap();
    assert!(ee.is_dirty());
    assert_eq!(ee.engine().row_count(ACCOUNTS), Some(1));
    assert_eq!(ee.engine().row(ACCOUNTS, &Value::BigInt(1)), Some(account(1, "ann")));

    let calls = ee.engine().invocations().len();
    for token in [2, 3] {
        assert!(matches!(
            ee.release_undo_token(UndoToken::new(token)),
            Err(BridgeError::UndoTokenMisuse { .. })
        ));
    }
    assert!(matches!(
        ee.execute_plan_fragments(&[call(SCAN_ACCOUNTS, vec![])], ctx(3)),
        Err(BridgeError::UndoTokenMisuse { .. })
    ));
    assert_eq!(ee.engine().invocations().len(), calls);

    ee.release_undo_token(UndoToken::new(1)).unwrap();
    assert_eq!(ee.undo_ledger().outstanding().count(), 0);
    assert_eq!(ee.engine().row_count(ACCOUNTS), Some(1));
}

#[test]
fn test_release_with_newer_outstanding_token_is_rejected() {
    let (mut ee, _pool) = start_with(account_engine(), BridgeConfig::for_testing());
    insert(&mut ee, 1, 1, "ann");
    insert(&mut ee, 2, 2, "bob");
    let calls = ee.engine().invocations().len();

    let err = ee.release_undo_token(UndoToken::new(1)).unwrap_err();
    assert!(matches!(err, BridgeError::UndoTokenMisuse { .. }));
    assert!(matches!(
        ee.undo_undo_token(UndoToken::new(9)),
        Err(BridgeError::UndoTokenMisuse { .. })
    ));
    assert_eq!(ee.engine().invocations().len(), calls);

    ee.release_undo_token(UndoToken::new(2)).unwrap();
    assert!(!ee.undo_ledger().is_outstanding(UndoToken::new(1)));
}

#[test]
fn test_load_table_returns_unique_violations() {
    let (mut ee, _pool) = start();
    let first = ee
        .load_table(ACCOUNTS, &accounts(&[(1, "ann"), (2, "bob")]), ctx(1), false, false)
        .unwrap();
    assert!(first.is_none());
    assert!(ee.is_dirty());

    let violations = ee
        .load_table(ACCOUNTS, &accounts(&[(2, "zed"), (3, "cy")]), ctx(2), true, false)
        .unwrap()
        .unwrap();
    assert_eq!(violations, accounts(&[(2, "zed")]));
    assert_eq!(ee.engine().row_count(ACCOUNTS), Some(3));
}

#[test]
fn test_load_table_collision_loads_nothing() {
    let (mut ee, _pool) = start();
    ee.load_table(ACCOUNTS, &accounts(&[(1, "ann")]), ctx(1), false, false)
        .unwrap();

    let err = ee
        .load_table(ACCOUNTS, &accounts(&[(2, "bob"), (1, "eve")]), ctx(2), false, false)
        .unwrap_err();
    assert_eq!(err.code(), ee_common::error::ErrorCode::ConstraintViolation);
    assert_eq!(ee.engine().row_count(ACCOUNTS), Some(1));

    let err = ee
        .load_table(ACCOUNTS, &numbers(0..1), ctx(3), false, false)
        .unwrap_err();
    assert!(matches!(err, BridgeError::Engine(ref e) if e.kind == EngineErrorKind::Sql));
}

#[test]
fn test_load_table_counts_replicated_rows() {
    let (mut ee, _pool) = start();
    ee.load_table(NUMBERS, &numbers(0..5), ctx(1), false, true)
        .unwrap();
    ee.load_table(NUMBERS, &numbers(5..8), ctx(2), false, false)
        .unwrap();
    assert_eq!(ee.engine().dr_rows(), 5);
}

#[test]
fn test_serialize_table_and_hash_code() {
    let (mut ee, _pool) = start();
    let empty_hash = ee.table_hash_code(ACCOUNTS).unwrap();
    let rows = accounts(&[(1, "ann"), (2, "bob")]);
    ee.load_table(ACCOUNTS, &rows, ctx(1), false, false).unwrap();

    let view = ee.serialize_table(ACCOUNTS).unwrap();
    assert_eq!(view.row_count(), 2);
    assert_eq!(view.to_table().unwrap(), rows);

    let hash = ee.table_hash_code(ACCOUNTS).unwrap();
    assert!(hash >= 0);
    assert_ne!(hash, empty_hash);

    let (mut other, _pool) = start();
    other
        .load_table(ACCOUNTS, &rows, ctx(1), false, false)
        .unwrap();
    assert_eq!(other.table_hash_code(ACCOUNTS).unwrap(), hash);
}

#[test]
fn test_unknown_table_is_reported() {
    let (mut ee, _pool) = start();
    let err = ee.serialize_table(ee_common::types::TableId::new(99)).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Engine(ref e) if e.sql_state.as_deref() == Some("42S02")
    ));
}

#[test]
fn test_update_catalog_keeps_unchanged_tables() {
    let (mut ee, _pool) = start();
    ee.load_table(ACCOUNTS, &accounts(&[(1, "ann")]), ctx(1), false, false)
        .unwrap();
    assert!(ee.load_catalog(2, &common::catalog()).is_err());

    ee.update_catalog(3, &common::catalog()).unwrap();
    assert_eq!(ee.engine().row_count(ACCOUNTS), Some(1));
}

#[test]
fn test_tick_and_quiesce_reach_engine() {
    let (mut ee, _pool) = start();
    ee.tick(1_000, 41).unwrap();
    ee.quiesce(42).unwrap();
    assert_eq!(ee.engine().last_tick(), Some((1_000, 41)));
    assert_eq!(ee.engine().last_quiesce(), Some(42));
}

#[test]
fn test_engine_allocated_responses_are_read() {
    let (mut ee, _pool) = start();
    ee.engine_mut().set_force_fallback(true);
    let rows = accounts(&[(1, "ann"), (2, "bob")]);
    ee.load_table(ACCOUNTS, &rows, ctx(1), false, false).unwrap();
    assert!(ee.is_dirty());

    assert_eq!(ee.serialize_table(ACCOUNTS).unwrap().to_table().unwrap(), rows);
    assert_eq!(ee.validate_partitioning(&PartitionConfig::legacy(1)).unwrap(), vec![0, 0]);
}

#[test]
fn test_supplied_fallback_serves_one_call() {
    let (mut ee, _pool) = start();
    ee.load_table(ACCOUNTS, &accounts(&[(1, "ann")]), ctx(1), false, false)
        .unwrap();

    let supplied = accounts(&[(42, "elsewhere")]);
    let response = FragmentResponse {
        dirty: false,
        dependencies: vec![DependencyResult {
            id: DependencyId::new(0),
            table: supplied.to_bytes(),
        }],
    };
    ee.fallback_to_engine_allocated_buffer(response.to_bytes());
    assert_eq!(ee.serialize_table(ACCOUNTS).unwrap().to_table().unwrap(), supplied);

    // The next call reads the response buffer again.
    assert_eq!(
        ee.serialize_table(ACCOUNTS).unwrap().to_table().unwrap(),
        accounts(&[(1, "ann")])
    );
}

#[test]
fn test_newer_supplied_fallback_replaces_unread_one() {
    let (mut ee, _pool) = start();
    ee.fallback_to_engine_allocated_buffer(Bytes::from_static(&[0, 0, 0, 9, 0]));
    assert!(ee.has_pending_fallback());

    let supplied = accounts(&[(7, "late")]);
    let response = FragmentResponse {
        dirty: false,
        dependencies: vec![DependencyResult {
            id: DependencyId::new(0),
            table: supplied.to_bytes(),
        }],
    };
    ee.fallback_to_engine_allocated_buffer(response.to_bytes());
    assert_eq!(ee.serialize_table(ACCOUNTS).unwrap().to_table().unwrap(), supplied);
    assert!(!ee.has_pending_fallback());
}

#[test]
fn test_garbage_fallback_is_malformed() {
    let (mut ee, _pool) = start();
    ee.fallback_to_engine_allocated_buffer(Bytes::from_static(&[0, 0, 0, 9, 0]));
    let err = ee.serialize_table(ACCOUNTS).unwrap_err();
    assert!(matches!(err, BridgeError::MalformedResponse(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_validate_partitioning_counts_misplaced_rows() {
    let (mut ee, _pool) = start();
    ee.load_table(NUMBERS, &numbers(0..50), ctx(1), false, false)
        .unwrap();

    let expected = (0..50)
        .filter(|id| legacy_partition(&Value::BigInt(*id), 4) != 0)
        .count();
    let counts = ee.validate_partitioning(&PartitionConfig::legacy(4)).unwrap();
    assert_eq!(counts, vec![0, i64::try_from(expected).unwrap()]);
    assert!(expected > 0);
}

#[test]
fn test_hashinate_agrees_with_local_routing() {
    let (mut ee, _pool) = start();
    let config = PartitionConfig::legacy(2);
    for id in 0..32 {
        let value = Value::BigInt(id);
        let remote = ee.hashinate(&value, &config).unwrap();
        assert_eq!(remote, ee.partition_for(&value));
    }
    let text = Value::from("routing key");
    assert_eq!(ee.hashinate(&text, &config).unwrap(), ee.partition_for(&text));
}

#[test]
fn test_update_hashinator_by_ring_pointer() {
    let (mut ee, _pool) = start();
    let ring = PartitionConfig::elastic(&[
        (i32::MIN, PartitionId::new(0)),
        (-1_000_000, PartitionId::new(1)),
        (0, PartitionId::new(2)),
        (1_000_000, PartitionId::new(3)),
    ]);
    let pointer = ee.engine_mut().install_ring(&ring);

    let err = ee
        .update_hashinator(ring.clone().with_ring_pointer(pointer + 100))
        .unwrap_err();
    assert!(matches!(err, BridgeError::Engine(_)));
    assert_eq!(ee.hashinator().kind(), HashinatorType::Legacy);

    ee.update_hashinator(ring.clone().with_ring_pointer(pointer))
        .unwrap();
    assert_eq!(ee.hashinator().kind(), HashinatorType::Elastic);
    assert_eq!(
        ee.engine().hashinator().map(|h| h.kind()),
        Some(HashinatorType::Elastic)
    );
    for id in 0..16 {
        let value = Value::BigInt(id);
        assert_eq!(
            ee.partition_for(&value),
            ee.engine().hashinator().unwrap().partition_for(&value)
        );
    }
}

#[test]
fn test_invalid_ring_is_rejected_locally() {
    let (mut ee, _pool) = start();
    let calls = ee.engine().invocations().len();
    let unordered = PartitionConfig::elastic(&[(10, PartitionId::new(0)), (5, PartitionId::new(1))]);
    assert!(matches!(
        ee.update_hashinator(unordered),
        Err(BridgeError::InvalidArgument { .. })
    ));
    assert_eq!(ee.engine().invocations().len(), calls);
}

#[test]
fn test_oversized_request_is_refused() {
    let config = BridgeConfig::for_testing().with_max_request_size(8 * 1024);
    let (mut ee, _pool) = start_with(account_engine(), config);
    let calls = ee.engine().invocations().len();

    let blob = Value::VarBinary(Bytes::from(vec![7u8; 16 * 1024]));
    let err = ee
        .execute_plan_fragments(&[call(SCAN_ACCOUNTS, vec![blob])], ctx(1))
        .unwrap_err();
    assert!(matches!(err, BridgeError::RequestTooLarge { max: 8192, .. }));
    assert!(err.is_fatal());
    assert_eq!(ee.engine().invocations().len(), calls);
}

#[test]
fn test_oversized_result_table_is_refused() {
    let config = BridgeConfig::for_testing().with_max_table_size(64);
    let (mut ee, _pool) = start_with(MemoryEngine::new(), config);
    ee.load_table(NUMBERS, &numbers(0..20), ctx(1), false, false)
        .unwrap();
    let err = ee.serialize_table(NUMBERS).unwrap_err();
    assert!(matches!(err, BridgeError::TableTooLarge { max: 64, .. }));
}
