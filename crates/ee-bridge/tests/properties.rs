//! Property tests for request framing and partition hashing.

mod common;

use std::sync::Arc;

use bytes::Bytes;
use common::{ctx, start_with};
use ee_bridge::hashinator::{legacy_partition, value_hash};
use ee_bridge::memory::MemoryEngine;
use ee_bridge::wire::request::{FragmentBatch, FragmentCall};
use ee_bridge::wire::{Column, Encode, ParameterSet, PartitionConfig, Table, Value, ValueType};
use ee_bridge::{Hashinator, RequestEncoder};
use ee_buffer::BufferPool;
use ee_common::config::BridgeConfig;
use ee_common::types::{FragmentId, PartitionId};
use proptest::prelude::*;

const ECHO: FragmentId = FragmentId::new(1);

fn blob(len: usize, fill: u8) -> Value {
    Value::VarBinary(Bytes::from(vec![fill; len]))
}

fn batch_params(lens: &[usize]) -> Vec<FragmentCall> {
    lens.iter()
        .enumerate()
        .map(|(i, len)| {
            let fill = u8::try_from(i % 251).unwrap();
            let params = ParameterSet::from_values(vec![Value::BigInt(i as i64), blob(*len, fill)])
                .unwrap();
            FragmentCall::new(ECHO, params)
        })
        .collect()
}

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i8>().prop_map(Value::TinyInt),
        any::<i16>().prop_map(Value::SmallInt),
        any::<i32>().prop_map(Value::Integer),
        any::<i64>().prop_map(Value::BigInt),
        "[a-z0-9]{0,24}".prop_map(Value::String),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(|b| Value::VarBinary(Bytes::from(b))),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_encoder_growth_is_invisible(lens in prop::collection::vec(0usize..20_000, 1..6)) {
        let fragments = batch_params(&lens);
        let batch = FragmentBatch { ctx: ctx(1), fragments: &fragments };

        let pool = Arc::new(BufferPool::new());
        let mut small = RequestEncoder::new(Arc::clone(&pool), 64, usize::MAX).unwrap();
        let mut large = RequestEncoder::new(Arc::clone(&pool), 1 << 20, usize::MAX).unwrap();

        let grown = small.encode(&batch).unwrap().to_vec();
        let direct = large.encode(&batch).unwrap().to_vec();
        prop_assert_eq!(&grown, &direct);
        prop_assert!(small.capacity() >= grown.len());

        let decoded = FragmentBatch::decode(&grown).unwrap();
        prop_assert_eq!(decoded.fragments.len(), fragments.len());
        for (sent, seen) in fragments.iter().zip(&decoded.fragments) {
            prop_assert_eq!(seen.fragment_id, sent.fragment_id);
            prop_assert_eq!(seen.parameter_set().unwrap(), sent.params.to_parameter_set().unwrap());
        }
    }

    #[test]
    fn prop_legacy_hash_is_stable_and_bounded(value in value_strategy(), partitions in 1i32..1024) {
        let first = legacy_partition(&value, partitions);
        prop_assert!((0..partitions).contains(&first));
        prop_assert_eq!(first, legacy_partition(&value, partitions));
        prop_assert_eq!(value_hash(&value), value_hash(&value.clone()));

        let hashinator = Hashinator::new(PartitionConfig::legacy(partitions)).unwrap();
        prop_assert_eq!(hashinator.partition_for(&value), PartitionId::new(first));
    }

    #[test]
    fn prop_elastic_ring_owner_is_in_ring(
        value in value_strategy(),
        tokens in prop::collection::btree_set(any::<i32>(), 1..32),
    ) {
        let count = i32::try_from(tokens.len()).unwrap();
        let ring: Vec<(i32, PartitionId)> = tokens
            .iter()
            .zip(0..)
            .map(|(token, owner)| (*token, PartitionId::new(owner)))
            .collect();
        let hashinator = Hashinator::new(PartitionConfig::elastic(&ring)).unwrap();

        let owner = hashinator.partition_for(&value);
        prop_assert!((0..count).contains(&owner.as_i32()));
        prop_assert_eq!(owner, hashinator.partition_for(&value));
    }
}

/// One fragment per 64 KiB blob, each blob filled with its fragment index.
fn large_fragments(count: u8) -> Vec<FragmentCall> {
    (0..count)
        .map(|i| {
            let params = ParameterSet::from_values(vec![blob(64 * 1024, i)]).unwrap();
            FragmentCall::new(ECHO, params)
        })
        .collect()
}

#[test]
fn test_hundred_large_fragments_survive_growth() {
    let pool = Arc::new(BufferPool::new());
    let mut encoder = RequestEncoder::new(Arc::clone(&pool), 256 * 1024, usize::MAX).unwrap();
    let fragments = large_fragments(100);

    let bytes = encoder
        .encode(&FragmentBatch {
            ctx: ctx(1),
            fragments: &fragments,
        })
        .unwrap()
        .to_vec();
    assert!(pool.stats().grows >= 1);
    assert!(encoder.capacity() > 100 * 64 * 1024);

    let decoded = FragmentBatch::decode(&bytes).unwrap();
    assert_eq!(decoded.fragments.len(), 100);
    for (i, (sent, seen)) in (0u8..).zip(fragments.iter().zip(&decoded.fragments)) {
        assert_eq!(seen.fragment_id, ECHO);
        let expected = sent.params.to_parameter_set().unwrap().to_bytes();
        assert_eq!(seen.params, &expected[..]);
        assert_eq!(seen.parameter_set().unwrap().values(), &[blob(64 * 1024, i)]);
    }
}

#[test]
fn test_hundred_large_fragments_reach_engine_in_order() {
    let mut engine = MemoryEngine::new();
    engine.register_fragment(ECHO, |_, params| {
        let mut table = Table::new(vec![Column::new("payload", ValueType::VarBinary)]);
        for value in params.values() {
            table
                .push_row(vec![value.clone()])
                .map_err(|err| ee_common::error::EngineError::unexpected(err.to_string()))?;
        }
        Ok(table)
    });
    let config = BridgeConfig::for_testing().with_request_buffer_size(256 * 1024);
    let (mut ee, pool) = start_with(engine, config);

    let fragments = large_fragments(100);
    let results = ee.execute_plan_fragments(&fragments, ctx(1)).unwrap();
    assert_eq!(results.len(), 100);
    for (i, dependency) in (0u8..).zip(&results.dependencies) {
        let echoed = dependency.table.to_table().unwrap();
        assert_eq!(echoed.rows(), &[vec![blob(64 * 1024, i)]]);
    }

    assert!(pool.stats().grows >= 1);
    assert!(ee.request_capacity().unwrap() > 100 * 64 * 1024);
}
