//! Helpers shared by the bridge integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use ee_bridge::memory::MemoryEngine;
use ee_bridge::wire::{Catalog, CatalogTable, Column, PartitionConfig, Table, Value, ValueType};
use ee_bridge::ExecutionEngine;
use ee_buffer::BufferPool;
use ee_common::config::BridgeConfig;
use ee_common::types::{TableId, TxnContext, UndoToken};
use tracing_subscriber::EnvFilter;

/// `accounts(id BIGINT, owner VARCHAR)`.
pub const ACCOUNTS: TableId = TableId::new(1);

/// `numbers(id BIGINT)`.
pub const NUMBERS: TableId = TableId::new(2);

/// Installs a test subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn account_columns() -> Vec<Column> {
    vec![
        Column::new("id", ValueType::BigInt),
        Column::new("owner", ValueType::String),
    ]
}

pub fn number_columns() -> Vec<Column> {
    vec![Column::new("id", ValueType::BigInt)]
}

/// Catalog with the `accounts` and `numbers` tables.
pub fn catalog() -> Catalog {
    Catalog::new()
        .with_table(CatalogTable::new(ACCOUNTS, "accounts", account_columns()))
        .unwrap()
        .with_table(CatalogTable::new(NUMBERS, "numbers", number_columns()))
        .unwrap()
}

pub fn account(id: i64, owner: &str) -> Vec<Value> {
    vec![Value::BigInt(id), Value::from(owner)]
}

pub fn accounts(rows: &[(i64, &str)]) -> Table {
    let mut table = Table::new(account_columns());
    for (id, owner) in rows {
        table.push_row(account(*id, owner)).unwrap();
    }
    table
}

pub fn numbers(ids: std::ops::Range<i64>) -> Table {
    let mut table = Table::new(number_columns());
    for id in ids {
        table.push_row(vec![Value::BigInt(id)]).unwrap();
    }
    table
}

/// A transaction context bound to undo token `token`.
pub fn ctx(token: i64) -> TxnContext {
    TxnContext::new(token, token, token - 1, token, UndoToken::new(token))
}

/// Starts a bridge over `engine` with `config` and loads [`catalog`].
pub fn start_with(
    engine: MemoryEngine,
    config: BridgeConfig,
) -> (ExecutionEngine<MemoryEngine>, Arc<BufferPool>) {
    init_tracing();
    let pool = Arc::new(BufferPool::new());
    let mut ee =
        ExecutionEngine::initialize(engine, Arc::clone(&pool), config, PartitionConfig::legacy(2))
            .unwrap();
    ee.load_catalog(1, &catalog()).unwrap();
    (ee, pool)
}

/// Starts a bridge over a fresh memory engine with test buffer sizes.
pub fn start() -> (ExecutionEngine<MemoryEngine>, Arc<BufferPool>) {
    start_with(MemoryEngine::new(), BridgeConfig::for_testing())
}
