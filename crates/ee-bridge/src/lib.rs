//! # ee-bridge
//!
//! The call bridge between a transaction-processing tier and an execution
//! engine.
//!
//! An [`ExecutionEngine`] frames typed requests into pooled buffers,
//! invokes the engine through the [`Engine`] trait, and decodes typed
//! responses or errors. It also owns the state that spans calls:
//!
//! - **Undo tokens**: [`UndoLedger`] validates issue, release and undo
//! - **Table streams**: [`StreamCursors`] drive multi-call table copies
//! - **Partitioning**: [`Hashinator`] routes values under the active map
//! - **Replication**: [`ReplicationApplier`] totals applied log segments
//!
//! ```text
//!            ┌───────────────────── ExecutionEngine ─────────────────────┐
//! caller ───▶│ RequestEncoder ──▶ Engine::invoke ──▶ ResponseDecoder      │──▶ results
//!            │                         │                                 │
//!            │                         └──────▶ ExceptionChannel         │──▶ BridgeError
//!            │ UndoLedger · StreamCursors · Hashinator · ReplicationApplier│
//!            └────────────────────────────┬──────────────────────────────┘
//!                                         ▼
//!                                    BufferPool
//! ```
//!
//! [`memory::MemoryEngine`] is an in-process engine speaking the same
//! framings.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use ee_bridge::memory::MemoryEngine;
//! use ee_bridge::wire::{Catalog, CatalogTable, Column, PartitionConfig, Table, Value, ValueType};
//! use ee_bridge::ExecutionEngine;
//! use ee_buffer::BufferPool;
//! use ee_common::config::BridgeConfig;
//! use ee_common::types::{TableId, TxnContext, UndoToken};
//!
//! let columns = vec![Column::new("id", ValueType::BigInt)];
//! let catalog = Catalog::new()
//!     .with_table(CatalogTable::new(TableId::new(1), "items", columns.clone()))
//!     .unwrap();
//!
//! let mut ee = ExecutionEngine::initialize(
//!     MemoryEngine::new(),
//!     Arc::new(BufferPool::new()),
//!     BridgeConfig::for_testing(),
//!     PartitionConfig::legacy(2),
//! )
//! .unwrap();
//! ee.load_catalog(0, &catalog).unwrap();
//!
//! let rows = Table::new(columns).with_row(vec![Value::BigInt(7)]).unwrap();
//! let ctx = TxnContext::new(1, 1, 0, 1, UndoToken::new(1));
//! ee.load_table(TableId::new(1), &rows, ctx, false, false).unwrap();
//! ee.release_undo_token(UndoToken::new(1)).unwrap();
//!
//! assert_eq!(ee.serialize_table(TableId::new(1)).unwrap().row_count(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bridge;
pub mod decoder;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod exception;
pub mod hashinator;
pub mod memory;
pub mod replication;
pub mod stream;
pub mod undo;
pub mod wire;

pub use bridge::ExecutionEngine;
pub use decoder::{Dependency, FragmentResults, ResponseDecoder};
pub use encoder::RequestEncoder;
pub use engine::{Engine, EngineHandle, EngineIo, FallbackBuffer, Opcode, StreamDestination};
pub use error::{BridgeError, BridgeResult};
pub use exception::ExceptionChannel;
pub use hashinator::Hashinator;
pub use replication::{ApplyOutcome, ReplicationApplier};
pub use stream::{StreamCursor, StreamCursors, StreamError, StreamKey, StreamProgress, StreamState};
pub use undo::UndoLedger;
