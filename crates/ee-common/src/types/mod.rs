//! Core types for the execution-engine bridge.

mod context;
mod ids;

pub use context::{ReplicationContext, TxnContext};
pub use ids::{ClusterId, DependencyId, EngineId, FragmentId, PartitionId, TableId, UndoToken};
