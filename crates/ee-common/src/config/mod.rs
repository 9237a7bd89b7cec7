//! Configuration for the execution-engine bridge.

mod bridge;

pub use bridge::{BridgeConfig, EngineIdentity};
