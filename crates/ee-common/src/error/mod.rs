//! Error types shared across the bridge crates.
//!
//! Each crate defines its own error enum (`BufferError`, `BridgeError`); the
//! pieces here are the ones more than one crate needs.

mod code;
mod config;
mod engine;

pub use code::ErrorCode;
pub use config::ConfigError;
pub use engine::{ConstraintInfo, ConstraintType, EngineError, EngineErrorKind};
