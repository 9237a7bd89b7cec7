//! # ee-common
//!
//! Common types, errors, and configuration for the execution-engine bridge.
//!
//! This crate provides the foundational pieces shared by the buffer pool and
//! the bridge itself:
//!
//! - **Types**: Identifiers (`UndoToken`, `TableId`, `FragmentId`, ...) and
//!   per-call transaction contexts
//! - **Errors**: `ErrorCode` categories, the decoded `EngineError`, and
//!   `ConfigError`
//! - **Config**: `BridgeConfig` and the `EngineIdentity` used at initialization
//! - **Constants**: Buffer sizes, status codes and protocol limits
//!
//! ## Example
//!
//! ```rust
//! use ee_common::config::BridgeConfig;
//! use ee_common::types::{TxnContext, UndoToken};
//!
//! let config = BridgeConfig::default();
//! assert!(config.validate().is_ok());
//!
//! let ctx = TxnContext::new(7, 7, 6, 7_000, UndoToken::new(1));
//! assert_eq!(ctx.undo_token.as_i64(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::{BridgeConfig, EngineIdentity};
pub use constants::*;
pub use error::{ConfigError, EngineError, EngineErrorKind, ErrorCode};
pub use types::{
    ClusterId, DependencyId, EngineId, FragmentId, PartitionId, ReplicationContext, TableId,
    TxnContext, UndoToken,
};
