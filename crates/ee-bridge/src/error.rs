//! Bridge errors.

use ee_buffer::BufferError;
use ee_common::error::{ConfigError, EngineError, ErrorCode};
use ee_common::types::UndoToken;
use thiserror::Error;

use crate::stream::StreamError;
use crate::wire::WireError;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors returned by [`ExecutionEngine`](crate::ExecutionEngine).
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The engine handle has been destroyed.
    #[error("execution engine is not available")]
    EngineUnavailable,

    /// The engine failed and described why.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The engine failed without details.
    #[error("execution engine returned failure status {status}")]
    EngineStatus {
        /// Status or value the engine returned.
        status: i64,
    },

    /// A request cannot be framed within the configured limit.
    #[error("request of {size} bytes exceeds maximum {max}")]
    RequestTooLarge {
        /// Encoded request size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A response or error frame does not follow its layout.
    #[error(transparent)]
    MalformedResponse(#[from] WireError),

    /// A result table is larger than the configured limit.
    #[error("result table of {size} bytes exceeds maximum {max}")]
    TableTooLarge {
        /// Declared table size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Buffer allocation or release failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// A table stream call was rejected or the stream aborted.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// An undo token was used out of order or after resolution.
    #[error("undo token {token} misused: {reason}")]
    UndoTokenMisuse {
        /// The offending token.
        token: UndoToken,
        /// What was wrong.
        reason: String,
    },

    /// An argument is out of range.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What is wrong.
        message: String,
    },

    /// Configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BridgeError {
    /// Creates a malformed response error.
    #[must_use]
    pub fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedResponse(WireError::new(what, reason))
    }

    /// Creates an undo token misuse error.
    #[must_use]
    pub fn undo_misuse(token: UndoToken, reason: impl Into<String>) -> Self {
        Self::UndoTokenMisuse {
            token,
            reason: reason.into(),
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns the error code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::EngineUnavailable => ErrorCode::EngineUnavailable,
            Self::Engine(err) => err.code(),
            Self::EngineStatus { .. } => ErrorCode::EngineStatus,
            Self::RequestTooLarge { .. } => ErrorCode::RequestTooLarge,
            Self::MalformedResponse(_) => ErrorCode::MalformedResponse,
            Self::TableTooLarge { .. } => ErrorCode::TableTooLarge,
            Self::Buffer(err) => err.code(),
            Self::Stream(err) => err.code(),
            Self::UndoTokenMisuse { .. } => ErrorCode::UndoTokenMisuse,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::InvalidConfig,
        }
    }

    /// Returns true if the engine handle can no longer be trusted.
    ///
    /// Fatal errors are never retried; the caller should tear the handle
    /// down.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::EngineUnavailable
            | Self::RequestTooLarge { .. }
            | Self::MalformedResponse(_)
            | Self::TableTooLarge { .. } => true,
            Self::Buffer(err) => err.is_fatal(),
            _ => false,
        }
    }

    /// Returns true if the error can be handled by aborting the current
    /// transaction.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Engine(_) | Self::EngineStatus { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ee_common::error::ConstraintType;

    #[test]
    fn test_classification() {
        let err = BridgeError::from(EngineError::constraint_violation(
            ConstraintType::Unique,
            "T",
            "dup",
        ));
        assert!(err.is_recoverable());
        assert!(!err.is_fatal());
        assert_eq!(err.code(), ErrorCode::ConstraintViolation);

        let err = BridgeError::malformed("response", "short");
        assert!(err.is_fatal());
        assert!(!err.is_recoverable());
        assert_eq!(err.code().category(), "Protocol");

        let err = BridgeError::undo_misuse(UndoToken::new(4), "already released");
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "undo token 4 misused: already released");

        assert!(BridgeError::EngineUnavailable.is_fatal());
        assert!(BridgeError::EngineStatus { status: 1 }.is_recoverable());
    }
}
