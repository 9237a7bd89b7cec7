//! Buffer pool errors.

use ee_common::error::ErrorCode;
use thiserror::Error;

use crate::buffer::BufferId;

/// Result type for buffer pool operations.
pub type BufferResult<T> = Result<T, BufferError>;

/// Errors that can occur during buffer pool operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)] // Fields are documented by variant docs
pub enum BufferError {
    /// The system allocator refused the request.
    #[error("failed to allocate {size} bytes")]
    AllocationFailed { size: usize },

    /// The requested capacity cannot be addressed across the call boundary.
    #[error("requested capacity {requested} exceeds maximum {max}")]
    CapacityExceeded { requested: usize, max: usize },

    /// A buffer was handed to a pool that did not allocate it.
    #[error("buffer {id} is not owned by this pool")]
    UnknownBuffer { id: BufferId },
}

impl BufferError {
    /// Creates a capacity error.
    #[must_use]
    pub fn capacity_exceeded(requested: usize, max: usize) -> Self {
        Self::CapacityExceeded { requested, max }
    }

    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::AllocationFailed { .. } | Self::CapacityExceeded { .. } => {
                ErrorCode::BufferAllocation
            }
            Self::UnknownBuffer { .. } => ErrorCode::UnknownBuffer,
        }
    }

    /// Returns true if this is a fatal error.
    ///
    /// Every buffer error is fatal for the owning engine handle; none of
    /// them is retried.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        true
    }
}
