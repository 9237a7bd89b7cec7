//! # ee-buffer
//!
//! Direct buffers shared across the engine call boundary.
//!
//! Every byte the bridge exchanges with the engine lives in a
//! [`DirectBuffer`]: requests, responses and serialized errors. Buffers
//! are handed out by a [`BufferPool`], which tracks what is live:
//!
//! - **Allocate**: zero-filled, cache-line aligned, contiguous
//! - **Grow**: replace with at least twice the capacity (contents dropped)
//! - **Release**: give memory back; releasing a foreign buffer is a bug
//!
//! ```text
//! ┌──────────────────────────── BufferPool ───────────────────────────┐
//! │  registry: Mutex<HashMap<BufferId, capacity>>                      │
//! │  counters: allocations / grows / releases / live / high-water      │
//! └───────────────┬─────────────────────┬─────────────────────┬───────┘
//!                 ▼                     ▼                     ▼
//!          request buffer        response buffer        error buffer
//!          (owned by one engine handle, never aliased)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod buffer;
mod error;
mod pool;

pub use buffer::{BufferId, DirectBuffer};
pub use error::{BufferError, BufferResult};
pub use pool::BufferPool;

/// Statistics for buffer pool monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Total number of buffers allocated, including growth.
    pub allocations: u64,
    /// Number of grow operations.
    pub grows: u64,
    /// Number of buffers released.
    pub releases: u64,
    /// Buffers currently allocated and not released.
    pub live_buffers: usize,
    /// Bytes held by live buffers.
    pub live_bytes: usize,
    /// Largest number of bytes held at once.
    pub high_water_bytes: usize,
}

impl BufferPoolStats {
    /// Returns the number of buffers that were dropped instead of released.
    ///
    /// Only meaningful once every owner has finished with the pool.
    #[must_use]
    pub fn leaked(&self) -> u64 {
        self.allocations.saturating_sub(self.releases)
    }
}
