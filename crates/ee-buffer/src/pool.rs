//! Buffer pool implementation.
//!
//! The pool hands out [`DirectBuffer`]s and keeps a registry of every buffer
//! it allocated and has not yet been given back. Buffers themselves have a
//! single owner; the registry and the counters are the only shared state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use ee_common::constants::MAX_BUFFER_CAPACITY;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::buffer::{BufferId, DirectBuffer};
use crate::error::{BufferError, BufferResult};
use crate::BufferPoolStats;

/// Allocates, grows and releases engine-visible buffers.
///
/// The pool is internally synchronized and is normally shared as
/// `Arc<BufferPool>` between the handles of one process.
///
/// # Example
///
/// ```rust
/// use ee_buffer::BufferPool;
///
/// let pool = BufferPool::new();
/// let mut buffer = pool.allocate(1024).unwrap();
/// pool.grow(&mut buffer, 1500).unwrap();
/// assert!(buffer.capacity() >= 2048);
/// pool.release(buffer).unwrap();
/// assert_eq!(pool.stats().live_buffers, 0);
/// ```
pub struct BufferPool {
    /// Largest capacity a buffer may have.
    max_capacity: usize,
    /// Live buffers: id -> capacity.
    registry: Mutex<HashMap<BufferId, usize>>,
    /// Allocation counter for statistics.
    allocation_count: AtomicU64,
    /// Grow counter for statistics.
    grow_count: AtomicU64,
    /// Release counter for statistics.
    release_count: AtomicU64,
    /// Bytes held by live buffers.
    live_bytes: AtomicUsize,
    /// Largest value `live_bytes` has reached.
    high_water_bytes: AtomicUsize,
}

impl BufferPool {
    /// Creates a pool whose buffers may grow up to `i32::MAX` bytes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_capacity(MAX_BUFFER_CAPACITY)
    }

    /// Creates a pool with a lower capacity ceiling.
    #[must_use]
    pub fn with_max_capacity(max_capacity: usize) -> Self {
        Self {
            max_capacity: max_capacity.min(MAX_BUFFER_CAPACITY),
            registry: Mutex::new(HashMap::new()),
            allocation_count: AtomicU64::new(0),
            grow_count: AtomicU64::new(0),
            release_count: AtomicU64::new(0),
            live_bytes: AtomicUsize::new(0),
            high_water_bytes: AtomicUsize::new(0),
        }
    }

    /// Returns the capacity ceiling.
    #[inline]
    #[must_use]
    pub const fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Allocates a zero-filled buffer with capacity of at least `min_capacity`.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded` above the ceiling and `AllocationFailed`
    /// when the allocator refuses.
    pub fn allocate(&self, min_capacity: usize) -> BufferResult<DirectBuffer> {
        if min_capacity > self.max_capacity {
            return Err(BufferError::capacity_exceeded(min_capacity, self.max_capacity));
        }

        let buffer = DirectBuffer::allocate(min_capacity)?;
        let capacity = buffer.capacity();

        self.registry.lock().insert(buffer.id(), capacity);
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        let live = self.live_bytes.fetch_add(capacity, Ordering::Relaxed) + capacity;
        self.high_water_bytes.fetch_max(live, Ordering::Relaxed);

        trace!(id = %buffer.id(), capacity, "allocated direct buffer");
        Ok(buffer)
    }

    /// Replaces `buffer` with one of capacity at least
    /// `max(min_capacity, 2 * buffer.capacity())`.
    ///
    /// The contents are not copied. The old buffer is released.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded` when `min_capacity` is above the ceiling.
    /// Doubling is clamped to the ceiling. On error `buffer` is untouched.
    pub fn grow(&self, buffer: &mut DirectBuffer, min_capacity: usize) -> BufferResult<()> {
        if min_capacity > self.max_capacity {
            return Err(BufferError::capacity_exceeded(min_capacity, self.max_capacity));
        }

        let old_capacity = buffer.capacity();
        let target = min_capacity
            .max(old_capacity.saturating_mul(2))
            .min(self.max_capacity);

        let grown = self.allocate(target)?;
        let old = std::mem::replace(buffer, grown);
        self.release(old)?;
        self.grow_count.fetch_add(1, Ordering::Relaxed);

        debug!(
            old_capacity,
            new_capacity = buffer.capacity(),
            requested = min_capacity,
            "grew direct buffer"
        );
        Ok(())
    }

    /// Returns a buffer's memory to the system.
    ///
    /// # Errors
    ///
    /// Returns `UnknownBuffer` if this pool did not allocate the buffer.
    /// This is a programming error and also trips a debug assertion.
    pub fn release(&self, buffer: DirectBuffer) -> BufferResult<()> {
        let id = buffer.id();
        let Some(capacity) = self.registry.lock().remove(&id) else {
            error!(%id, "release of a buffer this pool does not own");
            if cfg!(debug_assertions) {
                panic!("release of unknown buffer {id}");
            }
            return Err(BufferError::UnknownBuffer { id });
        };

        self.release_count.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(capacity, Ordering::Relaxed);
        trace!(%id, capacity, "released direct buffer");
        drop(buffer);
        Ok(())
    }

    /// Returns true if the pool is tracking the buffer.
    #[must_use]
    pub fn owns(&self, buffer: &DirectBuffer) -> bool {
        self.registry.lock().contains_key(&buffer.id())
    }

    /// Returns statistics about the pool.
    #[must_use]
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            allocations: self.allocation_count.load(Ordering::Relaxed),
            grows: self.grow_count.load(Ordering::Relaxed),
            releases: self.release_count.load(Ordering::Relaxed),
            live_buffers: self.registry.lock().len(),
            live_bytes: self.live_bytes.load(Ordering::Relaxed),
            high_water_bytes: self.high_water_bytes.load(Ordering::Relaxed),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        let registry = self.registry.get_mut();
        if !registry.is_empty() {
            warn!(
                leaked = registry.len(),
                bytes = self.live_bytes.load(Ordering::Relaxed),
                "buffer pool dropped with unreleased buffers"
            );
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("max_capacity", &self.max_capacity)
            .field("stats", &self.stats())
            .finish()
    }
}
