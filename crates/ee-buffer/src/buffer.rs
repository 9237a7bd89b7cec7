//! Direct buffers shared with the engine.
//!
//! A [`DirectBuffer`] is one contiguous, zero-filled, cache-line aligned
//! allocation. The engine reads requests from it and writes responses into
//! it, so its address must stay stable for the buffer's whole life: buffers
//! never reallocate in place, growth always produces a new buffer.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};

use ee_common::constants::BUFFER_ALIGNMENT;

use crate::error::{BufferError, BufferResult};

/// Process-wide buffer id source. Ids are unique across pools.
static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one direct buffer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct BufferId(u64);

impl BufferId {
    /// Creates an id from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferId({})", self.0)
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fixed-capacity, engine-visible byte buffer.
///
/// Buffers are only created by a [`BufferPool`](crate::BufferPool) and
/// should be handed back to it with `release`; dropping one frees the
/// memory but leaves the pool's accounting pointing at it.
pub struct DirectBuffer {
    id: BufferId,
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: DirectBuffer owns its memory exclusively and only hands out
// borrows tied to `&self` / `&mut self`.
unsafe impl Send for DirectBuffer {}
unsafe impl Sync for DirectBuffer {}

impl DirectBuffer {
    /// Allocates a zero-filled buffer of at least `capacity` bytes.
    ///
    /// The capacity is rounded up to a multiple of the cache line size.
    pub(crate) fn allocate(capacity: usize) -> BufferResult<Self> {
        let size = capacity
            .max(1)
            .checked_next_multiple_of(BUFFER_ALIGNMENT)
            .ok_or(BufferError::AllocationFailed { size: capacity })?;
        let layout = Layout::from_size_align(size, BUFFER_ALIGNMENT)
            .map_err(|_| BufferError::AllocationFailed { size })?;

        // SAFETY: layout has a non-zero size and a power-of-two alignment.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(BufferError::AllocationFailed { size })?;

        Ok(Self {
            id: BufferId::next(),
            ptr,
            layout,
        })
    }

    /// Returns the buffer id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> BufferId {
        self.id
    }

    /// Returns the capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.layout.size()
    }

    /// Returns the buffer as a byte slice.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for layout.size() initialized bytes.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    /// Returns the buffer as a mutable byte slice.
    #[inline]
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid and `&mut self` guarantees exclusive access.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }

    /// Returns the address the engine sees.
    #[inline]
    #[must_use]
    pub fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Checks if the buffer is aligned to the specified alignment.
    #[inline]
    #[must_use]
    pub fn is_aligned_to(&self, alignment: usize) -> bool {
        self.address() % alignment == 0
    }
}

impl Drop for DirectBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with exactly this layout.
        unsafe {
            alloc::dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

impl AsRef<[u8]> for DirectBuffer {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for DirectBuffer {
    #[inline]
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl fmt::Debug for DirectBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectBuffer")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_is_zeroed_and_aligned() {
        let buffer = DirectBuffer::allocate(1000).unwrap();
        assert!(buffer.capacity() >= 1000);
        assert_eq!(buffer.capacity() % BUFFER_ALIGNMENT, 0);
        assert!(buffer.is_aligned_to(BUFFER_ALIGNMENT));
        assert!(buffer.as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_zero_capacity_rounds_up() {
        let buffer = DirectBuffer::allocate(0).unwrap();
        assert_eq!(buffer.capacity(), BUFFER_ALIGNMENT);
    }

    #[test]
    fn test_read_write() {
        let mut buffer = DirectBuffer::allocate(64).unwrap();
        buffer.as_mut_slice()[..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&buffer.as_slice()[..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = DirectBuffer::allocate(64).unwrap();
        let b = DirectBuffer::allocate(64).unwrap();
        assert_ne!(a.id(), b.id());
    }
}
