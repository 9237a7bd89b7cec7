//! Request serialization into the pooled request buffer.

use std::sync::Arc;

use ee_buffer::{BufferPool, BufferResult, DirectBuffer};
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};
use crate::wire::Encode;

/// Frames requests into a growable request buffer.
///
/// The buffer is reused from call to call. A request that does not fit
/// replaces it with a larger one from the pool before anything is
/// written, so the request is always serialized from scratch into a
/// buffer that can hold it. The buffer never shrinks.
#[derive(Debug)]
pub struct RequestEncoder {
    pool: Arc<BufferPool>,
    buffer: DirectBuffer,
    len: usize,
    max_request_size: usize,
}

impl RequestEncoder {
    /// Creates an encoder with a buffer of at least `initial_capacity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer cannot be allocated.
    pub fn new(
        pool: Arc<BufferPool>,
        initial_capacity: usize,
        max_request_size: usize,
    ) -> BufferResult<Self> {
        let buffer = pool.allocate(initial_capacity)?;
        Ok(Self {
            pool,
            buffer,
            len: 0,
            max_request_size,
        })
    }

    /// Serializes `request`, growing the buffer if needed.
    ///
    /// Returns the encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns `RequestTooLarge` if the request exceeds the configured
    /// maximum, or a buffer error if growth fails. The previous contents
    /// are left untouched in both cases.
    pub fn encode<R: Encode>(&mut self, request: &R) -> BridgeResult<&[u8]> {
        let size = request.encoded_len();
        if size > self.max_request_size {
            return Err(BridgeError::RequestTooLarge {
                size,
                max: self.max_request_size,
            });
        }
        if size > self.buffer.capacity() {
            let old = self.buffer.capacity();
            self.pool.grow(&mut self.buffer, size)?;
            debug!(
                old_capacity = old,
                new_capacity = self.buffer.capacity(),
                request_size = size,
                "Grew request buffer"
            );
        }

        let mut out = &mut self.buffer.as_mut_slice()[..size];
        request.encode(&mut out);
        debug_assert!(out.is_empty(), "encoded_len disagrees with encode");
        self.len = size;
        Ok(self.bytes())
    }

    /// Returns the most recently encoded request.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buffer.as_slice()[..self.len]
    }

    /// Returns the current buffer capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Returns the configured request limit.
    #[must_use]
    pub const fn max_request_size(&self) -> usize {
        self.max_request_size
    }

    /// Gives up the request buffer so it can be released.
    #[must_use]
    pub fn into_buffer(self) -> DirectBuffer {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{ParameterSet, Value};
    use bytes::Bytes;

    fn blob_params(size: usize) -> ParameterSet {
        ParameterSet::from_values(vec![Value::VarBinary(Bytes::from(vec![0x5A; size]))]).unwrap()
    }

    #[test]
    fn test_reuses_buffer_when_request_fits() {
        let pool = Arc::new(BufferPool::new());
        let mut encoder = RequestEncoder::new(Arc::clone(&pool), 1024, usize::MAX).unwrap();

        let params = blob_params(100);
        let bytes = encoder.encode(&params).unwrap().to_vec();
        assert_eq!(bytes, params.to_bytes().to_vec());
        assert_eq!(pool.stats().grows, 0);
    }

    #[test]
    fn test_grows_and_reserializes() {
        let pool = Arc::new(BufferPool::new());
        let mut encoder = RequestEncoder::new(Arc::clone(&pool), 256, usize::MAX).unwrap();
        encoder.encode(&blob_params(10)).unwrap();

        let big = blob_params(10_000);
        let encoded = encoder.encode(&big).unwrap().to_vec();
        assert_eq!(encoded, big.to_bytes().to_vec());
        assert!(encoder.capacity() >= big.encoded_len());
        assert_eq!(pool.stats().grows, 1);

        // A smaller request afterwards keeps the larger buffer.
        let capacity = encoder.capacity();
        encoder.encode(&blob_params(1)).unwrap();
        assert_eq!(encoder.capacity(), capacity);

        pool.release(encoder.into_buffer()).unwrap();
        assert_eq!(pool.stats().live_buffers, 0);
    }

    #[test]
    fn test_rejects_request_over_limit() {
        let pool = Arc::new(BufferPool::new());
        let mut encoder = RequestEncoder::new(Arc::clone(&pool), 64, 1_000).unwrap();
        encoder.encode(&blob_params(8)).unwrap();
        let before = encoder.bytes().to_vec();

        let err = encoder.encode(&blob_params(2_000)).unwrap_err();
        assert!(matches!(err, BridgeError::RequestTooLarge { max: 1_000, .. }));
        assert!(err.is_fatal());
        assert_eq!(encoder.bytes(), &before[..]);
        assert_eq!(pool.stats().grows, 0);
    }
}
