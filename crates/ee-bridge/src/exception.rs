//! Engine failure details.

use ee_buffer::{BufferPool, BufferResult, DirectBuffer};
use ee_common::error::EngineErrorKind;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::wire::exception::decode_error_frame;

/// Owns the error buffer and turns failed calls into typed errors.
///
/// The buffer is never cleared between calls; it is only read when a
/// call reports failure, so stale frames from earlier failures are
/// harmless.
#[derive(Debug)]
pub struct ExceptionChannel {
    buffer: DirectBuffer,
}

impl ExceptionChannel {
    /// Creates a channel with an error buffer of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer cannot be allocated.
    pub fn new(pool: &BufferPool, capacity: usize) -> BufferResult<Self> {
        Ok(Self {
            buffer: pool.allocate(capacity)?,
        })
    }

    /// Returns the error buffer for the engine to write into.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }

    /// Builds the error for a call that returned `status`.
    #[must_use]
    pub fn surface(&self, status: i64) -> BridgeError {
        match decode_error_frame(self.buffer.as_slice()) {
            Ok(Some(err)) if err.kind != EngineErrorKind::None => {
                debug!(status, kind = %err.kind, message = %err.message, "Engine reported error");
                BridgeError::Engine(err)
            }
            Ok(_) => {
                debug!(status, "Engine failed without details");
                BridgeError::EngineStatus { status }
            }
            Err(err) => {
                warn!(status, error = %err, "Unreadable engine error frame");
                BridgeError::MalformedResponse(err)
            }
        }
    }

    /// Gives up the error buffer so it can be released.
    #[must_use]
    pub fn into_buffer(self) -> DirectBuffer {
        self.buffer
    }
}
