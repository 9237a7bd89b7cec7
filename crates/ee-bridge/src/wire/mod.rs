//! Binary framings shared by the bridge and the engine.
//!
//! Everything crossing the call boundary is big-endian. Lengths and counts
//! are signed 32-bit integers (16-bit for column and parameter counts) and
//! are validated against the remaining input before any slice is taken, so
//! a malformed frame is always reported as a [`WireError`] and never
//! panics.

pub mod binlog;
pub mod catalog;
pub mod exception;
pub mod export;
pub mod params;
pub mod partition;
pub mod request;
pub mod response;
pub mod stream;
pub mod table;
pub mod value;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

pub use binlog::{BinaryLogSegment, Conflict, ConflictKind, LogOp, LogRecord};
pub use catalog::{Catalog, CatalogTable};
pub use export::{ExportAction, ExportBlock, ExportPositions, ExportPositionsRequest, RecoveryMessage};
pub use params::{FragmentParams, ParameterSet};
pub use partition::{HashinatorType, PartitionConfig};
pub use stream::{DestinationSpec, StreamActivation, StreamContinuation, StreamPredicate, StreamType};
pub use table::{Column, RowView, Table, TableView};
pub use value::{Value, ValueType};

/// Result type for wire decoding.
pub type WireResult<T> = Result<T, WireError>;

/// A frame that does not follow its layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {what}: {reason}")]
pub struct WireError {
    /// The structure being decoded.
    pub what: &'static str,
    /// What was wrong with it.
    pub reason: String,
}

impl WireError {
    /// Creates a new wire error.
    #[must_use]
    pub fn new(what: &'static str, reason: impl Into<String>) -> Self {
        Self {
            what,
            reason: reason.into(),
        }
    }

    /// Creates a truncation error.
    #[must_use]
    pub fn truncated(what: &'static str, needed: usize, remaining: usize) -> Self {
        Self::new(what, format!("need {needed} bytes, {remaining} remaining"))
    }
}

/// A structure with a fixed binary framing.
///
/// `encoded_len` must return exactly the number of bytes `encode` writes;
/// the request encoder relies on it to size the request buffer up front.
pub trait Encode {
    /// Returns the exact encoded size in bytes.
    fn encoded_len(&self) -> usize;

    /// Writes the encoding into `buf`.
    fn encode<B: BufMut>(&self, buf: &mut B);

    /// Encodes into a fresh buffer.
    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Fails unless `buf` holds at least `needed` more bytes.
#[inline]
pub(crate) fn need<B: Buf + ?Sized>(buf: &B, needed: usize, what: &'static str) -> WireResult<()> {
    if buf.remaining() < needed {
        return Err(WireError::truncated(what, needed, buf.remaining()));
    }
    Ok(())
}

/// Reads an `i32` length or count that must be non-negative.
pub(crate) fn get_len(buf: &mut impl Buf, what: &'static str) -> WireResult<usize> {
    need(&*buf, 4, what)?;
    let len = buf.get_i32();
    usize::try_from(len).map_err(|_| WireError::new(what, format!("negative length {len}")))
}

/// Reads an `i16` count that must be non-negative.
pub(crate) fn get_count16(buf: &mut impl Buf, what: &'static str) -> WireResult<usize> {
    need(&*buf, 2, what)?;
    let count = buf.get_i16();
    usize::try_from(count).map_err(|_| WireError::new(what, format!("negative count {count}")))
}

/// Splits `len` bytes off the front of `buf` without copying.
pub(crate) fn take<'a>(buf: &mut &'a [u8], len: usize, what: &'static str) -> WireResult<&'a [u8]> {
    need(&*buf, len, what)?;
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

/// Reads `[i32 len][bytes]` without copying.
pub(crate) fn get_prefixed<'a>(buf: &mut &'a [u8], what: &'static str) -> WireResult<&'a [u8]> {
    let len = get_len(buf, what)?;
    take(buf, len, what)
}

/// Reads `[i32 len][utf8]`.
pub(crate) fn get_string(buf: &mut &[u8], what: &'static str) -> WireResult<String> {
    let bytes = get_prefixed(buf, what)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| WireError::new(what, e.to_string()))
}

/// Writes a length as `i32`.
///
/// Every buffer is capped at `i32::MAX` bytes, so any length that fits in
/// a buffer fits here.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub(crate) fn put_len<B: BufMut>(buf: &mut B, len: usize) {
    buf.put_i32(len as i32);
}

/// Writes `[i32 len][bytes]`.
pub(crate) fn put_prefixed<B: BufMut>(buf: &mut B, bytes: &[u8]) {
    put_len(buf, bytes.len());
    buf.put_slice(bytes);
}

/// Fails if anything is left after a complete frame.
pub(crate) fn finish(buf: &[u8], what: &'static str) -> WireResult<()> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(WireError::new(what, format!("{} trailing bytes", buf.len())))
    }
}

/// Reads a one-byte boolean.
pub(crate) fn get_bool(buf: &mut impl Buf, what: &'static str) -> WireResult<bool> {
    need(&*buf, 1, what)?;
    match buf.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(WireError::new(what, format!("invalid boolean {other}"))),
    }
}
