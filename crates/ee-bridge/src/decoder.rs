//! Response decoding.
//!
//! The response buffer is written by the engine as
//!
//! ```text
//! [i32 totalSize][bool dirty]{[i32 depCount][i32 depId][i32 tableSize][table]}*
//! ```
//!
//! Tables are handed out as [`TableView`]s borrowing the buffer they were
//! read from, so they cannot outlive the next call.

use bytes::Buf;
use ee_buffer::{BufferPool, BufferResult, DirectBuffer};
use ee_common::constants::{DEPENDENCIES_PER_FRAGMENT, RESPONSE_HEADER_SIZE};
use ee_common::types::DependencyId;

use crate::engine::FallbackBuffer;
use crate::error::{BridgeError, BridgeResult};
use crate::wire::binlog::{decode_conflicts, Conflict};
use crate::wire::response::PositionList;
use crate::wire::TableView;

/// One fragment's result.
#[derive(Debug, Clone)]
pub struct Dependency<'a> {
    /// Output dependency id.
    pub id: DependencyId,
    /// The result table.
    pub table: TableView<'a>,
}

/// Results of a fragment batch, in submission order.
#[derive(Debug, Clone)]
pub struct FragmentResults<'a> {
    /// Whether the call mutated persistent state.
    pub dirty: bool,
    /// One entry per fragment.
    pub dependencies: Vec<Dependency<'a>>,
}

impl<'a> FragmentResults<'a> {
    /// Returns the number of results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Returns true if there are no results.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Returns the result tables in order.
    pub fn tables(&self) -> impl Iterator<Item = &TableView<'a>> + '_ {
        self.dependencies.iter().map(|d| &d.table)
    }
}

/// Owns the response buffer and reads results out of it.
#[derive(Debug)]
pub struct ResponseDecoder {
    buffer: DirectBuffer,
    max_table_size: usize,
}

impl ResponseDecoder {
    /// Creates a decoder with a response buffer of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer cannot be allocated.
    pub fn new(pool: &BufferPool, capacity: usize, max_table_size: usize) -> BufferResult<Self> {
        Ok(Self {
            buffer: pool.allocate(capacity)?,
            max_table_size,
        })
    }

    /// Returns the response buffer for the engine to write into.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }

    /// Returns the bytes of the last response.
    ///
    /// A fallback buffer supplied for the call takes precedence over the
    /// response buffer.
    #[must_use]
    pub fn source<'a>(&'a self, fallback: Option<&'a FallbackBuffer>) -> &'a [u8] {
        fallback.map_or_else(|| self.buffer.as_slice(), FallbackBuffer::as_bytes)
    }

    /// Returns the configured table size limit.
    #[must_use]
    pub const fn max_table_size(&self) -> usize {
        self.max_table_size
    }

    /// Gives up the response buffer so it can be released.
    #[must_use]
    pub fn into_buffer(self) -> DirectBuffer {
        self.buffer
    }

    /// Reads the header and returns the dirty flag and the payload.
    ///
    /// # Errors
    ///
    /// Returns `MalformedResponse` if the size is negative or overruns
    /// `bytes`.
    pub fn frame(bytes: &[u8]) -> BridgeResult<(bool, &[u8])> {
        if bytes.len() < RESPONSE_HEADER_SIZE {
            return Err(BridgeError::malformed(
                "response",
                format!("{} bytes cannot hold a header", bytes.len()),
            ));
        }
        let mut buf = bytes;
        let total = buf.get_i32();
        let total = usize::try_from(total)
            .map_err(|_| BridgeError::malformed("response", format!("negative size {total}")))?;
        let dirty = buf.get_u8() != 0;
        if total > buf.len() {
            return Err(BridgeError::malformed(
                "response",
                format!("size {total} overruns {} available bytes", buf.len()),
            ));
        }
        Ok((dirty, &buf[..total]))
    }

    /// Decodes every dependency record in a response.
    ///
    /// # Errors
    ///
    /// Returns `MalformedResponse` for bad framing, and `TableTooLarge` if
    /// a table exceeds the configured limit.
    pub fn decode_dependencies<'a>(&self, bytes: &'a [u8]) -> BridgeResult<FragmentResults<'a>> {
        let (dirty, mut payload) = Self::frame(bytes)?;
        let mut dependencies = Vec::new();
        while !payload.is_empty() {
            dependencies.push(self.decode_dependency(&mut payload)?);
        }
        Ok(FragmentResults {
            dirty,
            dependencies,
        })
    }

    /// Decodes exactly `expected` dependency records.
    ///
    /// # Errors
    ///
    /// As [`decode_dependencies`](Self::decode_dependencies), plus
    /// `MalformedResponse` if the record count differs.
    pub fn decode_fragments<'a>(
        &self,
        bytes: &'a [u8],
        expected: usize,
    ) -> BridgeResult<FragmentResults<'a>> {
        let results = self.decode_dependencies(bytes)?;
        if results.len() != expected {
            return Err(BridgeError::malformed(
                "response",
                format!("{} results for {expected} fragments", results.len()),
            ));
        }
        Ok(results)
    }

    fn decode_dependency<'a>(&self, payload: &mut &'a [u8]) -> BridgeResult<Dependency<'a>> {
        if payload.len() < 12 {
            return Err(BridgeError::malformed(
                "response",
                format!("{} bytes cannot hold a dependency header", payload.len()),
            ));
        }
        let count = payload.get_i32();
        if count != DEPENDENCIES_PER_FRAGMENT {
            return Err(BridgeError::malformed(
                "response",
                format!("dependency count {count}, expected {DEPENDENCIES_PER_FRAGMENT}"),
            ));
        }
        let id = DependencyId::new(payload.get_i32());
        let size = payload.get_i32();
        let size = usize::try_from(size)
            .map_err(|_| BridgeError::malformed("response", format!("negative table size {size}")))?;
        if size > self.max_table_size {
            return Err(BridgeError::TableTooLarge {
                size,
                max: self.max_table_size,
            });
        }
        if size > payload.len() {
            return Err(BridgeError::malformed(
                "response",
                format!("table size {size} overruns {} remaining bytes", payload.len()),
            ));
        }
        let bytes: &'a [u8] = *payload;
        let (table, rest) = bytes.split_at(size);
        *payload = rest;
        Ok(Dependency {
            id,
            table: TableView::parse(table)?,
        })
    }

    /// Decodes a response holding a single table.
    ///
    /// # Errors
    ///
    /// As [`decode_fragments`](Self::decode_fragments).
    pub fn decode_table<'a>(&self, bytes: &'a [u8]) -> BridgeResult<(bool, TableView<'a>)> {
        let mut results = self.decode_fragments(bytes, 1)?;
        let dirty = results.dirty;
        let table = results.dependencies.remove(0).table;
        Ok((dirty, table))
    }

    /// Decodes a response holding an opaque payload.
    ///
    /// # Errors
    ///
    /// Returns `MalformedResponse` for bad framing.
    pub fn decode_payload(bytes: &[u8]) -> BridgeResult<(bool, &[u8])> {
        Self::frame(bytes)
    }

    /// Decodes the position list written by a stream continuation.
    ///
    /// # Errors
    ///
    /// Returns `MalformedResponse` if the list is truncated.
    pub fn decode_positions(bytes: &[u8]) -> BridgeResult<Vec<i32>> {
        let mut buf = bytes;
        Ok(PositionList::decode(&mut buf)?.0)
    }

    /// Decodes the conflict list written by binary log application.
    ///
    /// # Errors
    ///
    /// Returns `MalformedResponse` if the list is malformed.
    pub fn decode_conflicts(bytes: &[u8]) -> BridgeResult<Vec<Conflict>> {
        let mut buf = bytes;
        Ok(decode_conflicts(&mut buf)?)
    }
}
