//! Table stream requests.
//!
//! Activation:
//!
//! ```text
//! [i32 tableId][i32 streamType][i64 undoToken][i32 predLen]{[i32 count]{[i32 modulus][i32 remainder]}*}
//! ```
//!
//! `predLen == 0` means the stream has no predicates. Continuation:
//!
//! ```text
//! [i32 tableId][i32 streamType][i32 count]{[i32 partitionId][i32 capacity]}*
//! ```

use std::fmt;

use bytes::{Buf, BufMut};
use ee_common::types::{PartitionId, TableId, UndoToken};

use super::{finish, get_len, get_prefixed, need, put_len, Encode, WireError, WireResult};

/// Purpose of a table stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum StreamType {
    /// Rejoin recovery.
    Recovery = 0,
    /// Snapshot save.
    Snapshot = 1,
    /// Build an index for elastic rebalance.
    ElasticIndex = 2,
    /// Read the rebalance index.
    ElasticIndexRead = 3,
    /// Drop the rebalance index.
    ElasticIndexClear = 4,
}

impl StreamType {
    /// Returns the wire value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Parses a wire value.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown stream types.
    pub fn from_i32(raw: i32) -> WireResult<Self> {
        match raw {
            0 => Ok(Self::Recovery),
            1 => Ok(Self::Snapshot),
            2 => Ok(Self::ElasticIndex),
            3 => Ok(Self::ElasticIndexRead),
            4 => Ok(Self::ElasticIndexClear),
            _ => Err(WireError::new(
                "stream request",
                format!("unknown stream type {raw}"),
            )),
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Recovery => "recovery",
            Self::Snapshot => "snapshot",
            Self::ElasticIndex => "elastic-index",
            Self::ElasticIndexRead => "elastic-index-read",
            Self::ElasticIndexClear => "elastic-index-clear",
        };
        f.write_str(name)
    }
}

/// Row filter for one stream destination.
///
/// A row matches when its key maps to partition `remainder` under a legacy
/// partition map of `modulus` partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamPredicate {
    /// Partition count.
    pub modulus: i32,
    /// Partition the row must map to.
    pub remainder: i32,
}

impl StreamPredicate {
    /// Creates a predicate.
    #[must_use]
    pub const fn new(modulus: i32, remainder: i32) -> Self {
        Self { modulus, remainder }
    }

    fn validate(self) -> WireResult<Self> {
        if self.modulus <= 0 || self.remainder < 0 || self.remainder >= self.modulus {
            return Err(WireError::new(
                "stream predicate",
                format!("remainder {} out of range for modulus {}", self.remainder, self.modulus),
            ));
        }
        Ok(self)
    }
}

/// Request that starts a table stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamActivation {
    /// Table to stream.
    pub table_id: TableId,
    /// Purpose of the stream.
    pub stream_type: StreamType,
    /// Undo token the activation runs under.
    pub undo_token: UndoToken,
    /// Per-destination filters, in destination order.
    pub predicates: Vec<StreamPredicate>,
}

impl StreamActivation {
    fn predicates_len(&self) -> usize {
        if self.predicates.is_empty() {
            0
        } else {
            4 + 8 * self.predicates.len()
        }
    }

    /// Decodes an activation request.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed, the stream type is
    /// unknown, or a predicate is out of range.
    pub fn decode(bytes: &[u8]) -> WireResult<Self> {
        let mut buf = bytes;
        need(&buf, 4 + 4 + 8, "stream request")?;
        let table_id = TableId::new(buf.get_i32());
        let stream_type = StreamType::from_i32(buf.get_i32())?;
        let undo_token = UndoToken::new(buf.get_i64());
        let mut raw = get_prefixed(&mut buf, "stream request")?;
        finish(buf, "stream request")?;

        let mut predicates = Vec::new();
        if !raw.is_empty() {
            let count = get_len(&mut raw, "stream predicate")?;
            need(&raw, count.saturating_mul(8), "stream predicate")?;
            for _ in 0..count {
                let predicate = StreamPredicate::new(raw.get_i32(), raw.get_i32());
                predicates.push(predicate.validate()?);
            }
            finish(raw, "stream predicate")?;
        }
        Ok(Self {
            table_id,
            stream_type,
            undo_token,
            predicates,
        })
    }
}

impl Encode for StreamActivation {
    fn encoded_len(&self) -> usize {
        4 + 4 + 8 + 4 + self.predicates_len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32(self.table_id.as_i32());
        buf.put_i32(self.stream_type.as_i32());
        buf.put_i64(self.undo_token.as_i64());
        put_len(buf, self.predicates_len());
        if !self.predicates.is_empty() {
            put_len(buf, self.predicates.len());
            for predicate in &self.predicates {
                buf.put_i32(predicate.modulus);
                buf.put_i32(predicate.remainder);
            }
        }
    }
}

/// Describes one destination of a continuation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationSpec {
    /// Partition the destination's rows are headed for.
    pub partition_id: PartitionId,
    /// Bytes available in the destination.
    pub capacity: usize,
}

/// Request for the next chunk of an active stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamContinuation {
    /// Streamed table.
    pub table_id: TableId,
    /// Purpose of the stream.
    pub stream_type: StreamType,
    /// Destinations in predicate order.
    pub destinations: Vec<DestinationSpec>,
}

impl StreamContinuation {
    /// Decodes a continuation request.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed.
    pub fn decode(bytes: &[u8]) -> WireResult<Self> {
        let mut buf = bytes;
        need(&buf, 8, "stream request")?;
        let table_id = TableId::new(buf.get_i32());
        let stream_type = StreamType::from_i32(buf.get_i32())?;
        let count = get_len(&mut buf, "stream request")?;
        let mut destinations = Vec::with_capacity(count.min(buf.len() / 8));
        for _ in 0..count {
            need(&buf, 4, "stream request")?;
            let partition_id = PartitionId::new(buf.get_i32());
            let capacity = get_len(&mut buf, "stream request")?;
            destinations.push(DestinationSpec {
                partition_id,
                capacity,
            });
        }
        finish(buf, "stream request")?;
        Ok(Self {
            table_id,
            stream_type,
            destinations,
        })
    }
}

impl Encode for StreamContinuation {
    fn encoded_len(&self) -> usize {
        4 + 4 + 4 + 8 * self.destinations.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32(self.table_id.as_i32());
        buf.put_i32(self.stream_type.as_i32());
        put_len(buf, self.destinations.len());
        for destination in &self.destinations {
            buf.put_i32(destination.partition_id.as_i32());
            put_len(buf, destination.capacity);
        }
    }
}
