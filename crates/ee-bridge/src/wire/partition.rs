//! Partition map configurations.
//!
//! Wire form:
//!
//! ```text
//! [i8 typeTag][u64 ringPointer][i32 numTokens][i32 configLen][configBytes]
//! ```
//!
//! Legacy config bytes are `[i32 partitionCount]`. Elastic config bytes
//! are a sorted token ring `[i32 count]{[i32 token][i32 partitionId]}*`.
//! A non-zero ring pointer names a ring the engine already holds.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ee_common::types::PartitionId;

use super::{get_prefixed, need, put_len, put_prefixed, Encode, WireError, WireResult};

/// Kind of partition map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum HashinatorType {
    /// Modulus over a fixed partition count.
    Legacy = 0,
    /// Consistent-hash token ring.
    Elastic = 1,
}

impl HashinatorType {
    /// Returns the tag byte.
    #[inline]
    #[must_use]
    pub const fn as_i8(self) -> i8 {
        self as i8
    }

    /// Parses a tag byte.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown tags.
    pub fn from_i8(tag: i8) -> WireResult<Self> {
        match tag {
            0 => Ok(Self::Legacy),
            1 => Ok(Self::Elastic),
            _ => Err(WireError::new(
                "partition config",
                format!("unknown hashinator type {tag}"),
            )),
        }
    }
}

impl fmt::Display for HashinatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Elastic => f.write_str("elastic"),
        }
    }
}

/// A partition map configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionConfig {
    /// Kind of map.
    pub kind: HashinatorType,
    /// Serialized map.
    pub config: Bytes,
    /// Engine-side ring previously installed, or zero.
    pub ring_pointer: u64,
    /// Number of tokens in the ring, or the partition count.
    pub num_tokens: i32,
}

impl PartitionConfig {
    /// Creates a legacy modulus configuration.
    #[must_use]
    pub fn legacy(partition_count: i32) -> Self {
        Self {
            kind: HashinatorType::Legacy,
            config: Bytes::copy_from_slice(&partition_count.to_be_bytes()),
            ring_pointer: 0,
            num_tokens: partition_count,
        }
    }

    /// Creates an elastic configuration from `(token, partition)` pairs.
    ///
    /// The pairs are written in the order given; validation happens when a
    /// hashinator is built from the configuration.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn elastic(ring: &[(i32, PartitionId)]) -> Self {
        let mut config = BytesMut::with_capacity(4 + ring.len() * 8);
        put_len(&mut config, ring.len());
        for (token, partition) in ring {
            config.put_i32(*token);
            config.put_i32(partition.as_i32());
        }
        Self {
            kind: HashinatorType::Elastic,
            config: config.freeze(),
            ring_pointer: 0,
            num_tokens: ring.len() as i32,
        }
    }

    /// Marks the configuration as already installed in the engine.
    #[must_use]
    pub fn with_ring_pointer(mut self, ring_pointer: u64) -> Self {
        self.ring_pointer = ring_pointer;
        self
    }

    /// Returns true if the config bytes must travel with the update.
    #[must_use]
    pub const fn needs_config_bytes(&self) -> bool {
        self.ring_pointer == 0
    }

    /// Decodes the wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed.
    pub fn decode(buf: &mut &[u8]) -> WireResult<Self> {
        need(&*buf, 1 + 8 + 4, "partition config")?;
        let kind = HashinatorType::from_i8(buf.get_i8())?;
        let ring_pointer = buf.get_u64();
        let num_tokens = buf.get_i32();
        let config = Bytes::copy_from_slice(get_prefixed(buf, "partition config")?);
        Ok(Self {
            kind,
            config,
            ring_pointer,
            num_tokens,
        })
    }
}

impl Encode for PartitionConfig {
    fn encoded_len(&self) -> usize {
        1 + 8 + 4 + 4 + self.config.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i8(self.kind.as_i8());
        buf.put_u64(self.ring_pointer);
        buf.put_i32(self.num_tokens);
        put_prefixed(buf, &self.config);
    }
}
