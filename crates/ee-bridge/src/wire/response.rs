//! Response buffer framings written by the engine.
//!
//! Results of fragment batches, table serialization and table loads use
//!
//! ```text
//! [i32 totalSize][bool dirty]{[i32 depCount=1][i32 depId][i32 tableSize][table]}*
//! ```
//!
//! where `totalSize` counts the bytes after the header. Tasks use the
//! same header followed by an opaque payload. Stream continuations write a
//! bare position list `[i32 count]{[i32 position]}*`.

use bytes::{Buf, BufMut, Bytes};
use ee_common::constants::{DEPENDENCIES_PER_FRAGMENT, DEPENDENCY_HEADER_SIZE, RESPONSE_HEADER_SIZE};
use ee_common::types::DependencyId;

use super::{finish, get_len, need, put_len, Encode, WireError, WireResult};

/// One fragment's result as written by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyResult {
    /// Output dependency id.
    pub id: DependencyId,
    /// Serialized result table.
    pub table: Bytes,
}

/// A `[header]{dependency}*` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentResponse {
    /// Whether the call mutated persistent state.
    pub dirty: bool,
    /// Results in fragment submission order.
    pub dependencies: Vec<DependencyResult>,
}

impl FragmentResponse {
    fn payload_len(&self) -> usize {
        self.dependencies
            .iter()
            .map(|d| DEPENDENCY_HEADER_SIZE + d.table.len())
            .sum()
    }
}

impl Encode for FragmentResponse {
    fn encoded_len(&self) -> usize {
        RESPONSE_HEADER_SIZE + self.payload_len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        put_len(buf, self.payload_len());
        buf.put_u8(u8::from(self.dirty));
        for dependency in &self.dependencies {
            buf.put_i32(DEPENDENCIES_PER_FRAGMENT);
            buf.put_i32(dependency.id.as_i32());
            put_len(buf, dependency.table.len());
            buf.put_slice(&dependency.table);
        }
    }
}

/// A `[header][payload]` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadResponse {
    /// Whether the call mutated persistent state.
    pub dirty: bool,
    /// Opaque result bytes.
    pub payload: Bytes,
}

impl Encode for PayloadResponse {
    fn encoded_len(&self) -> usize {
        RESPONSE_HEADER_SIZE + self.payload.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        put_len(buf, self.payload.len());
        buf.put_u8(u8::from(self.dirty));
        buf.put_slice(&self.payload);
    }
}

/// Positions written by one stream continuation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionList(pub Vec<i32>);

impl PositionList {
    /// Reads a position list.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is truncated.
    pub fn decode(buf: &mut &[u8]) -> WireResult<Self> {
        let count = get_len(buf, "position list")?;
        need(&*buf, count.saturating_mul(4), "position list")?;
        let positions = (0..count).map(|_| buf.get_i32()).collect::<Vec<_>>();
        if let Some(bad) = positions.iter().find(|p| **p < 0) {
            return Err(WireError::new(
                "position list",
                format!("negative position {bad}"),
            ));
        }
        Ok(Self(positions))
    }
}

impl Encode for PositionList {
    fn encoded_len(&self) -> usize {
        4 + 4 * self.0.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        put_len(buf, self.0.len());
        for position in &self.0 {
            buf.put_i32(*position);
        }
    }
}

/// Per-table row counts returned by partition validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowCounts(pub Vec<i64>);

impl RowCounts {
    /// Reads `[i32 count]{[i64 rows]}*`.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is truncated or has trailing bytes.
    pub fn decode(bytes: &[u8]) -> WireResult<Self> {
        let mut buf = bytes;
        let count = get_len(&mut buf, "row counts")?;
        need(&buf, count.saturating_mul(8), "row counts")?;
        let counts = (0..count).map(|_| buf.get_i64()).collect();
        finish(buf, "row counts")?;
        Ok(Self(counts))
    }
}

impl Encode for RowCounts {
    fn encoded_len(&self) -> usize {
        4 + 8 * self.0.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        put_len(buf, self.0.len());
        for count in &self.0 {
            buf.put_i64(*count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_response_layout() {
        let response = FragmentResponse {
            dirty: true,
            dependencies: vec![DependencyResult {
                id: DependencyId::new(3),
                table: Bytes::from_static(b"abcd"),
            }],
        };
        let bytes = response.to_bytes();
        assert_eq!(bytes.len(), response.encoded_len());
        assert_eq!(&bytes[..4], &16i32.to_be_bytes());
        assert_eq!(bytes[4], 1);
        assert_eq!(&bytes[5..9], &1i32.to_be_bytes());
        assert_eq!(&bytes[9..13], &3i32.to_be_bytes());
        assert_eq!(&bytes[13..17], &4i32.to_be_bytes());
        assert_eq!(&bytes[17..], b"abcd");
    }

    #[test]
    fn test_position_list() {
        let list = PositionList(vec![0, 128, 4096]);
        let bytes = list.to_bytes();
        let mut buf = &bytes[..];
        assert_eq!(PositionList::decode(&mut buf).unwrap(), list);

        let mut buf = &bytes[..6];
        assert!(PositionList::decode(&mut buf).is_err());
    }

    #[test]
    fn test_row_counts_reject_trailing_bytes() {
        let mut bytes = RowCounts(vec![0, 12]).to_bytes().to_vec();
        assert_eq!(RowCounts::decode(&bytes).unwrap(), RowCounts(vec![0, 12]));
        bytes.push(1);
        assert!(RowCounts::decode(&bytes).is_err());
    }
}
