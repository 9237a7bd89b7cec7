//! Export and recovery framings.
//!
//! ```text
//! export action     [i8 sync][i64 ackOffset][i64 seqNo][i32 partitionId][i32 sigLen][signature]
//! export positions  [i32 sigLen][signature]
//! export block      [i64 uso][i32 len][row records]
//! stream positions  [i64 uso][i64 seqNo]
//! recovery message  [i32 tableId][i32 len][row records]
//! ```
//!
//! Row records are `[i32 rowLen][values]`, the layout table streams write
//! into their destinations, so the output of a recovery stream can be
//! handed to another engine unchanged.

use bytes::{Buf, BufMut, Bytes};
use ee_common::types::{PartitionId, TableId};

use super::{finish, get_bool, get_prefixed, need, put_prefixed, Encode, WireError, WireResult};

fn get_str<'a>(buf: &mut &'a [u8], what: &'static str) -> WireResult<&'a str> {
    let raw = get_prefixed(buf, what)?;
    std::str::from_utf8(raw).map_err(|err| WireError::new(what, err.to_string()))
}

/// Acknowledge, poll or realign an export stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportAction<'a> {
    /// Realign the stream to `ack_offset` and `seq_no` instead of polling.
    pub sync: bool,
    /// Stream offset everything before which has been consumed, or zero.
    pub ack_offset: i64,
    /// Sequence number of the acknowledged block, or negative for none.
    pub seq_no: i64,
    /// Partition the stream belongs to.
    pub partition_id: PartitionId,
    /// Signature naming the export table.
    pub signature: &'a str,
}

impl<'a> ExportAction<'a> {
    /// Decodes an export action.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed.
    pub fn decode(bytes: &'a [u8]) -> WireResult<Self> {
        let mut buf = bytes;
        let sync = get_bool(&mut buf, "export action")?;
        need(&buf, 8 + 8 + 4, "export action")?;
        let ack_offset = buf.get_i64();
        let seq_no = buf.get_i64();
        let partition_id = PartitionId::new(buf.get_i32());
        let signature = get_str(&mut buf, "export action")?;
        finish(buf, "export action")?;
        Ok(Self {
            sync,
            ack_offset,
            seq_no,
            partition_id,
            signature,
        })
    }
}

impl Encode for ExportAction<'_> {
    fn encoded_len(&self) -> usize {
        1 + 8 + 8 + 4 + 4 + self.signature.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(u8::from(self.sync));
        buf.put_i64(self.ack_offset);
        buf.put_i64(self.seq_no);
        buf.put_i32(self.partition_id.as_i32());
        put_prefixed(buf, self.signature.as_bytes());
    }
}

/// Ask for the positions of an export stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportPositionsRequest<'a> {
    /// Signature naming the export table.
    pub signature: &'a str,
}

impl<'a> ExportPositionsRequest<'a> {
    /// Decodes the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed.
    pub fn decode(bytes: &'a [u8]) -> WireResult<Self> {
        let mut buf = bytes;
        let signature = get_str(&mut buf, "export positions request")?;
        finish(buf, "export positions request")?;
        Ok(Self { signature })
    }
}

impl Encode for ExportPositionsRequest<'_> {
    fn encoded_len(&self) -> usize {
        4 + self.signature.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        put_prefixed(buf, self.signature.as_bytes());
    }
}

/// Where an export stream stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportPositions {
    /// Universal stream offset: bytes committed to the stream so far.
    pub uso: i64,
    /// Sequence number of the last acknowledged block.
    pub seq_no: i64,
}

impl ExportPositions {
    /// Decodes positions.
    ///
    /// # Errors
    ///
    /// Returns an error unless the frame is exactly sixteen bytes.
    pub fn decode(bytes: &[u8]) -> WireResult<Self> {
        let mut buf = bytes;
        need(&buf, 16, "export positions")?;
        let positions = Self {
            uso: buf.get_i64(),
            seq_no: buf.get_i64(),
        };
        finish(buf, "export positions")?;
        Ok(positions)
    }
}

impl Encode for ExportPositions {
    fn encoded_len(&self) -> usize {
        16
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i64(self.uso);
        buf.put_i64(self.seq_no);
    }
}

/// Unacknowledged export data, starting at stream offset `uso`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportBlock {
    /// Stream offset of the first byte of `data`.
    pub uso: i64,
    /// Row records.
    pub data: Bytes,
}

impl ExportBlock {
    /// Decodes a block, copying its data.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed.
    pub fn decode(bytes: &[u8]) -> WireResult<Self> {
        let mut buf = bytes;
        need(&buf, 8, "export block")?;
        let uso = buf.get_i64();
        let data = Bytes::copy_from_slice(get_prefixed(&mut buf, "export block")?);
        finish(buf, "export block")?;
        Ok(Self { uso, data })
    }

    /// Returns the stream offset just past the block.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn end_uso(&self) -> i64 {
        self.uso + self.data.len() as i64
    }

    /// Returns true if there was nothing to export.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Encode for ExportBlock {
    fn encoded_len(&self) -> usize {
        8 + 4 + self.data.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i64(self.uso);
        put_prefixed(buf, &self.data);
    }
}

/// Rows streamed from a recovering table's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryMessage<'a> {
    /// Table the rows belong to.
    pub table_id: TableId,
    /// Row records.
    pub rows: &'a [u8],
}

impl<'a> RecoveryMessage<'a> {
    /// Decodes the message without copying the rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed.
    pub fn decode(bytes: &'a [u8]) -> WireResult<Self> {
        let mut buf = bytes;
        need(&buf, 4, "recovery message")?;
        let table_id = TableId::new(buf.get_i32());
        let rows = get_prefixed(&mut buf, "recovery message")?;
        finish(buf, "recovery message")?;
        Ok(Self { table_id, rows })
    }
}

impl Encode for RecoveryMessage<'_> {
    fn encoded_len(&self) -> usize {
        4 + 4 + self.rows.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32(self.table_id.as_i32());
        put_prefixed(buf, self.rows);
    }
}
