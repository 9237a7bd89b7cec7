//! Binary log segments and replication conflicts.
//!
//! A segment is a slice of a remote cluster's replicated log:
//!
//! ```text
//! [i32 recordCount]{[i8 op][i32 tableId][i32 rowLen][tagged values]}*
//! ```
//!
//! The first value of each row is the row key. Conflicts found while
//! applying a segment are reported back as:
//!
//! ```text
//! [i32 conflictCount]{[i32 recordIndex][i8 kind]}*
//! ```

use std::fmt;

use bytes::{Buf, BufMut};
use ee_common::types::TableId;

use super::table::Table;
use super::value::Value;
use super::{get_len, get_prefixed, need, put_len, Encode, WireError, WireResult};

/// Operation carried by a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum LogOp {
    /// Insert a new row.
    Insert = 0,
    /// Delete the row with the record's key.
    Delete = 1,
    /// Replace the row with the record's key.
    Update = 2,
}

impl LogOp {
    /// Parses an op byte.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown ops.
    pub fn from_i8(op: i8) -> WireResult<Self> {
        match op {
            0 => Ok(Self::Insert),
            1 => Ok(Self::Delete),
            2 => Ok(Self::Update),
            _ => Err(WireError::new("log record", format!("unknown op {op}"))),
        }
    }
}

/// One replicated row change.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// What to do.
    pub op: LogOp,
    /// Target table.
    pub table_id: TableId,
    /// The row; its first value is the key.
    pub row: Vec<Value>,
}

impl LogRecord {
    /// Creates an insert record.
    #[must_use]
    pub fn insert(table_id: TableId, row: Vec<Value>) -> Self {
        Self {
            op: LogOp::Insert,
            table_id,
            row,
        }
    }

    /// Creates a delete record.
    #[must_use]
    pub fn delete(table_id: TableId, row: Vec<Value>) -> Self {
        Self {
            op: LogOp::Delete,
            table_id,
            row,
        }
    }

    /// Creates an update record.
    #[must_use]
    pub fn update(table_id: TableId, row: Vec<Value>) -> Self {
        Self {
            op: LogOp::Update,
            table_id,
            row,
        }
    }

    /// Returns the row key.
    #[must_use]
    pub fn key(&self) -> Option<&Value> {
        self.row.first()
    }
}

/// A decoded binary log segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinaryLogSegment {
    records: Vec<LogRecord>,
}

impl BinaryLogSegment {
    /// Creates an empty segment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record.
    pub fn push(&mut self, record: LogRecord) {
        self.records.push(record);
    }

    /// Builder form of [`push`](Self::push).
    #[must_use]
    pub fn with(mut self, record: LogRecord) -> Self {
        self.push(record);
        self
    }

    /// Returns the records.
    #[must_use]
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Decodes a whole segment.
    ///
    /// # Errors
    ///
    /// Returns an error if any record is malformed, a row is empty, or
    /// bytes are left over.
    pub fn decode(bytes: &[u8]) -> WireResult<Self> {
        let mut buf = bytes;
        let count = get_len(&mut buf, "log segment")?;
        let mut records = Vec::with_capacity(count.min(buf.len() / 9));
        for _ in 0..count {
            need(&buf, 5, "log record")?;
            let op = LogOp::from_i8(buf.get_i8())?;
            let table_id = TableId::new(buf.get_i32());
            let mut row_bytes = get_prefixed(&mut buf, "log record")?;
            let mut row = Vec::new();
            while !row_bytes.is_empty() {
                row.push(Value::decode(&mut row_bytes)?);
            }
            if row.is_empty() {
                return Err(WireError::new("log record", "row has no key"));
            }
            records.push(LogRecord { op, table_id, row });
        }
        if !buf.is_empty() {
            return Err(WireError::new(
                "log segment",
                format!("{} trailing bytes", buf.len()),
            ));
        }
        Ok(Self { records })
    }
}

impl Encode for BinaryLogSegment {
    fn encoded_len(&self) -> usize {
        4 + self
            .records
            .iter()
            .map(|r| 1 + 4 + Table::row_len(&r.row))
            .sum::<usize>()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        put_len(buf, self.records.len());
        for record in &self.records {
            buf.put_i8(record.op as i8);
            buf.put_i32(record.table_id.as_i32());
            Table::encode_row(&record.row, buf);
        }
    }
}

/// Why a record was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum ConflictKind {
    /// An identical row is already present.
    Duplicate = 0,
    /// An insert found a different row under the same key.
    ExistingRow = 1,
    /// A delete or update found no row under the key.
    MissingRow = 2,
}

impl ConflictKind {
    /// Parses a kind byte.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown kinds.
    pub fn from_i8(kind: i8) -> WireResult<Self> {
        match kind {
            0 => Ok(Self::Duplicate),
            1 => Ok(Self::ExistingRow),
            2 => Ok(Self::MissingRow),
            _ => Err(WireError::new("conflict list", format!("unknown kind {kind}"))),
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Duplicate => "duplicate row",
            Self::ExistingRow => "existing row",
            Self::MissingRow => "missing row",
        };
        f.write_str(name)
    }
}

/// A record that was skipped during application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Conflict {
    /// Index of the record within its segment.
    pub record_index: usize,
    /// What went wrong.
    pub kind: ConflictKind,
}

/// Returns the encoded size of a conflict list.
#[must_use]
pub fn conflicts_encoded_len(conflicts: &[Conflict]) -> usize {
    4 + conflicts.len() * 5
}

/// Writes a conflict list.
pub fn encode_conflicts<B: BufMut>(conflicts: &[Conflict], buf: &mut B) {
    put_len(buf, conflicts.len());
    for conflict in conflicts {
        put_len(buf, conflict.record_index);
        buf.put_i8(conflict.kind as i8);
    }
}

/// Reads a conflict list.
///
/// # Errors
///
/// Returns an error if the list is truncated or holds an unknown kind.
pub fn decode_conflicts(buf: &mut &[u8]) -> WireResult<Vec<Conflict>> {
    let count = get_len(buf, "conflict list")?;
    let mut conflicts = Vec::with_capacity(count.min(buf.len() / 5));
    for _ in 0..count {
        let record_index = get_len(buf, "conflict list")?;
        need(&*buf, 1, "conflict list")?;
        let kind = ConflictKind::from_i8(buf.get_i8())?;
        conflicts.push(Conflict { record_index, kind });
    }
    Ok(conflicts)
}
