//! Serialized tables.
//!
//! ```text
//! [i16 columnCount]{[i8 type][i32 nameLen][name]}*
//! [i32 rowCount]{[i32 rowLen][tagged value]*}*
//! ```
//!
//! The first column is the row key of keyed tables. [`Table`] owns its
//! rows; [`TableView`] borrows the serialized bytes and decodes rows on
//! demand.

use std::fmt;

use bytes::{Buf, BufMut};

use super::value::{Value, ValueType};
use super::{
    get_count16, get_len, get_prefixed, get_string, need, put_len, put_prefixed, Encode,
    WireError, WireResult,
};

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub value_type: ValueType,
}

impl Column {
    /// Creates a new column.
    #[must_use]
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }

    /// Returns true if `value` may be stored in this column.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        value.is_null() || value.value_type() == self.value_type
    }
}

pub(crate) fn columns_encoded_len(columns: &[Column]) -> usize {
    2 + columns.iter().map(|c| 1 + 4 + c.name.len()).sum::<usize>()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub(crate) fn encode_columns<B: BufMut>(columns: &[Column], buf: &mut B) {
    buf.put_i16(columns.len() as i16);
    for column in columns {
        buf.put_i8(column.value_type.as_i8());
        put_prefixed(buf, column.name.as_bytes());
    }
}

pub(crate) fn decode_columns(buf: &mut &[u8]) -> WireResult<Vec<Column>> {
    let count = get_count16(buf, "column header")?;
    let mut columns = Vec::with_capacity(count.min(buf.len()));
    for _ in 0..count {
        need(&*buf, 1, "column header")?;
        let value_type = ValueType::from_i8(buf.get_i8())?;
        let name = get_string(buf, "column header")?;
        columns.push(Column { name, value_type });
    }
    Ok(columns)
}

fn row_encoded_len(row: &[Value]) -> usize {
    4 + row.iter().map(Value::encoded_len).sum::<usize>()
}

/// An owned table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Largest number of columns a table can have.
    pub const MAX_COLUMNS: usize = i16::MAX as usize;

    /// Creates an empty table with the given columns.
    #[must_use]
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Appends a row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row has the wrong arity or a value does not
    /// match its column type.
    pub fn push_row(&mut self, row: Vec<Value>) -> WireResult<()> {
        check_row(&self.columns, &row)?;
        self.rows.push(row);
        Ok(())
    }

    /// Builder form of [`push_row`](Self::push_row).
    ///
    /// # Errors
    ///
    /// Same as `push_row`.
    pub fn with_row(mut self, row: Vec<Value>) -> WireResult<Self> {
        self.push_row(row)?;
        Ok(self)
    }

    /// Returns the columns.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Consumes the table and returns its rows.
    #[must_use]
    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    /// Returns the encoded size of all row records, without the header.
    #[must_use]
    pub fn rows_encoded_len(&self) -> usize {
        self.rows.iter().map(|r| row_encoded_len(r)).sum()
    }

    /// Writes one `[i32 rowLen][values]` record.
    pub fn encode_row<B: BufMut>(row: &[Value], buf: &mut B) {
        put_len(buf, row_encoded_len(row) - 4);
        for value in row {
            value.encode(buf);
        }
    }

    /// Returns the size of one row record.
    #[must_use]
    pub fn row_len(row: &[Value]) -> usize {
        row_encoded_len(row)
    }

    /// Decodes a table, consuming its bytes from `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed.
    pub fn decode(buf: &mut &[u8]) -> WireResult<Self> {
        let columns = decode_columns(buf)?;
        let row_count = get_len(buf, "table")?;
        let mut rows = Vec::with_capacity(row_count.min(buf.len() / 4));
        for _ in 0..row_count {
            let mut row_bytes = get_prefixed(buf, "table row")?;
            let row = decode_row(&mut row_bytes)?;
            check_row(&columns, &row)?;
            rows.push(row);
        }
        Ok(Self { columns, rows })
    }

    /// Decodes a run of row records with no table header, the form table
    /// streams and export blocks carry.
    ///
    /// # Errors
    ///
    /// Returns an error if a record is truncated or a value is malformed.
    pub fn decode_rows(bytes: &[u8]) -> WireResult<Vec<Vec<Value>>> {
        let mut buf = bytes;
        let mut rows = Vec::new();
        while !buf.is_empty() {
            let mut row_bytes = get_prefixed(&mut buf, "row record")?;
            rows.push(decode_row(&mut row_bytes)?);
        }
        Ok(rows)
    }
}

impl Encode for Table {
    fn encoded_len(&self) -> usize {
        columns_encoded_len(&self.columns) + 4 + self.rows_encoded_len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        encode_columns(&self.columns, buf);
        put_len(buf, self.rows.len());
        for row in &self.rows {
            Self::encode_row(row, buf);
        }
    }
}

fn check_row(columns: &[Column], row: &[Value]) -> WireResult<()> {
    if row.len() != columns.len() {
        return Err(WireError::new(
            "table row",
            format!("{} values for {} columns", row.len(), columns.len()),
        ));
    }
    for (column, value) in columns.iter().zip(row) {
        if !column.accepts(value) {
            return Err(WireError::new(
                "table row",
                format!(
                    "column {} is {}, got {}",
                    column.name,
                    column.value_type,
                    value.value_type()
                ),
            ));
        }
    }
    Ok(())
}

fn decode_row(buf: &mut &[u8]) -> WireResult<Vec<Value>> {
    let mut row = Vec::new();
    while !buf.is_empty() {
        row.push(Value::decode(buf)?);
    }
    Ok(row)
}

/// A zero-copy view over a serialized table.
///
/// Construction validates the header and the row framing; row values are
/// decoded when asked for.
#[derive(Clone)]
pub struct TableView<'a> {
    bytes: &'a [u8],
    columns: Vec<Column>,
    row_count: usize,
    rows: &'a [u8],
}

impl<'a> TableView<'a> {
    /// Parses a view over exactly one serialized table.
    ///
    /// # Errors
    ///
    /// Returns an error if the header or row framing is malformed, or if
    /// bytes are left over after the last row.
    pub fn parse(bytes: &'a [u8]) -> WireResult<Self> {
        let mut buf = bytes;
        let columns = decode_columns(&mut buf)?;
        let row_count = get_len(&mut buf, "table")?;
        let rows = buf;
        for _ in 0..row_count {
            get_prefixed(&mut buf, "table row")?;
        }
        if !buf.is_empty() {
            return Err(WireError::new(
                "table",
                format!("{} bytes after the last row", buf.len()),
            ));
        }
        let rows = &rows[..rows.len() - buf.len()];
        Ok(Self {
            bytes,
            columns,
            row_count,
            rows,
        })
    }

    /// Returns the serialized table.
    #[must_use]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Returns the columns.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Iterates over the rows.
    #[must_use]
    pub fn rows(&self) -> RowIter<'a> {
        RowIter {
            buf: self.rows,
            remaining: self.row_count,
        }
    }

    /// Copies the view into an owned table.
    ///
    /// # Errors
    ///
    /// Returns an error if a row does not decode or does not match the
    /// columns.
    pub fn to_table(&self) -> WireResult<Table> {
        let mut table = Table::new(self.columns.clone());
        for row in self.rows() {
            table.push_row(row.values()?)?;
        }
        Ok(table)
    }
}

impl fmt::Debug for TableView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableView")
            .field("columns", &self.columns)
            .field("row_count", &self.row_count)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Iterator over the rows of a [`TableView`].
#[derive(Debug, Clone)]
pub struct RowIter<'a> {
    buf: &'a [u8],
    remaining: usize,
}

impl<'a> Iterator for RowIter<'a> {
    type Item = RowView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        // Framing was validated when the view was parsed.
        let bytes = get_prefixed(&mut self.buf, "table row").ok()?;
        self.remaining -= 1;
        Some(RowView { bytes })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for RowIter<'_> {}

/// One serialized row.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    bytes: &'a [u8],
}

impl<'a> RowView<'a> {
    /// Returns the row's value bytes, without the length prefix.
    #[must_use]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Decodes the row's values.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is malformed.
    pub fn values(&self) -> WireResult<Vec<Value>> {
        let mut buf = self.bytes;
        decode_row(&mut buf)
    }

    /// Decodes only the first value, the row key.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is empty or the value is malformed.
    pub fn key(&self) -> WireResult<Value> {
        let mut buf = self.bytes;
        if buf.is_empty() {
            return Err(WireError::new("table row", "row has no key"));
        }
        Value::decode(&mut buf)
    }
}
