//! Catalog framing.
//!
//! ```text
//! [i32 tableCount]{[i32 tableId][i32 nameLen][name][column header]}*
//! ```

use bytes::{Buf, BufMut};
use ee_common::types::TableId;

use super::table::{columns_encoded_len, decode_columns, encode_columns, Column};
use super::{get_len, get_string, need, put_len, put_prefixed, Encode, WireError, WireResult};

/// Schema of one table in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTable {
    /// Table id.
    pub id: TableId,
    /// Table name.
    pub name: String,
    /// Columns; the first one is the row key.
    pub columns: Vec<Column>,
}

impl CatalogTable {
    /// Creates a new catalog entry.
    #[must_use]
    pub fn new(id: TableId, name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            id,
            name: name.into(),
            columns,
        }
    }
}

/// The set of tables an engine knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    tables: Vec<CatalogTable>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is already used or the table has no
    /// key column.
    pub fn add_table(&mut self, table: CatalogTable) -> WireResult<()> {
        if table.columns.is_empty() {
            return Err(WireError::new(
                "catalog",
                format!("table {} has no columns", table.name),
            ));
        }
        if self.table(table.id).is_some() {
            return Err(WireError::new(
                "catalog",
                format!("duplicate table id {}", table.id),
            ));
        }
        self.tables.push(table);
        Ok(())
    }

    /// Builder form of [`add_table`](Self::add_table).
    ///
    /// # Errors
    ///
    /// Same as `add_table`.
    pub fn with_table(mut self, table: CatalogTable) -> WireResult<Self> {
        self.add_table(table)?;
        Ok(self)
    }

    /// Returns the tables in insertion order.
    #[must_use]
    pub fn tables(&self) -> &[CatalogTable] {
        &self.tables
    }

    /// Looks up a table by id.
    #[must_use]
    pub fn table(&self, id: TableId) -> Option<&CatalogTable> {
        self.tables.iter().find(|t| t.id == id)
    }

    /// Decodes a catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed or violates
    /// [`add_table`](Self::add_table)'s rules.
    pub fn decode(buf: &mut &[u8]) -> WireResult<Self> {
        let count = get_len(buf, "catalog")?;
        let mut catalog = Self::new();
        for _ in 0..count {
            need(&*buf, 4, "catalog")?;
            let id = TableId::new(buf.get_i32());
            let name = get_string(buf, "catalog")?;
            let columns = decode_columns(buf)?;
            catalog.add_table(CatalogTable { id, name, columns })?;
        }
        Ok(catalog)
    }
}

impl Encode for Catalog {
    fn encoded_len(&self) -> usize {
        4 + self
            .tables
            .iter()
            .map(|t| 4 + 4 + t.name.len() + columns_encoded_len(&t.columns))
            .sum::<usize>()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        put_len(buf, self.tables.len());
        for table in &self.tables {
            buf.put_i32(table.id.as_i32());
            put_prefixed(buf, table.name.as_bytes());
            encode_columns(&table.columns, buf);
        }
    }
}
