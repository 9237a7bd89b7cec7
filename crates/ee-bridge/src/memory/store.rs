//! Keyed in-memory tables with an undo log.

use std::collections::BTreeMap;
use std::hash::Hasher;

use ee_common::error::EngineError;
use ee_common::types::{TableId, UndoToken};
use siphasher::sip::SipHasher13;
use tracing::trace;

use crate::wire::{Catalog, Column, Table, Value};

const TABLE_HASH_KEY_0: u64 = 0x7461_626c_655f_6861;
const TABLE_HASH_KEY_1: u64 = 0x7368_5f63_6f64_6501;

/// One table's schema and rows, ordered by the encoded row key.
#[derive(Debug, Clone)]
pub(crate) struct MemTable {
    pub(crate) name: String,
    pub(crate) columns: Vec<Column>,
    pub(crate) rows: BTreeMap<Vec<u8>, Vec<Value>>,
}

impl MemTable {
    /// Copies the rows into an owned table.
    pub(crate) fn to_table(&self) -> Result<Table, EngineError> {
        let mut table = Table::new(self.columns.clone());
        for row in self.rows.values() {
            table
                .push_row(row.clone())
                .map_err(|err| EngineError::unexpected(err.to_string()))?;
        }
        Ok(table)
    }
}

/// Result of inserting a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Inserted {
    Inserted,
    /// An identical row is already stored under the key.
    Duplicate,
    /// A different row is already stored under the key.
    Existing,
}

#[derive(Debug, Clone)]
enum UndoAction {
    Inserted { table: TableId, key: Vec<u8> },
    Deleted { table: TableId, key: Vec<u8>, row: Vec<Value> },
    Replaced { table: TableId, key: Vec<u8>, row: Vec<Value> },
}

/// All tables of one engine, plus the undo log of unresolved tokens.
#[derive(Debug, Default)]
pub(crate) struct TableStore {
    tables: BTreeMap<TableId, MemTable>,
    undo_log: BTreeMap<UndoToken, Vec<UndoAction>>,
    mutations: u64,
}

impl TableStore {
    /// Applies a catalog. Tables that survive with identical columns keep
    /// their rows; everything else starts empty.
    pub(crate) fn apply_catalog(&mut self, catalog: &Catalog) {
        let mut previous = std::mem::take(&mut self.tables);
        for entry in catalog.tables() {
            let rows = previous
                .remove(&entry.id)
                .filter(|old| old.columns == entry.columns)
                .map(|old| old.rows)
                .unwrap_or_default();
            self.tables.insert(
                entry.id,
                MemTable {
                    name: entry.name.clone(),
                    columns: entry.columns.clone(),
                    rows,
                },
            );
        }
        self.undo_log.clear();
    }

    pub(crate) fn table(&self, id: TableId) -> Result<&MemTable, EngineError> {
        self.tables
            .get(&id)
            .ok_or_else(|| EngineError::sql("42S02", format!("unknown table {id}")))
    }

    fn table_mut(&mut self, id: TableId) -> Result<&mut MemTable, EngineError> {
        self.tables
            .get_mut(&id)
            .ok_or_else(|| EngineError::sql("42S02", format!("unknown table {id}")))
    }

    pub(crate) fn tables(&self) -> impl Iterator<Item = (TableId, &MemTable)> {
        self.tables.iter().map(|(id, table)| (*id, table))
    }

    /// Returns the number of row changes made so far.
    pub(crate) const fn mutations(&self) -> u64 {
        self.mutations
    }

    fn log(&mut self, token: UndoToken, action: UndoAction) {
        self.mutations += 1;
        if token != UndoToken::NO_UNDO {
            self.undo_log.entry(token).or_default().push(action);
        }
    }

    fn check_row(table: &MemTable, row: &[Value]) -> Result<Vec<u8>, EngineError> {
        if row.len() != table.columns.len()
            || !table.columns.iter().zip(row).all(|(c, v)| c.accepts(v))
        {
            return Err(EngineError::sql(
                "22000",
                format!("row does not match the columns of {}", table.name),
            ));
        }
        row.first()
            .map(Value::to_key)
            .ok_or_else(|| EngineError::sql("22000", format!("{} has no key column", table.name)))
    }

    /// Checks that `row` fits a table's columns.
    pub(crate) fn validate_row(&self, table_id: TableId, row: &[Value]) -> Result<(), EngineError> {
        Self::check_row(self.table(table_id)?, row).map(|_| ())
    }

    /// Inserts a row unless its key is taken.
    pub(crate) fn insert(
        &mut self,
        token: UndoToken,
        table_id: TableId,
        row: Vec<Value>,
    ) -> Result<Inserted, EngineError> {
        let table = self.table_mut(table_id)?;
        let key = Self::check_row(table, &row)?;
        if let Some(existing) = table.rows.get(&key) {
            return Ok(if *existing == row {
                Inserted::Duplicate
            } else {
                Inserted::Existing
            });
        }
        table.rows.insert(key.clone(), row);
        self.log(token, UndoAction::Inserted { table: table_id, key });
        Ok(Inserted::Inserted)
    }

    /// Deletes the row stored under `key`, returning it.
    pub(crate) fn delete(
        &mut self,
        token: UndoToken,
        table_id: TableId,
        key: &Value,
    ) -> Result<Option<Vec<Value>>, EngineError> {
        let key = key.to_key();
        let table = self.table_mut(table_id)?;
        let Some(row) = table.rows.remove(&key) else {
            return Ok(None);
        };
        self.log(
            token,
            UndoAction::Deleted {
                table: table_id,
                key,
                row: row.clone(),
            },
        );
        Ok(Some(row))
    }

    /// Replaces the row stored under the new row's key, returning the old
    /// row. Nothing changes if the key is absent.
    pub(crate) fn replace(
        &mut self,
        token: UndoToken,
        table_id: TableId,
        row: Vec<Value>,
    ) -> Result<Option<Vec<Value>>, EngineError> {
        let table = self.table_mut(table_id)?;
        let key = Self::check_row(table, &row)?;
        let Some(slot) = table.rows.get_mut(&key) else {
            return Ok(None);
        };
        let old = std::mem::replace(slot, row);
        self.log(
            token,
            UndoAction::Replaced {
                table: table_id,
                key,
                row: old.clone(),
            },
        );
        Ok(Some(old))
    }

    /// Forgets the undo actions of every token up to and including `token`.
    pub(crate) fn release(&mut self, token: UndoToken) {
        let kept = self.undo_log.split_off(&token.next());
        let released = std::mem::replace(&mut self.undo_log, kept);
        trace!(%token, tokens = released.len(), "Released undo actions");
    }

    /// Reverts the actions of `token` and every later token, newest first.
    pub(crate) fn undo(&mut self, token: UndoToken) {
        let undone = self.undo_log.split_off(&token);
        for (_, actions) in undone.into_iter().rev() {
            for action in actions.into_iter().rev() {
                self.revert(action);
            }
        }
    }

    fn revert(&mut self, action: UndoAction) {
        self.mutations += 1;
        match action {
            UndoAction::Inserted { table, key } => {
                if let Some(t) = self.tables.get_mut(&table) {
                    t.rows.remove(&key);
                }
            }
            UndoAction::Deleted { table, key, row } | UndoAction::Replaced { table, key, row } => {
                if let Some(t) = self.tables.get_mut(&table) {
                    t.rows.insert(key, row);
                }
            }
        }
    }

    /// Returns a non-negative hash of a table's rows in key order.
    #[allow(clippy::cast_possible_wrap)]
    pub(crate) fn hash_code(&self, table_id: TableId) -> Result<i64, EngineError> {
        let table = self.table(table_id)?;
        let mut hasher = SipHasher13::new_with_keys(TABLE_HASH_KEY_0, TABLE_HASH_KEY_1);
        for row in table.rows.values() {
            let mut bytes = Vec::with_capacity(Table::row_len(row));
            Table::encode_row(row, &mut bytes);
            hasher.write(&bytes);
        }
        Ok((hasher.finish() >> 1) as i64)
    }

    pub(crate) fn clear(&mut self) {
        self.tables.clear();
        self.undo_log.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{CatalogTable, ValueType};

    fn store() -> TableStore {
        let catalog = Catalog::new()
            .with_table(CatalogTable::new(
                TableId::new(1),
                "accounts",
                vec![
                    Column::new("id", ValueType::BigInt),
                    Column::new("owner", ValueType::String),
                ],
            ))
            .unwrap();
        let mut store = TableStore::default();
        store.apply_catalog(&catalog);
        store
    }

    fn row(id: i64, owner: &str) -> Vec<Value> {
        vec![Value::BigInt(id), Value::from(owner)]
    }

    #[test]
    fn test_insert_reports_collisions() {
        let mut store = store();
        let t = UndoToken::new(1);
        let table = TableId::new(1);
        assert_eq!(store.insert(t, table, row(1, "ann")).unwrap(), Inserted::Inserted);
        assert_eq!(store.insert(t, table, row(1, "ann")).unwrap(), Inserted::Duplicate);
        assert_eq!(store.insert(t, table, row(1, "bob")).unwrap(), Inserted::Existing);
        assert!(store.insert(t, table, vec![Value::BigInt(2)]).is_err());
        assert!(store.insert(t, TableId::new(9), row(3, "cy")).is_err());
    }

    #[test]
    fn test_undo_reverts_newest_first() {
        let mut store = store();
        let table = TableId::new(1);
        store.insert(UndoToken::new(1), table, row(1, "ann")).unwrap();
        store.insert(UndoToken::new(2), table, row(2, "bob")).unwrap();
        store.replace(UndoToken::new(2), table, row(1, "zed")).unwrap();
        store.delete(UndoToken::new(3), table, &Value::BigInt(1)).unwrap();
        assert_eq!(store.table(table).unwrap().rows.len(), 1);

        store.undo(UndoToken::new(2));
        let rows: Vec<_> = store.table(table).unwrap().rows.values().cloned().collect();
        assert_eq!(rows, vec![row(1, "ann")]);
    }

    #[test]
    fn test_release_keeps_later_tokens_undoable() {
        let mut store = store();
        let table = TableId::new(1);
        store.insert(UndoToken::new(1), table, row(1, "ann")).unwrap();
        store.insert(UndoToken::new(2), table, row(2, "bob")).unwrap();
        store.release(UndoToken::new(1));
        store.undo(UndoToken::new(1));
        assert_eq!(store.table(table).unwrap().rows.len(), 1);
    }

    #[test]
    fn test_hash_code_tracks_contents() {
        let mut store = store();
        let table = TableId::new(1);
        let empty = store.hash_code(table).unwrap();
        store.insert(UndoToken::NO_UNDO, table, row(1, "ann")).unwrap();
        let one = store.hash_code(table).unwrap();
        assert!(one >= 0);
        assert_ne!(empty, one);
        store.delete(UndoToken::NO_UNDO, table, &Value::BigInt(1)).unwrap();
        assert_eq!(store.hash_code(table).unwrap(), empty);
    }

    #[test]
    fn test_catalog_update_keeps_matching_tables() {
        let mut store = store();
        store.insert(UndoToken::NO_UNDO, TableId::new(1), row(1, "ann")).unwrap();
        let catalog = Catalog::new()
            .with_table(CatalogTable::new(
                TableId::new(1),
                "accounts",
                vec![
                    Column::new("id", ValueType::BigInt),
                    Column::new("owner", ValueType::String),
                ],
            ))
            .unwrap()
            .with_table(CatalogTable::new(
                TableId::new(2),
                "audit",
                vec![Column::new("id", ValueType::BigInt)],
            ))
            .unwrap();
        store.apply_catalog(&catalog);
        assert_eq!(store.table(TableId::new(1)).unwrap().rows.len(), 1);
        assert!(store.table(TableId::new(2)).unwrap().rows.is_empty());
    }
}
