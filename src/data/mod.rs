pub mod loader;

use std::collections::{BTreeMap, HashMap};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default join key across clinical tables
pub const SUBMITTER_ID: &str = "submitter_id";

/// Table with string-typed cells
///
/// Missing cells are stored as the empty string, so every row has exactly
/// `headers.len()` entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StringTable {
    /// Column names in file order
    pub headers: Vec<String>,
    /// Row-major cell values
    pub rows: Vec<Vec<String>>,
}

impl StringTable {
    /// Create a table, padding or truncating rows to the header width
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self { headers, rows }
    }

    /// Number of data rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Check if column exists
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// All values of a column, top to bottom
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }

    /// Column-oriented view: column name -> values
    pub fn to_columns(&self) -> BTreeMap<String, Vec<String>> {
        self.headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), self.rows.iter().map(|r| r[i].clone()).collect()))
            .collect()
    }

    /// Index rows by a key column
    pub fn keyed_by(self, key: &str) -> Result<KeyedTable> {
        KeyedTable::new(self, key)
    }
}

/// Table indexed by a key column
#[derive(Debug, Clone)]
pub struct KeyedTable {
    table: StringTable,
    key: String,
    key_index: usize,
    index: HashMap<String, usize>,
}

impl KeyedTable {
    /// Build the index. The first row for a repeated key wins.
    pub fn new(table: StringTable, key: &str) -> Result<Self> {
        let key_index = table
            .column_index(key)
            .with_context(|| format!("Missing key column: {}", key))?;

        let mut index = HashMap::with_capacity(table.len());
        for (row_idx, row) in table.rows.iter().enumerate() {
            let id = row[key_index].clone();
            if index.contains_key(&id) {
                warn!("Duplicate {} '{}' at row {}, keeping first occurrence", key, id, row_idx + 1);
                continue;
            }
            index.insert(id, row_idx);
        }

        Ok(Self {
            table,
            key: key.to_string(),
            key_index,
            index,
        })
    }

    /// Key column name
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Underlying table
    pub fn table(&self) -> &StringTable {
        &self.table
    }

    /// Number of rows in the underlying table
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Check if table has no rows
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Columns other than the key
    pub fn value_columns(&self) -> impl Iterator<Item = &str> {
        self.table
            .headers
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != self.key_index)
            .map(|(_, h)| h.as_str())
    }

    /// Iterate over distinct keys
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(|k| k.as_str())
    }

    /// Check if key is present
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Cell value for a key and column
    pub fn get(&self, id: &str, column: &str) -> Option<&str> {
        let row = *self.index.get(id)?;
        let col = self.table.column_index(column)?;
        Some(self.table.rows[row][col].as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> StringTable {
        StringTable::new(
            vec!["submitter_id".into(), "age".into(), "race".into()],
            vec![
                vec!["P1".into(), "61".into(), "white".into()],
                vec!["P2".into(), "".into()],
                vec!["P1".into(), "99".into(), "asian".into()],
            ],
        )
    }

    #[test]
    fn test_rows_padded_to_header_width() {
        let t = table();
        assert_eq!(t.rows[1], vec!["P2", "", ""]);
    }

    #[test]
    fn test_keyed_first_duplicate_wins() {
        let keyed = table().keyed_by(SUBMITTER_ID).unwrap();
        assert_eq!(keyed.get("P1", "age"), Some("61"));
        assert_eq!(keyed.ids().count(), 2);
        assert_eq!(keyed.len(), 3);
        assert_eq!(keyed.value_columns().collect::<Vec<_>>(), vec!["age", "race"]);
    }

    #[test]
    fn test_missing_key_column() {
        assert!(table().keyed_by("patient").is_err());
    }

    #[test]
    fn test_to_columns() {
        let cols = table().to_columns();
        assert_eq!(cols["age"], vec!["61", "", "99"]);
    }
}
