use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One emitted table row: column name → value
pub type Row = Map<String, Value>;

/// Finished tables keyed by their resolved output name
pub type Tables = IndexMap<String, Table>;

/// Column a table gets when its rows carry no declared key
pub const GENERATED_PKEY: &str = "generated_pkey";

/// Column holding the value of a non-object list element
pub const SCALAR_COLUMN: &str = "data";

/// A primary key of a parent row, carried into its child rows as a foreign key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    /// Column name the key gets in child rows
    pub name: String,
    pub value: Value,
    /// Identity of the table that owns the key
    pub table: String,
    /// Content hash rather than a declared column
    pub synthesized: bool,
}

/// A finished, rectangular output table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub name: String,
    /// First-observed column order; every row has exactly these keys
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, top to bottom
    pub fn column(&self, name: &str) -> Vec<&Value> {
        self.rows.iter().filter_map(|row| row.get(name)).collect()
    }
}

/// Rows of one table accumulated during a walk
#[derive(Debug, Clone)]
pub(crate) struct TableBuffer {
    /// Schema path of the node that defines the table
    pub path: Vec<String>,
    pub table_id: String,
    pub columns: IndexSet<String>,
    pub rows: Vec<Row>,
}

impl TableBuffer {
    pub fn new(path: Vec<String>, table_id: String) -> Self {
        TableBuffer {
            path,
            table_id,
            columns: IndexSet::new(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Row) {
        for column in row.keys() {
            if !self.columns.contains(column) {
                self.columns.insert(column.clone());
            }
        }
        self.rows.push(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_buffer_tracks_first_observed_columns() {
        let mut buffer = TableBuffer::new(vec![], "root".to_string());
        buffer.push(serde_json::from_value(json!({"b": 1, "a": 2})).unwrap());
        buffer.push(serde_json::from_value(json!({"c": 3, "a": 4})).unwrap());

        let columns: Vec<_> = buffer.columns.iter().cloned().collect();
        assert_eq!(columns, vec!["b", "a", "c"]);
        assert_eq!(buffer.rows.len(), 2);
    }
}
