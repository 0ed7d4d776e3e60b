use crate::error::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// How a nested object without a declared table is flattened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DictStrategy {
    /// Inline its fields into the parent row
    #[default]
    ToColumns,
    /// Store it as one JSON string
    ToStr,
}

/// How an array is flattened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListStrategy {
    /// One child-table row per element
    #[default]
    ToRows,
    /// One `<column>_<index>` column per element
    ToColumns,
    /// Store it as one JSON string
    ToStr,
}

/// Configuration for the melting process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeltConfig {
    /// Identity of the main table; child tables are qualified with it
    pub root_name: String,

    /// Dot-separated path to the list of records inside the input
    pub root_node: Option<String>,

    /// Grow the schema from the data while melting
    pub analyze: bool,

    /// Fail instead of warning when a field changes flattening strategy
    /// or does not fit its declared shape
    pub strict: bool,

    /// Joins table identities and qualified column names
    pub separator: String,

    /// Table identity → output table name
    pub table_names: HashMap<String, String>,

    /// Table identity → (column → renamed column)
    pub column_mappings: HashMap<String, IndexMap<String, String>>,

    /// Drop child tables that no mapping declares
    pub ignore_undefined_tables: bool,

    /// Drop fields the schema does not know when analysis is off, and
    /// columns missing from a table's rename map
    pub ignore_undefined_columns: bool,

    pub default_dict_strategy: DictStrategy,
    pub default_list_strategy: ListStrategy,

    /// Dotted field path → strategy override
    pub dict_strategies: HashMap<String, DictStrategy>,
    pub list_strategies: HashMap<String, ListStrategy>,

    /// Dotted field paths that are always treated as arrays
    pub always_array: HashSet<String>,

    /// Maximum nesting depth of field paths
    pub max_depth: usize,
}

impl Default for MeltConfig {
    fn default() -> Self {
        MeltConfig {
            root_name: String::from("root"),
            root_node: None,
            analyze: true,
            strict: false,
            separator: String::from("_"),
            table_names: HashMap::new(),
            column_mappings: HashMap::new(),
            ignore_undefined_tables: false,
            ignore_undefined_columns: false,
            default_dict_strategy: DictStrategy::default(),
            default_list_strategy: ListStrategy::default(),
            dict_strategies: HashMap::new(),
            list_strategies: HashMap::new(),
            always_array: HashSet::new(),
            max_depth: 64,
        }
    }
}

impl MeltConfig {
    /// Load a configuration from a JSON file; missing keys keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn dict_strategy(&self, field: &str) -> DictStrategy {
        self.dict_strategies
            .get(field)
            .copied()
            .unwrap_or(self.default_dict_strategy)
    }

    pub fn list_strategy(&self, field: &str) -> ListStrategy {
        self.list_strategies
            .get(field)
            .copied()
            .unwrap_or(self.default_list_strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: MeltConfig = serde_json::from_value(json!({
            "root_name": "orders",
            "default_list_strategy": "to_str",
            "dict_strategies": {"customer": "to_str"}
        }))
        .unwrap();

        assert_eq!(config.root_name, "orders");
        assert!(config.analyze);
        assert_eq!(config.separator, "_");
        assert_eq!(config.list_strategy("items"), ListStrategy::ToStr);
        assert_eq!(config.dict_strategy("customer"), DictStrategy::ToStr);
        assert_eq!(config.dict_strategy("shipping"), DictStrategy::ToColumns);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"root_node": "data.items", "strict": true}"#).unwrap();

        let config = MeltConfig::from_file(&path).unwrap();
        assert_eq!(config.root_node.as_deref(), Some("data.items"));
        assert!(config.strict);
        assert_eq!(config.max_depth, 64);
    }
}
