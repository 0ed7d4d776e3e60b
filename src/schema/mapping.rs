//! Declarative table mappings.
//!
//! A [`TableMapping`] describes how one nested record maps onto a table and
//! its child tables. It serializes to the nested-mapping JSON form
//! (`table_name`, `column_mappings`, `primary_keys`, `force_types`,
//! `child_tables`, `user_data`) and can be migrated from the legacy
//! one-level-per-field descriptor format.

use crate::error::{MeltError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMapping {
    pub table_name: String,

    /// Field path (dot-qualified when nested) → destination column
    #[serde(default)]
    pub column_mappings: IndexMap<String, String>,

    #[serde(default)]
    pub primary_keys: Vec<String>,

    /// Field paths stored as opaque values
    #[serde(default)]
    pub force_types: Vec<String>,

    /// Field name → mapping of the child table its array defines
    #[serde(default)]
    pub child_tables: IndexMap<String, TableMapping>,

    /// Static columns and the value every row gets
    #[serde(default)]
    pub user_data: IndexMap<String, Value>,
}

/// One table of a mapping tree with its children detached
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatTableMapping {
    pub table_name: String,
    pub parent: Option<String>,
    pub column_mappings: IndexMap<String, String>,
    pub primary_keys: Vec<String>,
    pub force_types: Vec<String>,
    pub user_data: IndexMap<String, Value>,
}

impl TableMapping {
    pub fn new(table_name: impl Into<String>) -> Self {
        TableMapping {
            table_name: table_name.into(),
            column_mappings: IndexMap::new(),
            primary_keys: Vec::new(),
            force_types: Vec::new(),
            child_tables: IndexMap::new(),
            user_data: IndexMap::new(),
        }
    }

    pub fn with_column(mut self, field: impl Into<String>, destination: impl Into<String>) -> Self {
        self.column_mappings.insert(field.into(), destination.into());
        self
    }

    pub fn with_primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_keys.push(field.into());
        self
    }

    pub fn with_force_type(mut self, field: impl Into<String>) -> Self {
        self.force_types.push(field.into());
        self
    }

    pub fn with_child(mut self, field: impl Into<String>, child: TableMapping) -> Self {
        self.child_tables.insert(field.into(), child);
        self
    }

    pub fn with_user_data(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.user_data.insert(column.into(), value.into());
        self
    }

    /// Build from the nested-mapping form and run the referential check
    pub fn from_mapping_value(value: &Value) -> Result<Self> {
        let mapping: TableMapping = serde_json::from_value(value.clone())
            .map_err(|e| MeltError::InvalidMapping(e.to_string()))?;
        mapping.validate()?;
        Ok(mapping)
    }

    /// Serialize back to the nested-mapping form
    pub fn to_mapping_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Build from a legacy descriptor of the shape `{table: {field: descriptor}}`.
    ///
    /// A descriptor is either a destination column name, a column object
    /// (`{"type": "column", "mapping": {"destination": .., "primaryKey": ..},
    /// "forceType": ..}`) or a child table (`{"type": "table",
    /// "destination": .., "tableMapping": {field: descriptor}}`).
    pub fn from_legacy(legacy: &Value, user_data: Option<IndexMap<String, Value>>) -> Result<Self> {
        let root = legacy
            .as_object()
            .ok_or_else(|| MeltError::InvalidMapping("legacy mapping must be an object".into()))?;

        let mut entries = root.iter();
        let (table_name, fields) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(MeltError::InvalidMapping(
                    "legacy mapping must have exactly one table".into(),
                ))
            }
        };

        let fields = fields.as_object().ok_or_else(|| {
            MeltError::InvalidMapping(format!("legacy table '{table_name}' must be an object"))
        })?;

        let mut mapping = Self::from_legacy_fields(table_name, fields)?;
        mapping.user_data = user_data.unwrap_or_default();
        mapping.validate()?;
        Ok(mapping)
    }

    fn from_legacy_fields(table_name: &str, fields: &Map<String, Value>) -> Result<Self> {
        let mut mapping = TableMapping::new(table_name);

        for (field, descriptor) in fields {
            match descriptor {
                Value::String(destination) => {
                    mapping.column_mappings.insert(field.clone(), destination.clone());
                }
                Value::Object(desc) => match desc.get("type").and_then(Value::as_str) {
                    None | Some("column") => {
                        let column_mapping = desc.get("mapping");
                        let destination = column_mapping
                            .and_then(|m| m.get("destination"))
                            .and_then(Value::as_str)
                            .unwrap_or(field.as_str());
                        mapping.column_mappings.insert(field.clone(), destination.to_string());

                        let is_pk = column_mapping
                            .and_then(|m| m.get("primaryKey"))
                            .and_then(Value::as_bool)
                            .unwrap_or(false);
                        if is_pk {
                            mapping.primary_keys.push(field.clone());
                        }
                        if desc.get("forceType").and_then(Value::as_bool).unwrap_or(false) {
                            mapping.force_types.push(field.clone());
                        }
                    }
                    Some("table") => {
                        let child_fields = desc
                            .get("tableMapping")
                            .and_then(Value::as_object)
                            .ok_or_else(|| {
                                MeltError::InvalidMapping(format!(
                                    "legacy child table '{field}' has no tableMapping"
                                ))
                            })?;
                        let child_name = desc
                            .get("destination")
                            .and_then(Value::as_str)
                            .unwrap_or(field.as_str());
                        let child = Self::from_legacy_fields(child_name, child_fields)?;
                        mapping.child_tables.insert(field.clone(), child);
                    }
                    Some(other) => {
                        return Err(MeltError::InvalidMapping(format!(
                            "unknown legacy descriptor type '{other}' for field '{field}'"
                        )))
                    }
                },
                _ => {
                    return Err(MeltError::InvalidMapping(format!(
                        "legacy descriptor for field '{field}' must be a string or an object"
                    )))
                }
            }
        }

        Ok(mapping)
    }

    /// Every primary key and forced type must name a declared or implied column
    pub fn validate(&self) -> Result<()> {
        for (kind, fields) in [("primary key", &self.primary_keys), ("force type", &self.force_types)] {
            for field in fields {
                if !self.has_column_path(field) {
                    return Err(MeltError::InvalidMapping(format!(
                        "{kind} '{field}' of table '{}' is not a mapped column",
                        self.table_name
                    )));
                }
            }
        }

        for child in self.child_tables.values() {
            child.validate()?;
        }
        Ok(())
    }

    fn has_column_path(&self, field: &str) -> bool {
        if self.column_mappings.contains_key(field) || self.user_data.contains_key(field) {
            return true;
        }
        // A dict that only exists through its nested columns
        let prefix = format!("{field}.");
        self.column_mappings.keys().any(|c| c.starts_with(&prefix))
    }

    /// Flatten the whole tree into one table keyed by dotted table path
    pub fn flatten_tree(&self) -> IndexMap<String, FlatTableMapping> {
        let mut tables = IndexMap::new();
        self.flatten_into(self.table_name.clone(), None, &mut tables);
        tables
    }

    fn flatten_into(
        &self,
        key: String,
        parent: Option<String>,
        tables: &mut IndexMap<String, FlatTableMapping>,
    ) {
        tables.insert(
            key.clone(),
            FlatTableMapping {
                table_name: self.table_name.clone(),
                parent,
                column_mappings: self.column_mappings.clone(),
                primary_keys: self.primary_keys.clone(),
                force_types: self.force_types.clone(),
                user_data: self.user_data.clone(),
            },
        );

        for (field, child) in &self.child_tables {
            child.flatten_into(format!("{key}.{field}"), Some(key.clone()), tables);
        }
    }

    /// Output names of this table and all descendants, depth first
    pub fn table_names(&self) -> Vec<String> {
        let mut names = vec![self.table_name.clone()];
        for child in self.child_tables.values() {
            names.extend(child.table_names());
        }
        names
    }
}
