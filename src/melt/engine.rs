//! The recursive flattening engine.
//!
//! [`Melter`] walks records against its schema tree, picks a [`Strategy`]
//! for every field, and accumulates rows per table. Child rows carry the
//! parent row's key so every table can be joined back from output data alone.

use crate::error::{shape_name, MeltError, Result};
use crate::melt::config::MeltConfig;
use crate::melt::input::select_records;
use crate::melt::normalize;
use crate::melt::strategy::{select_strategy, FieldSettings, Strategy};
use crate::melt::types::{Key, Row, TableBuffer, Tables, GENERATED_PKEY, SCALAR_COLUMN};
use crate::schema::{Analyzer, NodeId, NodeType, TableMapping};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// Melts nested records into a set of related tables
#[derive(Debug, Clone)]
pub struct Melter {
    config: MeltConfig,
    analyzer: Analyzer,
    buffers: IndexMap<Vec<String>, TableBuffer>,
    strategies: HashMap<NodeId, Strategy>,
    warnings: IndexMap<String, String>,
}

/// Per-row state threaded through the fields of one record
struct RowContext<'k> {
    keys: &'k [Key],
    has_child_rows: bool,
}

impl Melter {
    /// Create a melter that infers its schema from the data
    pub fn new(config: MeltConfig) -> Self {
        let analyzer = Analyzer::new(
            config.root_name.clone(),
            config.separator.clone(),
            config.max_depth,
        );
        Self::with_analyzer(analyzer, config)
    }

    /// Create a melter seeded with a declared mapping
    pub fn with_mapping(mapping: &TableMapping, config: MeltConfig) -> Result<Self> {
        let analyzer = Analyzer::with_mapping(
            config.root_name.clone(),
            config.separator.clone(),
            config.max_depth,
            mapping,
        )?;
        Ok(Self::with_analyzer(analyzer, config))
    }

    /// Create a melter by analyzing sample records up front.
    ///
    /// The returned melter runs with analysis disabled, so later records are
    /// flattened against the frozen schema.
    ///
    /// # Example
    /// ```rust
    /// use smelter::melt::{MeltConfig, Melter};
    /// use serde_json::json;
    ///
    /// let samples = vec![
    ///     json!({"id": 1, "posts": [{"title": "Post"}]}),
    ///     json!({"id": 2, "posts": []}),
    /// ];
    ///
    /// let mut melter = Melter::from_examples(&samples, MeltConfig::default()).unwrap();
    /// let tables = melter.melt(&json!([{"id": 3, "posts": [{"title": "Later"}]}])).unwrap();
    /// assert_eq!(tables["root_posts"].len(), 1);
    /// ```
    pub fn from_examples(examples: &[Value], config: MeltConfig) -> Result<Self> {
        let mut melter = Self::new(config);
        melter.analyze_records(examples.iter())?;
        melter.config.analyze = false;
        Ok(melter)
    }

    fn with_analyzer(analyzer: Analyzer, config: MeltConfig) -> Self {
        Melter {
            config,
            analyzer,
            buffers: IndexMap::new(),
            strategies: HashMap::new(),
            warnings: IndexMap::new(),
        }
    }

    pub fn config(&self) -> &MeltConfig {
        &self.config
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    /// The current schema as a table mapping
    pub fn table_mapping(&self) -> TableMapping {
        self.analyzer.to_table_mapping()
    }

    /// Grow the schema from `input` without emitting any rows
    pub fn analyze(&mut self, input: &Value) -> Result<()> {
        let records = select_records(input, self.config.root_node.as_deref())?;
        self.analyze_records(records.into_iter())
    }

    /// Melt `input` into tables keyed by output name
    pub fn melt(&mut self, input: &Value) -> Result<Tables> {
        let records = select_records(input, self.config.root_node.as_deref())?;
        self.melt_records(&records)
    }

    /// Melt records that were already selected from their documents
    pub fn melt_records(&mut self, records: &[&Value]) -> Result<Tables> {
        self.buffers.clear();
        self.strategies.clear();
        self.warnings.clear();

        let analyze = self.config.analyze;
        self.melt_rows(records, &[], &[], analyze)?;

        self.flush_warnings();
        let buffers = std::mem::take(&mut self.buffers);
        Ok(normalize::finish(buffers, &self.config, &self.analyzer))
    }

    fn analyze_records<'a>(&mut self, records: impl Iterator<Item = &'a Value>) -> Result<()> {
        for record in records {
            self.analyze_row(record, &[])?;
        }
        Ok(())
    }

    fn analyze_row(&mut self, element: &Value, table_path: &[String]) -> Result<()> {
        match element {
            Value::Object(fields) => {
                for (field, value) in fields {
                    let id = self.analyzer.analyze_field(table_path, field, value)?;
                    self.analyze_nested(id, value)?;
                }
            }
            Value::Null => {}
            other => {
                self.analyzer
                    .analyze_field(table_path, SCALAR_COLUMN, &scalar_cell(other)?)?;
            }
        }
        Ok(())
    }

    /// Follow lists (possibly inside objects) down into their element rows
    fn analyze_nested(&mut self, id: NodeId, value: &Value) -> Result<()> {
        let node = self.analyzer.tree().get(id);
        if node.force_type() {
            return Ok(());
        }

        let node_type = node.node_type;
        match node_type {
            NodeType::Dict => {
                if let Value::Object(fields) = value {
                    for (field, field_value) in fields {
                        if let Some(child) = self.analyzer.tree().child(id, field) {
                            self.analyze_nested(child, field_value)?;
                        }
                    }
                }
            }
            NodeType::List | NodeType::ListOfScalars | NodeType::ListOfDicts => {
                let path = node.path.clone();
                for element in elements_of(value) {
                    self.analyze_row(element, &path)?;
                }
            }
            NodeType::Null | NodeType::Scalar => {}
        }
        Ok(())
    }

    fn melt_rows(
        &mut self,
        records: &[&Value],
        table_path: &[String],
        parent_keys: &[Key],
        analyze: bool,
    ) -> Result<()> {
        if table_path.len() > self.config.max_depth {
            return Err(MeltError::DepthExceeded {
                path: table_path.join("."),
                max_depth: self.config.max_depth,
            });
        }

        let table_id = self.analyzer.table_id(table_path);
        if !records.is_empty() {
            // Register before recursing so parents precede children in the output
            self.buffers
                .entry(table_path.to_vec())
                .or_insert_with(|| TableBuffer::new(table_path.to_vec(), table_id.clone()));
        }

        for record in records {
            let fields: Cow<'_, Map<String, Value>> = match record {
                Value::Object(fields) => Cow::Borrowed(fields),
                Value::Null => continue,
                other => {
                    let mut fields = Map::new();
                    fields.insert(SCALAR_COLUMN.to_string(), scalar_cell(other)?);
                    Cow::Owned(fields)
                }
            };

            let mut row = self.melt_record(&fields, table_path, &table_id, parent_keys, analyze)?;
            for key in parent_keys {
                row.insert(key.name.clone(), key.value.clone());
            }

            if let Some(buffer) = self.buffers.get_mut(table_path) {
                buffer.push(row);
            }
        }

        Ok(())
    }

    fn melt_record(
        &mut self,
        fields: &Map<String, Value>,
        table_path: &[String],
        table_id: &str,
        parent_keys: &[Key],
        analyze: bool,
    ) -> Result<Row> {
        if analyze {
            for (field, value) in fields {
                self.analyzer.analyze_field(table_path, field, value)?;
            }
        } else {
            self.admit_undeclared(fields, table_path)?;
        }

        // The root always exists and child tables were registered above
        let Some(table_node) = self.analyzer.tree().find(table_path) else {
            return Ok(Row::new());
        };

        let keys = self.resolve_keys(fields, table_node, table_id, parent_keys)?;
        let mut ctx = RowContext {
            keys: &keys,
            has_child_rows: false,
        };

        let mut row = Row::new();
        self.melt_fields(fields, table_node, &mut ctx, &mut row, analyze)?;

        if ctx.has_child_rows {
            if let Some(key) = keys.iter().find(|k| k.synthesized) {
                row.insert(GENERATED_PKEY.to_string(), key.value.clone());
            }
        }

        Ok(row)
    }

    /// With analysis off, add schema nodes only for fields the configuration
    /// lets through; known nodes are left as they are
    fn admit_undeclared(&mut self, fields: &Map<String, Value>, table_path: &[String]) -> Result<()> {
        let Some(table_node) = self.analyzer.tree().find(table_path) else {
            return Ok(());
        };
        self.admit_fields(fields, table_node)
    }

    fn admit_fields(&mut self, fields: &Map<String, Value>, owner: NodeId) -> Result<()> {
        let owner_path = self.analyzer.tree().get(owner).path.clone();

        for (field, value) in fields {
            if let Some(child) = self.analyzer.tree().child(owner, field) {
                // Known objects may still carry fields nobody declared
                let node = self.analyzer.tree().get(child);
                if node.node_type == NodeType::Dict && !node.force_type() {
                    if let Value::Object(nested) = value {
                        self.admit_fields(nested, child)?;
                    }
                }
                continue;
            }

            let path = child_path(&owner_path, field);
            let is_table = value.is_array();
            if is_table && self.config.ignore_undefined_tables {
                let table = self.analyzer.table_id(&path);
                self.warn(
                    format!("table:{table}"),
                    format!(
                        "possible table '{table}' will be ignored as it is not declared in the mapping"
                    ),
                );
                continue;
            }
            if !is_table && self.config.ignore_undefined_columns {
                debug!(field = %path.join("."), "undeclared column skipped");
                continue;
            }

            self.analyzer.analyze_field(&owner_path, field, value)?;
        }
        Ok(())
    }

    fn melt_fields(
        &mut self,
        fields: &Map<String, Value>,
        owner: NodeId,
        ctx: &mut RowContext<'_>,
        row: &mut Row,
        analyze: bool,
    ) -> Result<()> {
        let children = self.analyzer.tree().child_ids(owner).to_vec();

        for child_id in children {
            self.apply_always_array(child_id)?;

            let node = self.analyzer.tree().get(child_id);
            let name = node.name.clone();
            let column = node.column.clone();
            let shape = node.node_type;
            let default_value = node.default_value().cloned();
            let settings = self.field_settings(child_id);

            let value = match fields.get(&name) {
                Some(value) if !value.is_null() => value,
                present => match default_value.as_ref() {
                    Some(default_value) => default_value,
                    None => {
                        // A null keeps its column, an absent field stays unset
                        if present.is_some() && !shape.is_list() && shape != NodeType::Dict {
                            row.insert(column, Value::Null);
                        }
                        continue;
                    }
                },
            };

            let strategy = select_strategy(shape, &settings);
            self.track_strategy(child_id, strategy)?;

            match strategy {
                Strategy::Column => match value {
                    Value::Object(_) | Value::Array(_) => {
                        self.shape_mismatch(child_id, value)?;
                        row.insert(column, Value::Null);
                    }
                    scalar => {
                        row.insert(column, scalar.clone());
                    }
                },
                Strategy::Opaque => {
                    row.insert(column, scalar_cell(value)?);
                }
                Strategy::InlineColumns => match value {
                    Value::Object(nested) => self.melt_fields(nested, child_id, ctx, row, analyze)?,
                    other => self.shape_mismatch(child_id, other)?,
                },
                Strategy::ChildRows => {
                    ctx.has_child_rows = true;
                    let elements: Vec<&Value> = elements_of(value).collect();
                    let path = self.analyzer.tree().get(child_id).path.clone();
                    self.melt_rows(&elements, &path, ctx.keys, analyze)?;
                }
                Strategy::IndexedColumns => {
                    for (index, element) in elements_of(value).enumerate() {
                        let indexed = format!("{column}{}{index}", self.config.separator);
                        row.insert(indexed, scalar_cell(element)?);
                    }
                }
                Strategy::Ignore => {
                    let path = self.analyzer.tree().get(child_id).path.clone();
                    let table = self.analyzer.table_id(&path);
                    self.warn(
                        format!("table:{table}"),
                        format!(
                            "possible table '{table}' will be ignored as it is not declared in the mapping"
                        ),
                    );
                }
            }
        }

        Ok(())
    }

    fn field_settings(&self, id: NodeId) -> FieldSettings {
        let node = self.analyzer.tree().get(id);
        let field = node.dotted_path();
        let named = node.node_type.is_list()
            && !self.config.table_names.is_empty()
            && self
                .config
                .table_names
                .contains_key(&self.analyzer.table_id(&node.path));
        FieldSettings {
            force_type: node.force_type(),
            declared_table: (node.is_declared() || named) && node.node_type.is_list(),
            ignore_undeclared_tables: self.config.ignore_undefined_tables && !node.is_declared(),
            dict: self.config.dict_strategy(&field),
            list: self.config.list_strategy(&field),
        }
    }

    fn apply_always_array(&mut self, id: NodeId) -> Result<()> {
        let node = self.analyzer.tree().get(id);
        if node.node_type.is_list() || node.force_type() {
            return Ok(());
        }
        if self.config.always_array.contains(&node.dotted_path()) {
            self.analyzer.observe(id, NodeType::List)?;
        }
        Ok(())
    }

    /// Explicit key columns of the table, or a content hash of the record
    fn resolve_keys(
        &mut self,
        fields: &Map<String, Value>,
        table_node: NodeId,
        table_id: &str,
        parent_keys: &[Key],
    ) -> Result<Vec<Key>> {
        let separator = self.config.separator.clone();
        let mut keys = Vec::new();
        let mut nested_keys = Vec::new();

        for child in self.analyzer.tree().children(table_node) {
            if child.is_primary_key() {
                keys.push(Key {
                    name: format!("{table_id}{separator}{}", child.column),
                    value: fields.get(&child.name).cloned().unwrap_or(Value::Null),
                    table: table_id.to_string(),
                    synthesized: false,
                });
            } else if child.node_type == NodeType::Dict {
                self.collect_nested_keys(child.path.clone(), &mut nested_keys);
            }
        }

        for path in nested_keys {
            self.warn(
                format!("nested-pkey:{path}"),
                format!("primary key '{path}' is nested in an object and is not used to link child tables"),
            );
        }

        if keys.is_empty() {
            // The parent link is part of the content, so equal children of
            // different parents stay distinct
            let mut content = fields.clone();
            for key in parent_keys {
                content.insert(key.name.clone(), key.value.clone());
            }

            let key = Key {
                name: format!("{table_id}{separator}{GENERATED_PKEY}"),
                value: Value::String(format!("{table_id}_{}", hash_record(&content)?)),
                table: table_id.to_string(),
                synthesized: true,
            };
            trace!(table = %key.table, column = %key.name, "primary key synthesized");
            keys.push(key);
        }

        Ok(keys)
    }

    fn collect_nested_keys(&self, path: Vec<String>, found: &mut Vec<String>) {
        let Some(id) = self.analyzer.tree().find(&path) else {
            return;
        };
        for child in self.analyzer.tree().children(id) {
            if child.is_primary_key() {
                found.push(child.dotted_path());
            } else if child.node_type == NodeType::Dict {
                self.collect_nested_keys(child.path.clone(), found);
            }
        }
    }

    fn track_strategy(&mut self, id: NodeId, strategy: Strategy) -> Result<()> {
        let first = *self.strategies.entry(id).or_insert(strategy);
        if first == strategy {
            return Ok(());
        }

        let path = self.analyzer.tree().get(id).dotted_path();
        if self.config.strict {
            return Err(MeltError::InconsistentStrategy {
                path,
                first,
                second: strategy,
            });
        }
        self.warn(
            format!("strategy:{path}"),
            format!("field '{path}' was flattened as {first} and later as {strategy}"),
        );
        Ok(())
    }

    fn shape_mismatch(&mut self, id: NodeId, value: &Value) -> Result<()> {
        let node = self.analyzer.tree().get(id);
        let path = node.dotted_path();
        let expected = node.node_type;
        let found = shape_name(value);

        if self.config.strict {
            return Err(MeltError::ShapeMismatch { path, expected, found });
        }
        self.warn(
            format!("shape:{path}"),
            format!("field '{path}' is declared as {expected} but a {found} was observed; value dropped"),
        );
        Ok(())
    }

    fn warn(&mut self, key: String, message: String) {
        self.warnings.entry(key).or_insert(message);
    }

    fn flush_warnings(&mut self) {
        for message in self.warnings.values() {
            warn!("{message}");
        }
    }
}

fn child_path(parent: &[String], field: &str) -> Vec<String> {
    let mut path = parent.to_vec();
    path.push(field.to_string());
    path
}

/// Elements of a list field; a lone value counts as a one-element list
fn elements_of(value: &Value) -> impl Iterator<Item = &Value> {
    let elements: &[Value] = match value {
        Value::Array(elements) => elements,
        other => std::slice::from_ref(other),
    };
    elements.iter()
}

/// A value fit for one cell: scalars as-is, objects and arrays as JSON text
fn scalar_cell(value: &Value) -> Result<Value> {
    Ok(match value {
        Value::Object(_) | Value::Array(_) => Value::String(serde_json::to_string(value)?),
        scalar => scalar.clone(),
    })
}

/// Stable content hash of a record, independent of field order
pub fn hash_record(fields: &Map<String, Value>) -> Result<String> {
    let canonical = canonicalize(&Value::Object(fields.clone()));
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut entries: Vec<(&String, &Value)> = fields.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(elements) => Value::Array(elements.iter().map(canonicalize).collect()),
        scalar => scalar.clone(),
    }
}
