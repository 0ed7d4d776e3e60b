//! Type inference over observed records.
//!
//! The [`Analyzer`] owns a [`SchemaTree`] and grows it from data or from a
//! declared [`TableMapping`]. Every observation at an existing path is folded
//! into the node with [`NodeType::join`], so a node only ever moves up the
//! lattice and incompatible shapes surface as [`MeltError::TypeConflict`].

use super::mapping::TableMapping;
use super::node::{NodeAttrs, NodeId, NodeType};
use super::tree::SchemaTree;
use crate::error::{MeltError, Result};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Analyzer {
    tree: SchemaTree,
    root_name: String,
    max_depth: usize,
}

impl Analyzer {
    pub fn new(root_name: impl Into<String>, separator: impl Into<String>, max_depth: usize) -> Self {
        let root_name = root_name.into();
        Analyzer {
            tree: SchemaTree::new(root_name.clone(), separator),
            root_name,
            max_depth,
        }
    }

    /// Create an analyzer whose tree is seeded from a declared mapping
    pub fn with_mapping(
        root_name: impl Into<String>,
        separator: impl Into<String>,
        max_depth: usize,
        mapping: &TableMapping,
    ) -> Result<Self> {
        mapping.validate()?;

        let mut analyzer = Self::new(root_name, separator, max_depth);
        let root = analyzer.tree.root();
        analyzer.tree.set_attrs(
            root,
            NodeAttrs {
                table_name: Some(mapping.table_name.clone()),
                declared: true,
                ..Default::default()
            },
        );
        analyzer.apply_table_mapping(mapping, &[]);
        Ok(analyzer)
    }

    pub fn tree(&self) -> &SchemaTree {
        &self.tree
    }

    pub fn root_name(&self) -> &str {
        &self.root_name
    }

    /// Internal identity of the table rooted at `path`: the root name
    /// qualified with every path segment.
    ///
    /// Distinct paths that spell the same name (`a.b` and `a_b`) are numbered
    /// in the order their nodes were created: `root_a_b`, then `root_a_b_2`.
    pub fn table_id(&self, path: &[String]) -> String {
        let base = self.qualified_name(path);
        let rank = self
            .tree
            .iter()
            .filter(|node| node.node_type.is_list() && self.qualified_name(&node.path) == base)
            .position(|node| node.path == path);

        match rank {
            Some(rank) if rank > 0 => format!("{base}{}{}", self.tree.separator(), rank + 1),
            _ => base,
        }
    }

    fn qualified_name(&self, path: &[String]) -> String {
        let separator = self.tree.separator();
        let mut name = self.root_name.clone();
        for segment in path {
            name.push_str(separator);
            name.push_str(segment);
        }
        name
    }

    /// Record one observed field value under `parent`, recursing into objects
    pub fn analyze_field(&mut self, parent: &[String], name: &str, value: &Value) -> Result<NodeId> {
        let mut path = parent.to_vec();
        path.push(name.to_string());

        if path.len() > self.max_depth {
            return Err(MeltError::DepthExceeded {
                path: path.join("."),
                max_depth: self.max_depth,
            });
        }

        let observed = Self::classify(&path, value)?;
        let id = match self.tree.find(&path) {
            Some(id) => {
                self.observe(id, observed)?;
                id
            }
            None => self.tree.insert(&path, observed, NodeAttrs::default()),
        };

        let node = self.tree.get(id);
        if node.node_type == NodeType::Dict && !node.force_type() {
            if let Value::Object(fields) = value {
                for (field, field_value) in fields {
                    self.analyze_field(&path, field, field_value)?;
                }
            }
        }

        Ok(id)
    }

    /// Shape of a single value; arrays are classified by their non-null elements
    pub fn classify(path: &[String], value: &Value) -> Result<NodeType> {
        let node_type = match value {
            Value::Null => NodeType::Null,
            Value::Bool(_) | Value::Number(_) | Value::String(_) => NodeType::Scalar,
            Value::Object(_) => NodeType::Dict,
            Value::Array(elements) => match Self::classify_elements(path, elements)? {
                NodeType::Scalar => NodeType::ListOfScalars,
                NodeType::Dict => NodeType::ListOfDicts,
                // Empty, all-null or nested arrays
                _ => NodeType::List,
            },
        };
        Ok(node_type)
    }

    fn classify_elements(path: &[String], elements: &[Value]) -> Result<NodeType> {
        let mut element_type = NodeType::Null;

        for element in elements {
            let current = match element {
                Value::Null => continue,
                Value::Bool(_) | Value::Number(_) | Value::String(_) => NodeType::Scalar,
                Value::Object(_) => NodeType::Dict,
                Value::Array(_) => NodeType::List,
            };

            if element_type == NodeType::Null {
                element_type = current;
            } else if element_type != current {
                return Err(MeltError::MixedArray { path: path.join(".") });
            }
        }

        Ok(element_type)
    }

    /// Fold an observation into an existing node
    pub fn observe(&mut self, id: NodeId, observed: NodeType) -> Result<()> {
        let node = self.tree.get(id);
        if node.force_type() || node.node_type == observed {
            return Ok(());
        }

        let expected = node.node_type;
        match expected.join(observed) {
            Some(upgraded) if upgraded != expected => {
                debug!(path = %node.dotted_path(), from = %expected, to = %upgraded, "node type upgraded");
                self.tree.upgrade(id, upgraded);
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(MeltError::TypeConflict {
                path: node.dotted_path(),
                expected,
                observed,
            }),
        }
    }

    /// Materialize the nodes a mapping declares under `parent`
    pub fn apply_table_mapping(&mut self, mapping: &TableMapping, parent: &[String]) {
        for (field, destination) in &mapping.column_mappings {
            let path = qualify(parent, field);
            let attrs = NodeAttrs {
                destination: Some(destination.clone()),
                is_primary_key: mapping.primary_keys.contains(field),
                force_type: mapping.force_types.contains(field),
                declared: true,
                ..Default::default()
            };
            // Dotted fields get their dict ancestors created on the way
            self.tree.insert(&path, NodeType::Scalar, attrs);
        }

        for (column, default_value) in &mapping.user_data {
            let path = qualify(parent, column);
            let attrs = NodeAttrs {
                destination: Some(column.clone()),
                default_value: Some(default_value.clone()),
                declared: true,
                ..Default::default()
            };
            self.tree.insert(&path, NodeType::Scalar, attrs);
        }

        for (field, child) in &mapping.child_tables {
            let path = qualify(parent, field);
            let attrs = NodeAttrs {
                table_name: Some(child.table_name.clone()),
                declared: true,
                ..Default::default()
            };
            self.tree.insert(&path, NodeType::List, attrs);
            self.apply_table_mapping(child, &path);
        }
    }

    /// Rebuild a mapping from the current tree
    pub fn to_table_mapping(&self) -> TableMapping {
        self.table_mapping_at(self.tree.root())
    }

    fn table_mapping_at(&self, id: NodeId) -> TableMapping {
        let node = self.tree.get(id);
        let table_name = node
            .attrs
            .table_name
            .clone()
            .unwrap_or_else(|| self.table_id(&node.path));

        let mut mapping = TableMapping::new(table_name);
        self.collect_fields(id, "", &mut mapping);
        mapping
    }

    fn collect_fields(&self, id: NodeId, prefix: &str, mapping: &mut TableMapping) {
        for &child_id in self.tree.child_ids(id) {
            let child = self.tree.get(child_id);
            let field = format!("{prefix}{}", child.name);

            if child.force_type() {
                mapping.column_mappings.insert(field.clone(), child.column.clone());
                mapping.force_types.push(field.clone());
                if child.is_primary_key() {
                    mapping.primary_keys.push(field);
                }
                continue;
            }

            match child.node_type {
                NodeType::Scalar | NodeType::Null => {
                    if let Some(default_value) = child.default_value() {
                        mapping.user_data.insert(field, default_value.clone());
                    } else {
                        mapping.column_mappings.insert(field.clone(), child.column.clone());
                        if child.is_primary_key() {
                            mapping.primary_keys.push(field);
                        }
                    }
                }
                NodeType::Dict => self.collect_fields(child_id, &format!("{field}."), mapping),
                NodeType::List | NodeType::ListOfScalars | NodeType::ListOfDicts => {
                    mapping.child_tables.insert(field, self.table_mapping_at(child_id));
                }
            }
        }
    }
}

fn qualify(parent: &[String], field: &str) -> Vec<String> {
    let mut path = parent.to_vec();
    path.extend(field.split('.').map(String::from));
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn analyzer() -> Analyzer {
        Analyzer::new("root", "_", 64)
    }

    fn path(p: &str) -> Vec<String> {
        p.split('.').map(String::from).collect()
    }

    fn type_at(analyzer: &Analyzer, p: &str) -> NodeType {
        analyzer.tree().lookup(&path(p)).unwrap().node_type
    }

    #[test]
    fn test_classify() {
        let p = path("f");
        assert_eq!(Analyzer::classify(&p, &json!(1)).unwrap(), NodeType::Scalar);
        assert_eq!(Analyzer::classify(&p, &json!(null)).unwrap(), NodeType::Null);
        assert_eq!(Analyzer::classify(&p, &json!({"a": 1})).unwrap(), NodeType::Dict);
        assert_eq!(Analyzer::classify(&p, &json!([])).unwrap(), NodeType::List);
        assert_eq!(Analyzer::classify(&p, &json!([null, 1])).unwrap(), NodeType::ListOfScalars);
        assert_eq!(Analyzer::classify(&p, &json!([{"a": 1}, null])).unwrap(), NodeType::ListOfDicts);
    }

    #[test]
    fn test_mixed_array_names_path() {
        let err = Analyzer::classify(&path("a.b"), &json!([1, {"x": 1}])).unwrap_err();
        match err {
            MeltError::MixedArray { path } => assert_eq!(path, "a.b"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_dict_then_list_of_dicts_upgrades() {
        let mut analyzer = analyzer();
        analyzer.analyze_field(&[], "x", &json!({"y": 1})).unwrap();
        assert_eq!(type_at(&analyzer, "x"), NodeType::Dict);

        analyzer.analyze_field(&[], "x", &json!([{"y": 1}])).unwrap();
        assert_eq!(type_at(&analyzer, "x"), NodeType::ListOfDicts);

        // A later singleton object does not move it back
        analyzer.analyze_field(&[], "x", &json!({"y": 2})).unwrap();
        assert_eq!(type_at(&analyzer, "x"), NodeType::ListOfDicts);
    }

    #[test]
    fn test_scalar_then_dict_conflicts() {
        let mut analyzer = analyzer();
        analyzer.analyze_field(&[], "x", &json!(1)).unwrap();

        let err = analyzer.analyze_field(&[], "x", &json!({"y": 1})).unwrap_err();
        assert!(matches!(
            err,
            MeltError::TypeConflict {
                expected: NodeType::Scalar,
                observed: NodeType::Dict,
                ..
            }
        ));
        // The tree is left untouched
        assert_eq!(type_at(&analyzer, "x"), NodeType::Scalar);
    }

    #[test]
    fn test_empty_list_resolved_later() {
        let mut analyzer = analyzer();
        analyzer.analyze_field(&[], "tags", &json!([])).unwrap();
        assert_eq!(type_at(&analyzer, "tags"), NodeType::List);

        analyzer.analyze_field(&[], "tags", &json!(["a"])).unwrap();
        assert_eq!(type_at(&analyzer, "tags"), NodeType::ListOfScalars);

        analyzer.analyze_field(&[], "tags", &json!("b")).unwrap();
        assert_eq!(type_at(&analyzer, "tags"), NodeType::ListOfScalars);
    }

    #[test]
    fn test_null_is_refined() {
        let mut analyzer = analyzer();
        analyzer.analyze_field(&[], "n", &json!(null)).unwrap();
        analyzer.analyze_field(&[], "n", &json!({"a": true})).unwrap();

        assert_eq!(type_at(&analyzer, "n"), NodeType::Dict);
        assert_eq!(type_at(&analyzer, "n.a"), NodeType::Scalar);
    }

    #[test]
    fn test_force_typed_node_is_never_upgraded() {
        let mapping = TableMapping::new("t").with_column("raw", "raw").with_force_type("raw");
        let mut analyzer = Analyzer::with_mapping("root", "_", 64, &mapping).unwrap();

        analyzer.analyze_field(&[], "raw", &json!({"deep": [1, 2]})).unwrap();

        assert_eq!(type_at(&analyzer, "raw"), NodeType::Scalar);
        assert!(analyzer.tree().lookup(&path("raw.deep")).is_none());
    }

    #[test]
    fn test_nested_fields_are_qualified() {
        let mut analyzer = analyzer();
        analyzer.analyze_field(&[], "a", &json!({"b": {"c": 1}})).unwrap();

        assert_eq!(analyzer.tree().lookup(&path("a.b.c")).unwrap().column, "a_b_c");
    }

    #[test]
    fn test_table_ids_stay_distinct() {
        let mut analyzer = analyzer();
        analyzer.analyze_field(&[], "a_b", &json!([{"x": 1}])).unwrap();
        analyzer.analyze_field(&[], "a", &json!({"b": [{"y": 2}]})).unwrap();

        assert_eq!(analyzer.table_id(&[]), "root");
        assert_eq!(analyzer.table_id(&path("a_b")), "root_a_b");
        assert_eq!(analyzer.table_id(&path("a.b")), "root_a_b_2");
        // Paths without a table node keep the plain name
        assert_eq!(analyzer.table_id(&path("a.c")), "root_a_c");
    }

    #[test]
    fn test_depth_cap() {
        let mut analyzer = Analyzer::new("root", "_", 2);
        let err = analyzer.analyze_field(&[], "a", &json!({"b": {"c": 1}})).unwrap_err();
        assert!(matches!(err, MeltError::DepthExceeded { max_depth: 2, .. }));
    }

    #[test]
    fn test_mapping_materializes_tree() {
        let mapping = TableMapping::new("user")
            .with_column("id", "user_id")
            .with_column("details.color", "color")
            .with_primary_key("id")
            .with_user_data("source", "crm")
            .with_child(
                "addresses",
                TableMapping::new("addresses").with_column("street", "street"),
            );

        let analyzer = Analyzer::with_mapping("root", "_", 64, &mapping).unwrap();
        let tree = analyzer.tree();

        let id = tree.lookup(&path("id")).unwrap();
        assert_eq!(id.column, "user_id");
        assert!(id.is_primary_key());

        assert_eq!(type_at(&analyzer, "details"), NodeType::Dict);
        assert_eq!(tree.lookup(&path("details.color")).unwrap().column, "color");
        assert_eq!(tree.lookup(&path("source")).unwrap().default_value(), Some(&json!("crm")));

        let addresses = tree.lookup(&path("addresses")).unwrap();
        assert_eq!(addresses.node_type, NodeType::List);
        assert_eq!(addresses.attrs.table_name.as_deref(), Some("addresses"));
        assert_eq!(type_at(&analyzer, "addresses.street"), NodeType::Scalar);
    }

    #[test]
    fn test_mapping_survives_tree_round_trip() {
        let mapping = TableMapping::new("user")
            .with_column("id", "user_id")
            .with_column("details.color", "color")
            .with_column("payload", "payload")
            .with_primary_key("id")
            .with_force_type("payload")
            .with_user_data("source", "crm")
            .with_child(
                "addresses",
                TableMapping::new("addresses")
                    .with_column("street", "street")
                    .with_child("lines", TableMapping::new("lines").with_column("data", "line")),
            );

        let analyzer = Analyzer::with_mapping("root", "_", 64, &mapping).unwrap();
        assert_eq!(analyzer.to_table_mapping(), mapping);
    }

    #[test]
    fn test_inferred_mapping_export() {
        let mut analyzer = analyzer();
        let record = json!({
            "id": 1,
            "details": {"weight": 50, "tags": ["a"]},
            "addresses": [{"street": "Main"}]
        });
        for (field, value) in record.as_object().unwrap() {
            analyzer.analyze_field(&[], field, value).unwrap();
        }
        // Child-table rows are analyzed by the engine as it visits them
        analyzer.analyze_field(&path("addresses"), "street", &json!("Main")).unwrap();

        let mapping = analyzer.to_table_mapping();
        assert_eq!(mapping.table_name, "root");
        assert_eq!(mapping.column_mappings["id"], "id");
        assert_eq!(mapping.column_mappings["details.weight"], "details_weight");
        assert_eq!(mapping.child_tables["details.tags"].table_name, "root_details_tags");
        assert_eq!(mapping.child_tables["addresses"].column_mappings["street"], "street");
    }
}
