//! Schema nodes and the type lattice they move along.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Shape classification of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Only nulls observed so far
    Null,
    Scalar,
    Dict,
    /// Array whose element shape is not known yet (only empty arrays seen)
    List,
    ListOfScalars,
    ListOfDicts,
}

impl NodeType {
    /// Least upper bound of two observations at the same path.
    ///
    /// Returns `None` for the permanently incompatible pairs.
    pub fn join(self, other: NodeType) -> Option<NodeType> {
        use NodeType::*;

        match (self, other) {
            (a, b) if a == b => Some(a),
            (Null, t) | (t, Null) => Some(t),

            (Dict, Scalar) | (Scalar, Dict) => None,
            (Dict, ListOfScalars) | (ListOfScalars, Dict) => None,
            (Scalar, ListOfDicts) | (ListOfDicts, Scalar) => None,
            (ListOfScalars, ListOfDicts) | (ListOfDicts, ListOfScalars) => None,

            (List, Scalar) | (Scalar, List) => Some(ListOfScalars),
            (List, Dict) | (Dict, List) => Some(ListOfDicts),
            (List, t) | (t, List) => Some(t),
            (Scalar, ListOfScalars) | (ListOfScalars, Scalar) => Some(ListOfScalars),
            (Dict, ListOfDicts) | (ListOfDicts, Dict) => Some(ListOfDicts),

            // Every distinct pair is covered above
            _ => None,
        }
    }

    /// Whether nodes of this type define a child table
    pub fn is_list(self) -> bool {
        matches!(self, NodeType::List | NodeType::ListOfScalars | NodeType::ListOfDicts)
    }

    /// Parse the type labels used by legacy descriptors (`"int"`, `"dict"`, ...)
    pub fn from_label(label: &str) -> Option<NodeType> {
        match label {
            "int" | "integer" | "bool" | "boolean" | "float" | "number" | "str" | "string" => {
                Some(NodeType::Scalar)
            }
            "dict" | "object" => Some(NodeType::Dict),
            "list" | "array" => Some(NodeType::List),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Null => "NULL",
            NodeType::Scalar => "SCALAR",
            NodeType::Dict => "DICT",
            NodeType::List => "LIST",
            NodeType::ListOfScalars => "LIST_OF_SCALARS",
            NodeType::ListOfDicts => "LIST_OF_DICTS",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index of a node inside a [`SchemaTree`](super::SchemaTree) arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// Optional attributes supplied when a node is inserted
#[derive(Debug, Clone, Default)]
pub struct NodeAttrs {
    /// Explicit output column name
    pub destination: Option<String>,
    pub is_primary_key: bool,
    /// Keep the value opaque instead of recursing into it
    pub force_type: bool,
    /// Substituted when the field is absent or null
    pub default_value: Option<Value>,
    /// Declared output name of the child table a list node defines
    pub table_name: Option<String>,
    /// Node came from a table mapping rather than from observed data
    pub declared: bool,
}

/// One field of the schema
#[derive(Debug, Clone)]
pub struct Node {
    pub path: Vec<String>,
    /// Field name, the last path segment
    pub name: String,
    /// Resolved output column name
    pub column: String,
    pub node_type: NodeType,
    pub attrs: NodeAttrs,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl Node {
    pub fn is_primary_key(&self) -> bool {
        self.attrs.is_primary_key
    }

    pub fn force_type(&self) -> bool {
        self.attrs.force_type
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.attrs.default_value.as_ref()
    }

    pub fn is_declared(&self) -> bool {
        self.attrs.declared
    }

    /// Path joined with dots, as used in messages and configuration keys
    pub fn dotted_path(&self) -> String {
        self.path.join(".")
    }
}
