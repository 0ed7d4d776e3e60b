//! Path-addressed schema tree.
//!
//! Nodes live in an arena and are looked up through an index keyed by their
//! full path, so an upgrade made through one path is visible to every holder
//! of that [`NodeId`].

use super::node::{Node, NodeAttrs, NodeId, NodeType};
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct SchemaTree {
    nodes: Vec<Node>,
    index: HashMap<Vec<String>, NodeId>,
    separator: String,
}

impl SchemaTree {
    /// Create a tree whose root is the main table `root_name`
    pub fn new(root_name: impl Into<String>, separator: impl Into<String>) -> Self {
        let root_name = root_name.into();
        let root = Node {
            path: Vec::new(),
            name: root_name.clone(),
            column: root_name,
            node_type: NodeType::List,
            attrs: NodeAttrs::default(),
            parent: None,
            children: Vec::new(),
        };

        let mut index = HashMap::new();
        index.insert(Vec::new(), NodeId(0));

        SchemaTree {
            nodes: vec![root],
            index,
            separator: separator.into(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        // The root always exists
        self.nodes.len() == 1
    }

    pub fn find(&self, path: &[String]) -> Option<NodeId> {
        self.index.get(path).copied()
    }

    pub fn lookup(&self, path: &[String]) -> Option<&Node> {
        self.find(path).map(|id| &self.nodes[id.0])
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Direct children of a node in insertion order
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &Node> + '_ {
        self.nodes[id.0].children.iter().map(move |c| &self.nodes[c.0])
    }

    pub fn child_ids(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[id.0]
            .children
            .iter()
            .copied()
            .find(|c| self.nodes[c.0].name == name)
    }

    /// Insert a node at `path`, creating missing ancestors as DICT nodes.
    ///
    /// Inserting over an existing path replaces its type and attributes but
    /// keeps its children.
    pub fn insert(&mut self, path: &[String], node_type: NodeType, attrs: NodeAttrs) -> NodeId {
        let Some((name, parent_path)) = path.split_last() else {
            return self.root();
        };

        if let Some(id) = self.find(path) {
            let node = &mut self.nodes[id.0];
            node.node_type = node_type;
            node.attrs = attrs;
            self.refresh_columns(id);
            return id;
        }

        let parent = self.ensure_structural(parent_path);
        let column = self.compose_column(parent, name, attrs.destination.as_deref());
        let id = NodeId(self.nodes.len());

        trace!(path = %path.join("."), %node_type, %column, "schema node created");

        self.nodes.push(Node {
            path: path.to_vec(),
            name: name.clone(),
            column,
            node_type,
            attrs,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        self.index.insert(path.to_vec(), id);
        id
    }

    /// Change a node's type in place
    pub fn upgrade(&mut self, id: NodeId, new_type: NodeType) {
        let node = &mut self.nodes[id.0];
        if node.node_type == new_type {
            return;
        }
        node.node_type = new_type;
        // Children of a dict are qualified by its column, children of a list are not
        self.refresh_columns(id);
    }

    pub(crate) fn set_attrs(&mut self, id: NodeId, attrs: NodeAttrs) {
        self.nodes[id.0].attrs = attrs;
        self.refresh_columns(id);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    fn ensure_structural(&mut self, path: &[String]) -> NodeId {
        match self.find(path) {
            Some(id) => id,
            None => self.insert(path, NodeType::Dict, NodeAttrs::default()),
        }
    }

    fn compose_column(&self, parent: NodeId, name: &str, destination: Option<&str>) -> String {
        if let Some(destination) = destination {
            return destination.to_string();
        }
        let parent = &self.nodes[parent.0];
        match parent.node_type {
            NodeType::Dict => format!("{}{}{}", parent.column, self.separator, name),
            _ => name.to_string(),
        }
    }

    /// Recompute the column of `id` and everything below it
    fn refresh_columns(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent {
            let node = &self.nodes[id.0];
            let column = self.compose_column(parent, &node.name, node.attrs.destination.as_deref());
            self.nodes[id.0].column = column;
        }

        let children = self.nodes[id.0].children.clone();
        for child in children {
            self.refresh_columns(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> Vec<String> {
        p.split('.').map(String::from).collect()
    }

    #[test]
    fn test_insert_creates_dict_ancestors() {
        let mut tree = SchemaTree::new("root", "_");
        tree.insert(&path("details.size.height"), NodeType::Scalar, NodeAttrs::default());

        assert_eq!(tree.lookup(&path("details")).unwrap().node_type, NodeType::Dict);
        assert_eq!(tree.lookup(&path("details.size")).unwrap().node_type, NodeType::Dict);

        let leaf = tree.lookup(&path("details.size.height")).unwrap();
        assert_eq!(leaf.node_type, NodeType::Scalar);
        assert_eq!(leaf.column, "details_size_height");
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_destination_overrides_column() {
        let mut tree = SchemaTree::new("root", "_");
        let attrs = NodeAttrs {
            destination: Some("height_cm".to_string()),
            ..Default::default()
        };
        tree.insert(&path("details.height"), NodeType::Scalar, attrs);

        assert_eq!(tree.lookup(&path("details.height")).unwrap().column, "height_cm");
    }

    #[test]
    fn test_upgrade_is_seen_through_every_lookup() {
        let mut tree = SchemaTree::new("root", "_");
        let id = tree.insert(&path("x"), NodeType::Dict, NodeAttrs::default());
        tree.insert(&path("x.y"), NodeType::Scalar, NodeAttrs::default());
        assert_eq!(tree.lookup(&path("x.y")).unwrap().column, "x_y");

        tree.upgrade(id, NodeType::ListOfDicts);

        assert_eq!(tree.get(id).node_type, NodeType::ListOfDicts);
        assert_eq!(tree.lookup(&path("x")).unwrap().node_type, NodeType::ListOfDicts);
        // Now a child table, so its fields are no longer prefixed
        assert_eq!(tree.lookup(&path("x.y")).unwrap().column, "y");
    }

    #[test]
    fn test_reinsert_keeps_children() {
        let mut tree = SchemaTree::new("root", "_");
        tree.insert(&path("a.b"), NodeType::Scalar, NodeAttrs::default());
        let id = tree.insert(&path("a"), NodeType::Dict, NodeAttrs::default());

        assert_eq!(tree.children(id).count(), 1);
        assert_eq!(tree.child(tree.root(), "a"), Some(id));
    }
}
