//! Schema representation and inference
//!
//! This module holds the path-addressed schema tree, the declarative
//! table mappings that can seed it, and the analyzer that grows it from
//! observed records along the node type lattice.

pub mod analyzer;
pub mod mapping;
pub mod node;
pub mod tree;

pub use analyzer::Analyzer;
pub use mapping::{FlatTableMapping, TableMapping};
pub use node::{Node, NodeAttrs, NodeId, NodeType};
pub use tree::SchemaTree;
