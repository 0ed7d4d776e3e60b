//! # Smelter - nested JSON to relational tables
//!
//! Turns arbitrarily nested JSON records into a set of flat tables linked by
//! primary and foreign keys, ready for CSV export or a relational load.
//!
//! ## Modules
//!
//! - **schema**: the inferred schema tree, its type lattice and table mappings
//! - **melt**: the flattening engine, its configuration and output writers
//!
//! ## Quick Start
//!
//! ### Inferred schema
//!
//! ```rust
//! use smelter::melt::{MeltConfig, Melter};
//! use serde_json::json;
//!
//! # fn main() -> smelter::Result<()> {
//! let data = json!({
//!     "id": 1,
//!     "name": "Alice",
//!     "posts": [
//!         {"id": 10, "title": "First Post"},
//!         {"id": 11, "title": "Second Post"}
//!     ]
//! });
//!
//! let mut melter = Melter::new(MeltConfig::default());
//! let tables = melter.melt(&data)?;
//!
//! // tables["root"]: id, name, generated_pkey
//! // tables["root_posts"]: id, title, root_generated_pkey
//! assert_eq!(tables["root_posts"].len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ### Declared mapping
//!
//! ```rust
//! use smelter::melt::{MeltConfig, Melter};
//! use smelter::schema::TableMapping;
//! use serde_json::json;
//!
//! # fn main() -> smelter::Result<()> {
//! let mapping = TableMapping::new("users")
//!     .with_column("id", "user_id")
//!     .with_primary_key("id")
//!     .with_child("tags", TableMapping::new("user_tags").with_column("data", "tag"));
//!
//! let mut melter = Melter::with_mapping(&mapping, MeltConfig::default())?;
//! let tables = melter.melt(&json!([{"id": 7, "tags": ["a", "b"]}]))?;
//!
//! assert_eq!(tables["users"].columns, vec!["user_id"]);
//! assert_eq!(tables["user_tags"].columns, vec!["tag", "root_user_id"]);
//! # Ok(())
//! # }
//! ```

use serde_json::Value;
use std::io::BufRead;

pub mod error;
pub mod melt;
pub mod schema;

// Re-export commonly used types for convenience
pub use error::{MeltError, Result};
pub use melt::{JsonLinesWriter, MeltConfig, Melter, Table, TableWriter, Tables};
pub use schema::{Analyzer, NodeType, SchemaTree, TableMapping};

/// Melt one JSON document with an inferred schema
pub fn flatten(input: &Value, config: MeltConfig) -> Result<Tables> {
    Melter::new(config).melt(input)
}

/// Melt a newline-delimited JSON stream; every line is one document.
///
/// The melter's root node selects records from each document, and all
/// records land in one set of tables. Blank lines are skipped.
pub fn melt_ndjson<R: BufRead>(reader: R, melter: &mut Melter) -> Result<Tables> {
    let mut documents = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        documents.push(serde_json::from_str::<Value>(&line)?);
    }

    let root_node = melter.config().root_node.clone();
    let mut records = Vec::new();
    for document in &documents {
        records.extend(melt::select_records(document, root_node.as_deref())?);
    }

    melter.melt_records(&records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten() {
        let tables = flatten(&json!([{"a": 1}, {"a": 2}]), MeltConfig::default()).unwrap();
        assert_eq!(tables["root"].column("a"), vec![1, 2]);
    }

    #[test]
    fn test_melt_ndjson() {
        let input = "{\"id\": 1, \"tags\": [\"x\"]}\n\n{\"id\": 2, \"tags\": [\"y\", \"z\"]}\n";
        let mut melter = Melter::new(MeltConfig::default());

        let tables = melt_ndjson(input.as_bytes(), &mut melter).unwrap();

        assert_eq!(tables["root"].len(), 2);
        assert_eq!(tables["root_tags"].column("data"), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_melt_ndjson_with_root_node() {
        let input = "{\"data\": [{\"id\": 1}]}\n{\"data\": [{\"id\": 2}, {\"id\": 3}]}\n";
        let config = MeltConfig { root_node: Some("data".into()), ..Default::default() };
        let mut melter = Melter::new(config);

        let tables = melt_ndjson(input.as_bytes(), &mut melter).unwrap();
        assert_eq!(tables["root"].column("id"), vec![1, 2, 3]);
    }

    #[test]
    fn test_melt_ndjson_reports_bad_line() {
        let mut melter = Melter::new(MeltConfig::default());
        let err = melt_ndjson("{\"id\": 1}\nnot json\n".as_bytes(), &mut melter).unwrap_err();
        assert!(matches!(err, MeltError::Json(_)));
    }
}
