//! Final pass over accumulated rows: output names, column renames and
//! rectangular rows.

use crate::melt::config::MeltConfig;
use crate::melt::types::{Row, Table, TableBuffer, Tables};
use crate::schema::Analyzer;
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use tracing::debug;

/// Turn per-identity buffers into named tables
pub(crate) fn finish(
    buffers: IndexMap<Vec<String>, TableBuffer>,
    config: &MeltConfig,
    analyzer: &Analyzer,
) -> Tables {
    let mut merged: IndexMap<String, (IndexSet<String>, Vec<Row>)> = IndexMap::new();

    for buffer in buffers.into_values() {
        let table_id = buffer.table_id.clone();
        let Some(name) = output_name(&table_id, &buffer, config, analyzer) else {
            debug!(table = %table_id, "undeclared table dropped");
            continue;
        };

        let renames = config.column_mappings.get(&table_id);
        let resolve = |column: &str| -> Option<String> {
            match renames.map(|renames| renames.get(column)) {
                Some(Some(renamed)) => Some(renamed.clone()),
                Some(None) if config.ignore_undefined_columns => None,
                _ => Some(column.to_string()),
            }
        };

        let (columns, rows) = merged.entry(name).or_default();
        for column in &buffer.columns {
            if let Some(column) = resolve(column) {
                columns.insert(column);
            }
        }

        for row in buffer.rows {
            let mut renamed = Row::new();
            for (column, value) in row {
                let Some(column) = resolve(&column) else {
                    continue;
                };
                // Two source columns landing on one name keep the non-null value
                let occupied = renamed.get(&column).is_some_and(|existing| !existing.is_null());
                if !(occupied && value.is_null()) {
                    renamed.insert(column, value);
                }
            }
            rows.push(renamed);
        }
    }

    merged
        .into_iter()
        .map(|(name, (columns, rows))| {
            let columns: Vec<String> = columns.into_iter().collect();
            let rows = rows
                .into_iter()
                .map(|row| rectangular(row, &columns))
                .collect();
            let table = Table { name: name.clone(), columns, rows };
            (name, table)
        })
        .collect()
}

/// Configured name, then the declared name, then the identity itself.
///
/// `None` drops the table: a child table nobody named while undeclared
/// tables are ignored.
fn output_name(
    table_id: &str,
    buffer: &TableBuffer,
    config: &MeltConfig,
    analyzer: &Analyzer,
) -> Option<String> {
    if let Some(name) = config.table_names.get(table_id) {
        return Some(name.clone());
    }

    let declared = analyzer
        .tree()
        .lookup(&buffer.path)
        .and_then(|node| node.attrs.table_name.clone());
    match declared {
        Some(name) => Some(name),
        None if config.ignore_undefined_tables && !buffer.path.is_empty() => None,
        None => Some(table_id.to_string()),
    }
}

/// Every row gets exactly `columns`, in that order, with nulls for gaps
fn rectangular(mut row: Row, columns: &[String]) -> Row {
    columns
        .iter()
        .map(|column| {
            let value = row.remove(column).unwrap_or(Value::Null);
            (column.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableMapping;
    use serde_json::json;

    fn buffer(path: &[&str], rows: Vec<Value>) -> TableBuffer {
        let path: Vec<String> = path.iter().map(|s| s.to_string()).collect();
        let table_id = std::iter::once("root".to_string())
            .chain(path.iter().cloned())
            .collect::<Vec<_>>()
            .join("_");
        let mut buffer = TableBuffer::new(path, table_id);
        for row in rows {
            buffer.push(serde_json::from_value(row).unwrap());
        }
        buffer
    }

    fn buffers(list: Vec<TableBuffer>) -> IndexMap<Vec<String>, TableBuffer> {
        list.into_iter().map(|buffer| (buffer.path.clone(), buffer)).collect()
    }

    #[test]
    fn test_rows_are_rectangular() {
        let buffers = buffers(vec![buffer(&[], vec![json!({"a": 1}), json!({"b": 2})])]);

        let analyzer = Analyzer::new("root", "_", 64);
        let tables = finish(buffers, &MeltConfig::default(), &analyzer);

        let root = &tables["root"];
        assert_eq!(root.columns, vec!["a", "b"]);
        assert_eq!(root.rows[0]["b"], Value::Null);
        assert_eq!(root.rows[1]["a"], Value::Null);
        assert!(root.rows.iter().all(|row| row.keys().eq(root.columns.iter())));
    }

    #[test]
    fn test_configured_names_and_renames() {
        let mut config = MeltConfig::default();
        config.table_names.insert("root_items".into(), "line_items".into());
        config.column_mappings.insert(
            "root_items".into(),
            IndexMap::from([("sku".to_string(), "product_code".to_string())]),
        );

        let buffers = buffers(vec![buffer(&["items"], vec![json!({"sku": "a", "qty": 1})])]);

        let analyzer = Analyzer::new("root", "_", 64);
        let tables = finish(buffers.clone(), &config, &analyzer);
        assert_eq!(tables["line_items"].columns, vec!["product_code", "qty"]);

        config.ignore_undefined_columns = true;
        let tables = finish(buffers, &config, &analyzer);
        assert_eq!(tables["line_items"].columns, vec!["product_code"]);
    }

    #[test]
    fn test_declared_name_and_undeclared_drop() {
        let mapping = TableMapping::new("orders").with_column("id", "id");
        let analyzer = Analyzer::with_mapping("root", "_", 64, &mapping).unwrap();
        let config = MeltConfig { ignore_undefined_tables: true, ..Default::default() };

        let buffers = buffers(vec![
            buffer(&[], vec![json!({"id": 1})]),
            buffer(&["extra"], vec![json!({"x": 1})]),
        ]);

        let tables = finish(buffers, &config, &analyzer);
        assert_eq!(tables.keys().collect::<Vec<_>>(), vec!["orders"]);
    }

    #[test]
    fn test_tables_sharing_a_name_are_merged() {
        let mut config = MeltConfig::default();
        config.table_names.insert("root_a".into(), "shared".into());
        config.table_names.insert("root_b".into(), "shared".into());

        let buffers = buffers(vec![
            buffer(&["a"], vec![json!({"x": 1})]),
            buffer(&["b"], vec![json!({"y": 2})]),
        ]);

        let tables = finish(buffers, &config, &Analyzer::new("root", "_", 64));
        let shared = &tables["shared"];
        assert_eq!(shared.len(), 2);
        assert_eq!(shared.columns, vec!["x", "y"]);
    }

    #[test]
    fn test_declared_destinations_are_kept_verbatim() {
        let mapping = TableMapping::new("root").with_column("user.id", "user.id");
        let analyzer = Analyzer::with_mapping("root", "_", 64, &mapping).unwrap();
        let buffers = buffers(vec![buffer(&[], vec![json!({"user.id": 7, "root.x": 1})])]);

        let tables = finish(buffers, &MeltConfig::default(), &analyzer);
        assert_eq!(tables["root"].columns, vec!["user.id", "root.x"]);
        assert_eq!(tables["root"].rows[0]["user.id"], 7);
    }
}
