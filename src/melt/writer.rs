use crate::error::Result;
use crate::melt::types::{Table, Tables};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

static UNSAFE_FILE_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^A-Za-z0-9_.\-]").expect("file name pattern is valid")
});

/// Writes each table to its own CSV file in a directory
pub struct TableWriter {
    dir: PathBuf,
}

impl TableWriter {
    /// Create a writer for `dir`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(TableWriter {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    /// Write every table as `<dir>/<name>.csv`, returning the written paths
    pub fn write_tables(&self, tables: &Tables) -> Result<Vec<PathBuf>> {
        tables.values().map(|table| self.write_table(table)).collect()
    }

    pub fn write_table(&self, table: &Table) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}.csv", file_stem(&table.name)));
        let mut writer = csv::Writer::from_path(&path)?;

        writer.write_record(&table.columns)?;
        for row in &table.rows {
            writer.write_record(
                table
                    .columns
                    .iter()
                    .map(|column| cell(row.get(column).unwrap_or(&Value::Null))),
            )?;
        }
        writer.flush()?;

        debug!(table = %table.name, rows = table.len(), path = %path.display(), "table written");
        Ok(path)
    }
}

/// Writes rows of every table to a single JSON Lines stream, tagging each
/// row with a `_table` field
pub struct JsonLinesWriter<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesWriter { writer }
    }

    pub fn write_tables(&mut self, tables: &Tables) -> Result<()> {
        for table in tables.values() {
            for row in &table.rows {
                let mut data = row.clone();
                data.insert("_table".to_string(), Value::String(table.name.clone()));

                serde_json::to_writer(&mut self.writer, &data)?;
                self.writer.write_all(b"\n")?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        Ok(self.writer.flush()?)
    }
}

fn file_stem(name: &str) -> String {
    let stem = name.strip_suffix(".csv").unwrap_or(name);
    UNSAFE_FILE_CHARS.replace_all(stem, "_").into_owned()
}

/// CSV text of one cell: nulls are empty, strings raw, the rest as JSON
fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::melt::types::Row;
    use serde_json::json;

    fn table(name: &str, rows: Vec<Value>) -> Table {
        let rows: Vec<Row> = rows
            .into_iter()
            .map(|r| serde_json::from_value(r).unwrap())
            .collect();
        let columns = rows[0].keys().cloned().collect();
        Table { name: name.to_string(), columns, rows }
    }

    #[test]
    fn test_csv_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TableWriter::new(dir.path().join("out")).unwrap();

        let mut tables = Tables::new();
        tables.insert(
            "root".into(),
            table("root", vec![json!({"id": 1, "note": null, "ok": true}), json!({"id": 2, "note": "a,b", "ok": false})]),
        );

        let paths = writer.write_tables(&tables).unwrap();
        assert_eq!(paths.len(), 1);

        let content = std::fs::read_to_string(&paths[0]).unwrap();
        assert_eq!(content, "id,note,ok\n1,,true\n2,\"a,b\",false\n");
    }

    #[test]
    fn test_file_names_are_sanitized() {
        assert_eq!(file_stem("orders.csv"), "orders");
        assert_eq!(file_stem("root/items list"), "root_items_list");
    }

    #[test]
    fn test_json_lines() {
        let mut buffer = Vec::new();
        let mut writer = JsonLinesWriter::new(&mut buffer);

        let mut tables = Tables::new();
        tables.insert("root".into(), table("root", vec![json!({"name": "Alice"})]));
        writer.write_tables(&tables).unwrap();
        writer.flush().unwrap();

        let output = String::from_utf8(buffer).unwrap();
        assert_eq!(output, "{\"name\":\"Alice\",\"_table\":\"root\"}\n");
    }
}
