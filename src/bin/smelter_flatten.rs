//! smelter-flatten: Flatten nested JSON into related tables
//!
//! Usage:
//!   # Read from file, JSON lines tagged with `_table` on stdout
//!   smelter-flatten data.json
//!
//!   # Read from stdin
//!   echo '{"id": 1, "posts": [{"id": 10}]}' | smelter-flatten
//!
//!   # NDJSON input, one CSV file per table
//!   smelter-flatten --ndjson events.jsonl -o ./tables
//!
//!   # Declared mapping, records under `data.items`, schema frozen
//!   smelter-flatten --mapping mapping.json --root-node data.items --no-analyze export.json

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use smelter::melt::{JsonLinesWriter, MeltConfig, Melter, TableWriter, Tables};
use smelter::schema::TableMapping;
use std::fs::File;
use std::io::{BufReader, Read};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "smelter-flatten")]
#[command(about = "Flatten nested JSON into related tables", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<String>,

    /// JSON configuration file; flags below override its values
    #[arg(long)]
    config: Option<String>,

    /// Table mapping file
    #[arg(long, conflicts_with = "legacy_mapping")]
    mapping: Option<String>,

    /// Table mapping in the legacy descriptor format
    #[arg(long)]
    legacy_mapping: Option<String>,

    /// Dot-separated path to the list of records
    #[arg(long)]
    root_node: Option<String>,

    /// Name of the main table
    #[arg(long)]
    root_name: Option<String>,

    /// Flatten against the declared schema only
    #[arg(long)]
    no_analyze: bool,

    /// Fail on inconsistent strategies and shape mismatches
    #[arg(long)]
    strict: bool,

    /// Process newline-delimited JSON (one document per line)
    #[arg(long)]
    ndjson: bool,

    /// Output directory for one .csv file per table
    /// If omitted, writes JSON lines to stdout
    #[arg(long, short = 'o')]
    output_dir: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    let mut melter = match load_mapping(&args)? {
        Some(mapping) => Melter::with_mapping(&mapping, config)?,
        None => Melter::new(config),
    };

    let content = read_input(args.input.as_deref())?;
    let tables = if args.ndjson {
        smelter::melt_ndjson(content.as_slice(), &mut melter)?
    } else {
        let document = parse_document(content)?;
        melter.melt(&document)?
    };

    write_output(&tables, args.output_dir.as_deref())
}

fn build_config(args: &Args) -> Result<MeltConfig> {
    let mut config = match &args.config {
        Some(path) => MeltConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration: {path}"))?,
        None => MeltConfig::default(),
    };

    if let Some(root_node) = &args.root_node {
        config.root_node = Some(root_node.clone());
    }
    if let Some(root_name) = &args.root_name {
        config.root_name = root_name.clone();
    }
    if args.no_analyze {
        config.analyze = false;
    }
    if args.strict {
        config.strict = true;
    }
    Ok(config)
}

fn load_mapping(args: &Args) -> Result<Option<TableMapping>> {
    if let Some(path) = &args.mapping {
        let value = read_json_file(path)?;
        let mapping = TableMapping::from_mapping_value(&value)
            .with_context(|| format!("Invalid table mapping: {path}"))?;
        return Ok(Some(mapping));
    }

    if let Some(path) = &args.legacy_mapping {
        let value = read_json_file(path)?;
        let mapping = TableMapping::from_legacy(&value, None)
            .with_context(|| format!("Invalid legacy mapping: {path}"))?;
        return Ok(Some(mapping));
    }

    Ok(None)
}

fn read_json_file(path: &str) -> Result<Value> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {path}"))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse JSON: {path}"))
}

fn read_input(path: Option<&str>) -> Result<Vec<u8>> {
    let mut reader: Box<dyn Read> = match path {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Failed to open file: {path}"))?,
        )),
        None => Box::new(std::io::stdin()),
    };

    let mut content = Vec::new();
    reader
        .read_to_end(&mut content)
        .context("Failed to read input")?;
    Ok(content)
}

/// Parse a whole document with SIMD-accelerated parsing, falling back to serde_json
fn parse_document(mut content: Vec<u8>) -> Result<Value> {
    let original = content.clone();
    // Deserialize straight into serde_json so object key order survives
    match simd_json::serde::from_slice::<Value>(&mut content) {
        Ok(value) => Ok(value),
        Err(_) => serde_json::from_slice(&original).context("Failed to parse JSON input"),
    }
}

fn write_output(tables: &Tables, output_dir: Option<&str>) -> Result<()> {
    match output_dir {
        Some(dir) => {
            let writer = TableWriter::new(dir)
                .with_context(|| format!("Failed to create output directory: {dir}"))?;
            for path in writer.write_tables(tables)? {
                eprintln!("{}", path.display());
            }
        }
        None => {
            let mut writer = JsonLinesWriter::new(std::io::stdout().lock());
            writer.write_tables(tables)?;
            writer.flush()?;
        }
    }
    Ok(())
}
