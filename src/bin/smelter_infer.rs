//! smelter-infer: Infer a table mapping from example records
//!
//! The printed mapping can be edited and fed back to `smelter-flatten --mapping`.
//!
//! Usage:
//!   # Read from file, output to stdout
//!   smelter-infer data.json
//!
//!   # Read from stdin, output to stdout
//!   echo '{"id": 1, "tags": ["a"]}' | smelter-infer
//!
//!   # Process NDJSON with compact output
//!   smelter-infer --ndjson events.jsonl --compact
//!
//!   # Convert a legacy descriptor instead of inferring
//!   smelter-infer --from-legacy legacy.json

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use smelter::melt::{MeltConfig, Melter};
use smelter::schema::TableMapping;
use std::fs::File;
use std::io::{stdin, BufRead, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "smelter-infer")]
#[command(about = "Infer a table mapping from example records", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<String>,

    /// Process newline-delimited JSON (one document per line)
    #[arg(long)]
    ndjson: bool,

    /// Dot-separated path to the list of records
    #[arg(long)]
    root_node: Option<String>,

    /// Name of the main table
    #[arg(long)]
    root_name: Option<String>,

    /// Compact output (no pretty-printing)
    #[arg(long)]
    compact: bool,

    /// Convert this legacy descriptor file instead of reading examples
    #[arg(long, value_name = "FILE")]
    from_legacy: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mapping = match &args.from_legacy {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("Failed to open file: {path}"))?;
            let legacy: Value = serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("Failed to parse JSON: {path}"))?;
            TableMapping::from_legacy(&legacy, None)?
        }
        None => infer(&args)?,
    };

    let value = mapping.to_mapping_value()?;
    let output = if args.compact {
        serde_json::to_string(&value)?
    } else {
        serde_json::to_string_pretty(&value)?
    };

    println!("{}", output);

    Ok(())
}

fn infer(args: &Args) -> Result<TableMapping> {
    let mut config = MeltConfig::default();
    config.root_node = args.root_node.clone();
    if let Some(root_name) = &args.root_name {
        config.root_name = root_name.clone();
    }

    // Create reader based on input source
    let reader: Box<dyn BufRead> = if let Some(file_path) = &args.input {
        Box::new(BufReader::new(
            File::open(file_path).with_context(|| format!("Failed to open file: {file_path}"))?,
        ))
    } else {
        Box::new(BufReader::new(stdin()))
    };

    let mut melter = Melter::new(config);
    let mut count = 0;

    if args.ndjson {
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line)?;
            melter.analyze(&value)?;
            count += 1;
        }
    } else {
        let value: Value = serde_json::from_reader(reader).context("Failed to parse JSON input")?;
        melter.analyze(&value)?;
        count += 1;
    }

    if count == 0 {
        warn!("no JSON documents found in input");
    }

    Ok(melter.table_mapping())
}
