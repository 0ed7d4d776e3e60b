//! JSON melting - flatten nested records into related tables
//!
//! [`Melter`] walks records against a schema tree and emits one table per
//! list path. Every child row carries its parent row's key, so tables can be
//! joined back together from the output alone.
//!
//! ## Frozen schemas
//!
//! For streams of homogeneous records, build the schema once with
//! [`Melter::from_examples`] or [`Melter::with_mapping`] and turn analysis off;
//! later records are then flattened against that fixed layout.

pub mod config;
pub mod engine;
pub mod input;
mod normalize;
pub mod strategy;
pub mod types;
pub mod writer;

pub use config::{DictStrategy, ListStrategy, MeltConfig};
pub use engine::{hash_record, Melter};
pub use input::select_records;
pub use strategy::{select_strategy, FieldSettings, Strategy};
pub use types::{Key, Row, Table, Tables, GENERATED_PKEY, SCALAR_COLUMN};
pub use writer::{JsonLinesWriter, TableWriter};
