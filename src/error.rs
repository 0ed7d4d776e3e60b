use crate::melt::Strategy;
use crate::schema::NodeType;
use thiserror::Error;

/// Errors raised while building a schema or melting records into tables
#[derive(Debug, Error)]
pub enum MeltError {
    /// A segment of the root selector does not exist in the input
    #[error("root node '{path}' is invalid: segment '{segment}' not found")]
    RootNotFound { path: String, segment: String },

    /// The root selector resolved to something other than a sequence of records
    #[error("root node '{path}' must resolve to a list of records, found {found}")]
    RootNotSequence { path: String, found: &'static str },

    /// The root selector resolved to null or an empty list
    #[error("no data was found under root node '{path}'")]
    MissingData { path: String },

    /// Two observations at one path form an incompatible pair
    #[error("incompatible types {expected} and {observed} at path '{path}'")]
    TypeConflict {
        path: String,
        expected: NodeType,
        observed: NodeType,
    },

    /// An array mixes objects and scalars
    #[error("value types of list '{path}' are inconsistent")]
    MixedArray { path: String },

    /// Strict mode: the same field needed two different strategies
    #[error("field '{path}' was flattened as {first} and later as {second}")]
    InconsistentStrategy {
        path: String,
        first: Strategy,
        second: Strategy,
    },

    /// Strict mode: a value does not fit the shape its node declares
    #[error("field '{path}' is declared as {expected} but a {found} was observed")]
    ShapeMismatch {
        path: String,
        expected: NodeType,
        found: &'static str,
    },

    /// A table mapping failed the referential check or could not be parsed
    #[error("invalid table mapping: {0}")]
    InvalidMapping(String),

    /// Input nesting is deeper than the configured cap
    #[error("nesting at '{path}' exceeds the maximum depth of {max_depth}")]
    DepthExceeded { path: String, max_depth: usize },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, MeltError>;

/// Short name of a JSON value's shape for error messages
pub(crate) fn shape_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
