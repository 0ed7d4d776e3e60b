use crate::error::{shape_name, MeltError, Result};
use serde_json::Value;

/// Narrow the input to the records to melt.
///
/// Without a root node (or with `"."`) an array yields its elements and any
/// other value is a single record. With a root node every dot-separated
/// segment must exist and the result must be a non-empty list.
pub fn select_records<'a>(input: &'a Value, root_node: Option<&str>) -> Result<Vec<&'a Value>> {
    let Some(path) = root_node.filter(|p| !p.is_empty() && *p != ".") else {
        return Ok(match input {
            Value::Array(records) => records.iter().collect(),
            record => vec![record],
        });
    };

    let mut current = input;
    for segment in path.split('.') {
        current = current
            .as_object()
            .and_then(|fields| fields.get(segment))
            .ok_or_else(|| MeltError::RootNotFound {
                path: path.to_string(),
                segment: segment.to_string(),
            })?;
    }

    match current {
        Value::Null => Err(MeltError::MissingData { path: path.to_string() }),
        Value::Array(records) if records.is_empty() => {
            Err(MeltError::MissingData { path: path.to_string() })
        }
        Value::Array(records) => Ok(records.iter().collect()),
        other => Err(MeltError::RootNotSequence {
            path: path.to_string(),
            found: shape_name(other),
        }),
    }
}
