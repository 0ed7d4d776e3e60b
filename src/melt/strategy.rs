//! Per-field flattening decisions.
//!
//! [`select_strategy`] is a pure function of a field's schema shape and its
//! settings, so the same node always resolves to the same action.

use crate::melt::config::{DictStrategy, ListStrategy};
use crate::schema::NodeType;
use serde::Serialize;
use std::fmt;

/// What the engine does with one field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Strategy {
    /// Emit the scalar as a column of the current row
    Column,
    /// Emit the value as-is, serializing objects and arrays to JSON text
    Opaque,
    /// Inline the object's fields into the current row under qualified names
    InlineColumns,
    /// Emit each element as a row of a child table
    ChildRows,
    /// Emit each element as a `<column>_<index>` column of the current row
    IndexedColumns,
    /// Drop an undeclared child table
    Ignore,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Strategy::Column => "simple datatype",
            Strategy::Opaque => "string",
            Strategy::InlineColumns => "dictionary (to columns)",
            Strategy::ChildRows => "list (to rows)",
            Strategy::IndexedColumns => "list (to columns)",
            Strategy::Ignore => "ignored table",
        };
        f.write_str(label)
    }
}

/// Per-field inputs to [`select_strategy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSettings {
    pub force_type: bool,
    /// The field is a child table declared by a mapping
    pub declared_table: bool,
    /// Undeclared child tables are dropped
    pub ignore_undeclared_tables: bool,
    pub dict: DictStrategy,
    pub list: ListStrategy,
}

pub fn select_strategy(shape: NodeType, settings: &FieldSettings) -> Strategy {
    if settings.force_type {
        return Strategy::Opaque;
    }

    match shape {
        NodeType::Null | NodeType::Scalar => Strategy::Column,
        NodeType::Dict => match settings.dict {
            DictStrategy::ToColumns => Strategy::InlineColumns,
            DictStrategy::ToStr => Strategy::Opaque,
        },
        NodeType::List | NodeType::ListOfScalars | NodeType::ListOfDicts => {
            match (settings.declared_table, settings.ignore_undeclared_tables, settings.list) {
                (true, _, _) => Strategy::ChildRows,
                (false, true, _) => Strategy::Ignore,
                (false, false, ListStrategy::ToRows) => Strategy::ChildRows,
                (false, false, ListStrategy::ToColumns) => Strategy::IndexedColumns,
                (false, false, ListStrategy::ToStr) => Strategy::Opaque,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> FieldSettings {
        FieldSettings {
            force_type: false,
            declared_table: false,
            ignore_undeclared_tables: false,
            dict: DictStrategy::ToColumns,
            list: ListStrategy::ToRows,
        }
    }

    #[test]
    fn test_defaults() {
        let s = settings();
        assert_eq!(select_strategy(NodeType::Scalar, &s), Strategy::Column);
        assert_eq!(select_strategy(NodeType::Null, &s), Strategy::Column);
        assert_eq!(select_strategy(NodeType::Dict, &s), Strategy::InlineColumns);
        assert_eq!(select_strategy(NodeType::ListOfDicts, &s), Strategy::ChildRows);
        assert_eq!(select_strategy(NodeType::ListOfScalars, &s), Strategy::ChildRows);
    }

    #[test]
    fn test_force_type_wins() {
        let s = FieldSettings { force_type: true, declared_table: true, ..settings() };
        assert_eq!(select_strategy(NodeType::Dict, &s), Strategy::Opaque);
        assert_eq!(select_strategy(NodeType::ListOfDicts, &s), Strategy::Opaque);
    }

    #[test]
    fn test_overrides() {
        let s = FieldSettings { dict: DictStrategy::ToStr, list: ListStrategy::ToColumns, ..settings() };
        assert_eq!(select_strategy(NodeType::Dict, &s), Strategy::Opaque);
        assert_eq!(select_strategy(NodeType::ListOfScalars, &s), Strategy::IndexedColumns);

        let s = FieldSettings { list: ListStrategy::ToStr, ..settings() };
        assert_eq!(select_strategy(NodeType::List, &s), Strategy::Opaque);
    }

    #[test]
    fn test_undeclared_tables() {
        let s = FieldSettings { ignore_undeclared_tables: true, ..settings() };
        assert_eq!(select_strategy(NodeType::ListOfDicts, &s), Strategy::Ignore);

        let s = FieldSettings { declared_table: true, ..s };
        assert_eq!(select_strategy(NodeType::ListOfDicts, &s), Strategy::ChildRows);
    }
}
