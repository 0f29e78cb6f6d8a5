//! Structural validation of tabular output.
//!
//! [`validate`] decides whether a table payload is usable before it is
//! trusted at confidence 1.0. It is pure: the same input always yields the
//! same verdict, and nothing outside the argument is read.
//!
//! Checks run in order and stop at the first failure:
//!
//! | # | check                              | failure                  |
//! |---|------------------------------------|--------------------------|
//! | 1 | markup is not blank                | `empty markdown output`  |
//! | 2 | parses to a mapping or a sequence  | `invalid structure`      |
//! | 3 | a non-empty row set can be located | `empty table array`, `no data rows` |
//! | 4 | at least two distinct columns      | `insufficient columns`   |

use crate::error::ValidationFailure;
use serde_json::Value;
use std::collections::BTreeSet;

/// Dimensions of a table that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableShape {
    /// Rows carrying at least one value.
    pub rows: usize,
    /// Distinct column keys across those rows.
    pub columns: usize,
}

/// Validate tabular markup.
pub fn validate(markup: &str) -> Result<TableShape, ValidationFailure> {
    if markup.trim().is_empty() {
        return Err(ValidationFailure::EmptyOutput);
    }

    let parsed: Value =
        serde_json::from_str(markup).map_err(|_| ValidationFailure::InvalidStructure)?;
    if !(parsed.is_object() || parsed.is_array()) {
        return Err(ValidationFailure::InvalidStructure);
    }

    let rows = locate_rows(&parsed)?;
    if rows.is_empty() {
        return Err(ValidationFailure::EmptyTableArray);
    }

    let data_rows: Vec<&Value> = rows.into_iter().filter(|r| !is_blank(r)).collect();
    if data_rows.is_empty() {
        return Err(ValidationFailure::NoDataRows);
    }

    let mut columns = BTreeSet::new();
    for row in &data_rows {
        match row {
            Value::Object(map) => columns.extend(map.keys().cloned()),
            Value::Array(cells) => columns.extend((0..cells.len()).map(|i| format!("#{i}"))),
            _ => {
                columns.insert("value".to_string());
            }
        }
    }

    if columns.len() < 2 {
        return Err(ValidationFailure::InsufficientColumns);
    }

    Ok(TableShape {
        rows: data_rows.len(),
        columns: columns.len(),
    })
}

/// Find the row sequence inside a parsed payload.
///
/// Lookup order: a top-level sequence; the `table` key; the first
/// sequence-valued key; the mapping itself as a single record.
fn locate_rows(parsed: &Value) -> Result<Vec<&Value>, ValidationFailure> {
    let map = match parsed {
        Value::Array(items) => return Ok(items.iter().collect()),
        Value::Object(map) => map,
        _ => return Err(ValidationFailure::InvalidStructure),
    };

    if let Some(table) = map.get("table") {
        return match table {
            Value::Array(items) => Ok(items.iter().collect()),
            Value::Object(record) if !record.is_empty() => Ok(vec![table]),
            _ => Err(ValidationFailure::NoDataRows),
        };
    }

    if let Some(items) = map.values().find_map(Value::as_array) {
        return Ok(items.iter().collect());
    }

    if map.is_empty() {
        return Err(ValidationFailure::NoDataRows);
    }
    Ok(vec![parsed])
}

fn is_blank(row: &Value) -> bool {
    match row {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(cells) => cells.iter().all(is_blank),
        Value::Object(map) => map.values().all(is_blank),
        Value::Bool(_) | Value::Number(_) => false,
    }
}
