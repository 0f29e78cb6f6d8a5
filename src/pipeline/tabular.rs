//! Tabular serialisation: native pipe tables → the entity tabular format.
//!
//! The format is a mapping with one `table` key holding a sequence of
//! records keyed by column header:
//!
//! ```text
//! {
//!   "table": [
//!     { "Region": "North", "Revenue": "1.2M" },
//!     { "Region": "South", "Revenue": "0.9M" }
//!   ]
//! }
//! ```
//!
//! It is emitted as indented JSON, which is also valid YAML 1.2, so the
//! entity files keep the `.yaml` extension and load with any YAML reader.

use serde_json::{json, Map, Value};
use std::collections::HashSet;

/// Convert GFM pipe-table markup to the tabular format.
///
/// * blank markup → empty string
/// * fewer than two lines → `{"table": "empty"}`
/// * the `|---|---|` separator row is skipped
/// * rows whose cell count differs from the header are dropped
pub fn convert_markdown_table(markup: &str) -> String {
    if markup.trim().is_empty() {
        return String::new();
    }

    let lines: Vec<&str> = markup
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    if lines.len() < 2 {
        return render_tabular(&json!({ "table": "empty" }));
    }

    let headers = unique_headers(split_cells(lines[0]));
    let rows: Vec<Value> = lines[1..]
        .iter()
        .filter(|l| !is_separator(l))
        .map(|l| split_cells(l))
        .filter(|cells| cells.len() == headers.len())
        .map(|cells| {
            let record: Map<String, Value> = headers
                .iter()
                .cloned()
                .zip(cells.into_iter().map(Value::String))
                .collect();
            Value::Object(record)
        })
        .collect();

    render_tabular(&json!({ "table": rows }))
}

/// Wrap a vision-extracted table value in the tabular format.
///
/// A value that already carries the `table` key is kept as is.
pub fn wrap_table_value(value: &Value) -> String {
    match value {
        Value::Object(map) if map.contains_key("table") => render_tabular(value),
        other => render_tabular(&json!({ "table": other })),
    }
}

/// Serialise a tabular value.
pub fn render_tabular(value: &Value) -> String {
    // Serialising a `Value` cannot fail; fall back to the compact form anyway.
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Split one pipe-table line into trimmed cells. `\|` is a literal pipe.
fn split_cells(line: &str) -> Vec<String> {
    let inner = line.trim();
    let inner = inner.strip_prefix('|').unwrap_or(inner);
    let inner = if inner.ends_with('|') && !inner.ends_with("\\|") {
        &inner[..inner.len() - 1]
    } else {
        inner
    };

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

fn is_separator(line: &str) -> bool {
    let cells = split_cells(line);
    !cells.is_empty()
        && cells.iter().all(|c| {
            let c = c.trim_matches(':');
            !c.is_empty() && c.chars().all(|ch| ch == '-')
        })
}

/// Blank headers become `column_N`; repeated headers get `_2`, `_3`, … suffixes.
fn unique_headers(raw: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .enumerate()
        .map(|(i, h)| {
            let base = if h.is_empty() {
                format!("column_{}", i + 1)
            } else {
                h
            };
            let mut name = base.clone();
            let mut n = 2;
            while !seen.insert(name.clone()) {
                name = format!("{base}_{n}");
                n += 1;
            }
            name
        })
        .collect()
}
