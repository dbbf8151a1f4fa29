//! JSON path descent and record flattening.
//!
//! Upstream payloads are nested and not always complete: a key can be
//! missing, or a level can be a list where an object was expected. Descent
//! therefore returns `None` instead of failing, and flattening turns
//! whatever list of records it is handed into a `Table`.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::table::{Cell, Table};

/// Separator used for nested object keys when none is configured.
pub const DEFAULT_SEP: &str = ".";

/// Field-path-to-column rules for one entity.
///
/// - `record_path`: keys leading from each top-level record to a nested list
///   of sub-records; one row is produced per sub-record.
/// - `meta`: fields of the top-level record copied onto every sub-record row
///   (dotted paths allowed), named `meta_prefix + path`.
/// - `record_prefix`: prefix for the sub-record's own columns.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FlattenRules {
    pub record_path: Vec<String>,
    pub meta: Vec<String>,
    pub meta_prefix: Option<String>,
    pub record_prefix: Option<String>,
    pub sep: Option<String>,
}

impl FlattenRules {
    fn sep(&self) -> &str {
        self.sep.as_deref().unwrap_or(DEFAULT_SEP)
    }
}

/// Follow `path` through nested objects. Any missing key, or any level that
/// is not an object, yields `None`.
pub fn descend<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |current, key| current.as_object()?.get(key))
}

/// Flatten a list of records (or a single record) into a table.
/// Anything else, and any non-object list item, contributes no rows.
pub fn flatten(records: &Value, rules: &FlattenRules) -> Table {
    let top_level: Vec<&Map<String, Value>> = match records {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        Value::Object(map) => vec![map],
        _ => Vec::new(),
    };

    let sep = rules.sep();
    let mut rows = Vec::new();

    for record in top_level {
        if rules.record_path.is_empty() {
            let mut row = Vec::new();
            flatten_object(rules.record_prefix.as_deref(), record, sep, &mut row);
            rows.push(row);
            continue;
        }

        let meta = meta_cells(record, rules, sep);
        let mut children = Vec::new();
        if let Some((first, rest)) = rules.record_path.split_first() {
            if let Some(next) = record.get(first) {
                collect_records(next, rest, &mut children);
            }
        }

        for child in children {
            let Some(child) = child.as_object() else {
                continue;
            };
            let mut row = Vec::new();
            flatten_object(rules.record_prefix.as_deref(), child, sep, &mut row);
            row.extend(meta.iter().cloned());
            rows.push(row);
        }
    }

    Table::from_records(rows)
}

fn flatten_object(prefix: Option<&str>, object: &Map<String, Value>, sep: &str, out: &mut Vec<(String, Cell)>) {
    for (key, value) in object {
        let name = match prefix {
            Some(p) if !p.is_empty() => format!("{p}{sep}{key}"),
            _ => key.clone(),
        };
        match value {
            Value::Object(nested) => flatten_object(Some(name.as_str()), nested, sep, out),
            other => out.push((name, Cell::from_json(other))),
        }
    }
}

fn collect_records<'a>(value: &'a Value, path: &[String], out: &mut Vec<&'a Value>) {
    match path.split_first() {
        None => match value {
            Value::Array(items) => out.extend(items.iter()),
            other => out.push(other),
        },
        Some((key, rest)) => match value {
            Value::Array(items) => {
                for item in items {
                    collect_records(item, path, out);
                }
            }
            Value::Object(map) => {
                if let Some(next) = map.get(key) {
                    collect_records(next, rest, out);
                }
            }
            _ => {}
        },
    }
}

fn meta_cells(record: &Map<String, Value>, rules: &FlattenRules, sep: &str) -> Vec<(String, Cell)> {
    let prefix = rules.meta_prefix.as_deref().unwrap_or("");
    rules
        .meta
        .iter()
        .map(|field| {
            let path: Vec<String> = field.split('.').map(str::to_string).collect();
            let cell = descend_map(record, &path)
                .map(Cell::from_json)
                .unwrap_or(Cell::Null);
            (format!("{prefix}{}", path.join(sep)), cell)
        })
        .collect()
}

fn descend_map<'a>(record: &'a Map<String, Value>, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    descend(record.get(first)?, rest)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
