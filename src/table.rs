//! In-memory tabular records.
//!
//! A `Table` is an ordered list of column names plus rows of `Cell`s aligned
//! to those columns. It covers exactly what the bronze layer needs from a
//! dataframe: row/column union, per-column rewrites, first-wins
//! deduplication, a stable sort and row filtering.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

use serde_json::Value;

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

/// A single value. Timestamps are UTC epoch seconds; the display time zone
/// is applied when the table is written out.
#[derive(Debug, Clone)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(i64),
}

/// Hashable identity of a cell. Integral floats compare equal to ints so
/// that rows read back from Parquet (where a mixed column became Float64)
/// still match freshly parsed JSON rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CellKey<'a> {
    Null,
    Bool(bool),
    Number(i64),
    FloatBits(u64),
    Text(&'a str),
    Timestamp(i64),
}

impl Cell {
    pub fn from_json(value: &Value) -> Cell {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Int(i),
                None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
            },
            Value::String(s) => Cell::Text(s.clone()),
            // Lists (and anything flattening left behind) are kept as JSON text.
            other => Cell::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Interpret the cell as epoch seconds, if it is numeric.
    pub fn as_epoch_seconds(&self) -> Option<i64> {
        match self {
            Cell::Int(v) | Cell::Timestamp(v) => Some(*v),
            Cell::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            _ => None,
        }
    }

    fn key(&self) -> CellKey<'_> {
        match self {
            Cell::Null => CellKey::Null,
            Cell::Bool(b) => CellKey::Bool(*b),
            Cell::Int(i) => CellKey::Number(*i),
            Cell::Float(f) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    CellKey::Number(*f as i64)
                } else {
                    CellKey::FloatBits(f.to_bits())
                }
            }
            Cell::Text(s) => CellKey::Text(s),
            Cell::Timestamp(t) => CellKey::Timestamp(*t),
        }
    }

    /// Ordering used by `Table::sort_by`. Nulls are handled by the caller.
    fn compare(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Int(a), Cell::Int(b)) | (Cell::Timestamp(a), Cell::Timestamp(b)) => a.cmp(b),
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
            (Cell::Bool(a), Cell::Bool(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.to_string().cmp(&b.to_string()),
            },
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) | Cell::Timestamp(v) => Some(*v as f64),
            Cell::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Cell {}

impl std::hash::Hash for Cell {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Int(i) | Cell::Timestamp(i) => write!(f, "{i}"),
            Cell::Float(x) => write!(f, "{x}"),
            Cell::Text(s) => write!(f, "{s}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table from name/value records. Columns appear in order of
    /// first appearance; cells a record lacks are null.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Vec<(String, Cell)>>,
    {
        let mut table = Table::default();
        for record in records {
            table.push_record(record);
        }
        table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cells of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    fn ensure_column(&mut self, name: &str) -> usize {
        match self.column_index(name) {
            Some(idx) => idx,
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(Cell::Null);
                }
                self.columns.len() - 1
            }
        }
    }

    /// Append one record, adding any columns it introduces.
    pub fn push_record(&mut self, record: Vec<(String, Cell)>) {
        let mut row = vec![Cell::Null; self.columns.len()];
        for (name, cell) in record {
            let idx = self.ensure_column(&name);
            if idx >= row.len() {
                row.resize(idx + 1, Cell::Null);
            }
            row[idx] = cell;
        }
        self.rows.push(row);
    }

    /// Append a row already aligned to `columns()`.
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), Cell::Null);
        self.rows.push(row);
    }

    /// Row union with column union. Missing columns become null.
    pub fn concat<I>(tables: I) -> Table
    where
        I: IntoIterator<Item = Table>,
    {
        let mut out = Table::default();
        for table in tables {
            let mapping: Vec<usize> = table
                .columns
                .iter()
                .map(|name| out.ensure_column(name))
                .collect();
            let width = out.columns.len();
            for row in table.rows {
                let mut aligned = vec![Cell::Null; width];
                for (cell, &idx) in row.into_iter().zip(&mapping) {
                    aligned[idx] = cell;
                }
                out.rows.push(aligned);
            }
        }
        out
    }

    /// Replace (or add) a column with the given values.
    pub fn set_column(&mut self, name: &str, values: Vec<Cell>) {
        debug_assert_eq!(values.len(), self.rows.len());
        let idx = self.ensure_column(name);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[idx] = value;
        }
    }

    /// Rewrite every cell of an existing column. Returns `false` if the
    /// column does not exist.
    pub fn map_column<F>(&mut self, name: &str, mut f: F) -> bool
    where
        F: FnMut(&Cell) -> Cell,
    {
        let Some(idx) = self.column_index(name) else {
            return false;
        };
        for row in &mut self.rows {
            row[idx] = f(&row[idx]);
        }
        true
    }

    /// Drop rows whose key cells repeat an earlier row; the first row wins.
    /// Key columns that do not exist are ignored; with no usable key the
    /// table is left untouched. Returns the number of rows removed.
    pub fn dedup_by(&mut self, key_columns: &[&str]) -> usize {
        let indices: Vec<usize> = key_columns
            .iter()
            .filter_map(|name| self.column_index(name))
            .collect();
        self.dedup_indices(&indices)
    }

    /// Deduplicate on every column the predicate does not exclude.
    pub fn dedup_excluding<F>(&mut self, exclude: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let indices: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, name)| !exclude(name))
            .map(|(idx, _)| idx)
            .collect();
        self.dedup_indices(&indices)
    }

    fn dedup_indices(&mut self, indices: &[usize]) -> usize {
        if indices.is_empty() {
            return 0;
        }
        let before = self.rows.len();
        let mut seen: HashSet<Vec<Cell>> = HashSet::with_capacity(before);
        self.rows.retain(|row| {
            let key: Vec<Cell> = indices.iter().map(|&i| row[i].clone()).collect();
            seen.insert(key)
        });
        before - self.rows.len()
    }

    /// Stable ascending sort by one column, nulls last. Returns `false` if
    /// the column does not exist.
    pub fn sort_by(&mut self, column: &str) -> bool {
        let Some(idx) = self.column_index(column) else {
            return false;
        };
        self.rows.sort_by(|a, b| match (a[idx].is_null(), b[idx].is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => a[idx].compare(&b[idx]),
        });
        true
    }

    /// Keep only rows for which the predicate holds. Returns rows removed.
    pub fn retain_rows<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&[Cell]) -> bool,
    {
        let before = self.rows.len();
        self.rows.retain(|row| keep(row));
        before - self.rows.len()
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.num_rows(), self.num_columns())
    }

    pub fn null_count(&self) -> usize {
        self.rows
            .iter()
            .map(|row| row.iter().filter(|c| c.is_null()).count())
            .sum()
    }

    /// Row-major view as name -> cell maps; handy for assertions.
    pub fn row_map(&self, row: usize) -> Option<HashMap<&str, &Cell>> {
        let cells = self.rows.get(row)?;
        Some(
            self.columns
                .iter()
                .map(String::as_str)
                .zip(cells.iter())
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(pairs: &[(&str, Cell)]) -> Vec<(String, Cell)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_from_records_unions_columns_in_first_seen_order() {
        let table = Table::from_records(vec![
            rec(&[("timestamp", Cell::Int(1)), ("speed", Cell::Float(3.5))]),
            rec(&[("timestamp", Cell::Int(2)), ("gust", Cell::Float(7.0))]),
        ]);

        assert_eq!(table.columns(), &["timestamp", "speed", "gust"]);
        assert_eq!(table.shape(), (2, 3));
        assert_eq!(table.null_count(), 2, "each row lacks one column");
    }

    #[test]
    fn test_concat_fills_missing_columns_with_null() {
        let a = Table::from_records(vec![rec(&[("timestamp", Cell::Int(1)), ("a", Cell::Int(10))])]);
        let b = Table::from_records(vec![rec(&[("b", Cell::Int(20)), ("timestamp", Cell::Int(2))])]);

        let merged = Table::concat(vec![a, b]);
        assert_eq!(merged.columns(), &["timestamp", "a", "b"]);
        assert_eq!(merged.num_rows(), 2);

        let second = merged.row_map(1).unwrap();
        assert_eq!(second["timestamp"], &Cell::Int(2));
        assert!(second["a"].is_null());
        assert_eq!(second["b"], &Cell::Int(20));
    }

    #[test]
    fn test_dedup_by_keeps_first_occurrence() {
        let mut table = Table::from_records(vec![
            rec(&[("t", Cell::Int(1)), ("v", Cell::Text("first".into()))]),
            rec(&[("t", Cell::Int(2)), ("v", Cell::Text("other".into()))]),
            rec(&[("t", Cell::Int(1)), ("v", Cell::Text("second".into()))]),
        ]);

        let removed = table.dedup_by(&["t"]);
        assert_eq!(removed, 1);
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.row_map(0).unwrap()["v"], &Cell::Text("first".into()));
    }

    #[test]
    fn test_dedup_by_missing_column_is_a_no_op() {
        let mut table = Table::from_records(vec![
            rec(&[("t", Cell::Int(1))]),
            rec(&[("t", Cell::Int(1))]),
        ]);
        assert_eq!(table.dedup_by(&["datetime"]), 0);
        assert_eq!(table.num_rows(), 2);
    }

    #[test]
    fn test_integral_float_matches_int_for_dedup() {
        let mut table = Table::from_records(vec![
            rec(&[("height", Cell::Int(2))]),
            rec(&[("height", Cell::Float(2.0))]),
            rec(&[("height", Cell::Float(2.5))]),
        ]);
        assert_eq!(table.dedup_by(&["height"]), 1);
        assert_eq!(table.num_rows(), 2);
    }

    #[test]
    fn test_dedup_excluding_ignores_offset_columns() {
        let mut table = Table::from_records(vec![
            rec(&[("t", Cell::Int(1)), ("height", Cell::Float(1.2)), ("utcOffset", Cell::Int(-3))]),
            rec(&[("t", Cell::Int(1)), ("height", Cell::Float(1.2)), ("utcOffset", Cell::Int(-2))]),
            rec(&[("t", Cell::Int(1)), ("height", Cell::Float(0.4)), ("utcOffset", Cell::Int(-3))]),
        ]);

        let removed = table.dedup_excluding(|name| name == "utcOffset");
        assert_eq!(removed, 1);
        assert_eq!(table.num_rows(), 2, "same timestamp, different swell survives");
    }

    #[test]
    fn test_sort_by_is_stable_with_nulls_last() {
        let mut table = Table::from_records(vec![
            rec(&[("t", Cell::Int(3)), ("tag", Cell::Text("a".into()))]),
            rec(&[("t", Cell::Null), ("tag", Cell::Text("b".into()))]),
            rec(&[("t", Cell::Int(1)), ("tag", Cell::Text("c".into()))]),
            rec(&[("t", Cell::Int(3)), ("tag", Cell::Text("d".into()))]),
        ]);

        assert!(table.sort_by("t"));
        let tags: Vec<String> = table
            .column("tag")
            .unwrap()
            .into_iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(tags, vec!["c", "a", "d", "b"]);
        assert!(!table.sort_by("missing"));
    }

    #[test]
    fn test_sort_mixes_int_and_float() {
        let mut table = Table::from_records(vec![
            rec(&[("t", Cell::Float(2.5))]),
            rec(&[("t", Cell::Int(2))]),
            rec(&[("t", Cell::Int(3))]),
        ]);
        table.sort_by("t");
        let values: Vec<String> = table.column("t").unwrap().iter().map(|c| c.to_string()).collect();
        assert_eq!(values, vec!["2", "2.5", "3"]);
    }

    #[test]
    fn test_retain_rows_and_map_column() {
        let mut table = Table::from_records(vec![
            rec(&[("t", Cell::Int(1))]),
            rec(&[("t", Cell::Int(5))]),
        ]);
        assert!(table.map_column("t", |c| Cell::Timestamp(c.as_epoch_seconds().unwrap_or(0))));
        let removed = table.retain_rows(|row| matches!(row[0], Cell::Timestamp(t) if t <= 2));
        assert_eq!(removed, 1);
        assert_eq!(table.rows()[0][0], Cell::Timestamp(1));
    }

    #[test]
    fn test_cell_from_json_keeps_lists_as_text() {
        let value = serde_json::json!([1, 2]);
        assert_eq!(Cell::from_json(&value), Cell::Text("[1,2]".into()));
        assert_eq!(Cell::from_json(&serde_json::json!(1.5)), Cell::Float(1.5));
        assert_eq!(Cell::from_json(&serde_json::json!(null)), Cell::Null);
    }
}
