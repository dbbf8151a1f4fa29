//! Parquet persistence for `Table`.
//!
//! Column types are inferred from the cells: a column holding only
//! booleans becomes Boolean, only integers Int64, integers mixed with
//! floats Float64, only timestamps `Timestamp(µs, tz)`, only text (or
//! nothing but nulls) Utf8. A column mixing other kinds (say integers and
//! text) is stored as Utf8 holding one JSON value per cell, tagged in the
//! field metadata, so each cell reads back with its own kind. Timestamps
//! never mix with anything but nulls. Every field is nullable.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, StringArray,
    TimestampMicrosecondArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema, TimeUnit};
use arrow::record_batch::{RecordBatch, RecordBatchOptions, RecordBatchReader};
use arrow::util::display::array_value_to_string;
use chrono_tz::Tz;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use serde_json::Value;
use tracing::debug;

use crate::model::ExtractError;
use crate::table::{Cell, Table};

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Field metadata key marking a Utf8 column of JSON-encoded cells.
pub const CELL_ENCODING_KEY: &str = "surfline.cell_encoding";
const JSON_CELLS: &str = "json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Boolean,
    Int64,
    Float64,
    Timestamp,
    Utf8,
    JsonCells,
}

/// `None` when timestamps share the column with non-null cells of
/// another kind.
fn infer_kind<'a>(cells: impl Iterator<Item = &'a Cell>) -> Option<ColumnKind> {
    let (mut bools, mut ints, mut floats, mut stamps, mut other) = (false, false, false, false, false);
    for cell in cells {
        match cell {
            Cell::Null => {}
            Cell::Bool(_) => bools = true,
            Cell::Int(_) => ints = true,
            Cell::Float(_) => floats = true,
            Cell::Timestamp(_) => stamps = true,
            Cell::Text(_) => other = true,
        }
    }
    let kind = match (bools, ints, floats, stamps, other) {
        (false, false, false, false, _) => ColumnKind::Utf8,
        (true, false, false, false, false) => ColumnKind::Boolean,
        (false, true, false, false, false) => ColumnKind::Int64,
        (false, _, true, false, false) => ColumnKind::Float64,
        (false, false, false, true, false) => ColumnKind::Timestamp,
        (_, _, _, true, _) => return None,
        _ => ColumnKind::JsonCells,
    };
    Some(kind)
}

fn cell_to_json(cell: &Cell) -> Option<String> {
    let value = match cell {
        Cell::Null => return None,
        Cell::Bool(b) => Value::Bool(*b),
        Cell::Int(i) => Value::from(*i),
        Cell::Float(f) => Value::from(*f),
        Cell::Text(s) => Value::String(s.clone()),
        Cell::Timestamp(secs) => Value::from(*secs),
    };
    Some(value.to_string())
}

fn build_column(table: &Table, idx: usize, name: &str, tz: Tz) -> Result<(Field, ArrayRef), ExtractError> {
    let cells = || table.rows().iter().map(move |row| &row[idx]);
    let kind = infer_kind(cells()).ok_or_else(|| {
        ParquetError::General(format!("column '{name}' mixes timestamps with other values"))
    })?;
    let (data_type, array): (DataType, ArrayRef) = match kind {
        ColumnKind::Boolean => {
            let values: BooleanArray = cells()
                .map(|c| match c {
                    Cell::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect();
            (DataType::Boolean, Arc::new(values))
        }
        ColumnKind::Int64 => {
            let values: Int64Array = cells()
                .map(|c| match c {
                    Cell::Int(i) => Some(*i),
                    _ => None,
                })
                .collect();
            (DataType::Int64, Arc::new(values))
        }
        ColumnKind::Float64 => {
            let values: Float64Array = cells()
                .map(|c| match c {
                    Cell::Int(i) => Some(*i as f64),
                    Cell::Float(f) => Some(*f),
                    _ => None,
                })
                .collect();
            (DataType::Float64, Arc::new(values))
        }
        ColumnKind::Timestamp => {
            let micros: Vec<Option<i64>> = cells()
                .map(|c| match c {
                    Cell::Timestamp(secs) => secs.checked_mul(MICROS_PER_SECOND).map(Some).ok_or_else(|| {
                        ParquetError::General(format!(
                            "column '{name}': timestamp {secs} is out of range for microseconds"
                        ))
                    }),
                    _ => Ok(None),
                })
                .collect::<Result<_, _>>()?;
            let values = TimestampMicrosecondArray::from(micros).with_timezone(tz.name());
            (
                DataType::Timestamp(TimeUnit::Microsecond, Some(tz.name().into())),
                Arc::new(values),
            )
        }
        ColumnKind::Utf8 => {
            let values: StringArray = cells()
                .map(|c| match c {
                    Cell::Null => None,
                    Cell::Text(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                })
                .collect();
            (DataType::Utf8, Arc::new(values))
        }
        ColumnKind::JsonCells => {
            let values: StringArray = cells().map(cell_to_json).collect();
            let metadata = HashMap::from([(CELL_ENCODING_KEY.to_string(), JSON_CELLS.to_string())]);
            let field = Field::new(name, DataType::Utf8, true).with_metadata(metadata);
            return Ok((field, Arc::new(values)));
        }
    };
    Ok((Field::new(name, data_type, true), array))
}

/// Convert a table to a single record batch; timestamps carry `tz`.
pub fn to_record_batch(table: &Table, tz: Tz) -> Result<RecordBatch, ExtractError> {
    let mut fields = Vec::with_capacity(table.num_columns());
    let mut arrays = Vec::with_capacity(table.num_columns());
    for (idx, name) in table.columns().iter().enumerate() {
        let (field, array) = build_column(table, idx, name, tz)?;
        fields.push(field);
        arrays.push(array);
    }
    let options = RecordBatchOptions::new().with_row_count(Some(table.num_rows()));
    Ok(RecordBatch::try_new_with_options(
        Arc::new(Schema::new(fields)),
        arrays,
        &options,
    )?)
}

/// Write `table` to `path`, replacing any existing file. The file is
/// written next to the target first and renamed into place, so readers
/// never see a partial file.
pub fn write_table(table: &Table, path: &Path, tz: Tz) -> Result<(), ExtractError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| ExtractError::io(parent, e))?;
    }
    let batch = to_record_batch(table, tz)?;

    let tmp = temp_path(path);
    let file = File::create(&tmp).map_err(|e| ExtractError::io(&tmp, e))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    fs::rename(&tmp, path).map_err(|e| ExtractError::io(path, e))?;
    debug!(path = %path.display(), rows = table.num_rows(), "parquet written");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Read a Parquet file back into a table.
pub fn read_table(path: &Path) -> Result<Table, ExtractError> {
    let file = File::open(path).map_err(|e| ExtractError::io(path, e))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let columns: Vec<String> = reader
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let mut table = Table::new(columns);

    for batch in reader {
        let batch = batch?;
        let schema = batch.schema();
        let decoded: Vec<Vec<Cell>> = batch
            .columns()
            .iter()
            .zip(schema.fields().iter())
            .map(|(array, field)| column_cells(array, field))
            .collect::<Result<_, _>>()?;
        for row in 0..batch.num_rows() {
            table.push_row(decoded.iter().map(|col| col[row].clone()).collect());
        }
    }
    Ok(table)
}

/// `None` when no file exists at `path`.
pub fn read_table_if_exists(path: &Path) -> Result<Option<Table>, ExtractError> {
    if !path.exists() {
        return Ok(None);
    }
    read_table(path).map(Some)
}

fn column_cells(array: &ArrayRef, field: &Field) -> Result<Vec<Cell>, ExtractError> {
    let len = array.len();
    let json_cells = field.metadata().get(CELL_ENCODING_KEY).map(String::as_str) == Some(JSON_CELLS);
    let cells: Vec<Cell> = match array.data_type() {
        DataType::Utf8 if json_cells => {
            let values = array.as_string::<i32>();
            (0..len)
                .map(|i| -> Result<Cell, ExtractError> {
                    if values.is_null(i) {
                        return Ok(Cell::Null);
                    }
                    let value: Value = serde_json::from_str(values.value(i))?;
                    Ok(Cell::from_json(&value))
                })
                .collect::<Result<_, _>>()?
        }
        DataType::Boolean => {
            let values = array.as_boolean();
            (0..len)
                .map(|i| nullable(values, i, |i| Cell::Bool(values.value(i))))
                .collect()
        }
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
        | DataType::UInt8 | DataType::UInt16 | DataType::UInt32 => {
            let widened = cast(array.as_ref(), &DataType::Int64)?;
            let values = widened.as_primitive::<Int64Type>();
            (0..len)
                .map(|i| nullable(values, i, |i| Cell::Int(values.value(i))))
                .collect()
        }
        DataType::Float16 | DataType::Float32 | DataType::Float64 => {
            let widened = cast(array.as_ref(), &DataType::Float64)?;
            let values = widened.as_primitive::<Float64Type>();
            (0..len)
                .map(|i| nullable(values, i, |i| Cell::Float(values.value(i))))
                .collect()
        }
        DataType::Utf8 => {
            let values = array.as_string::<i32>();
            (0..len)
                .map(|i| nullable(values, i, |i| Cell::Text(values.value(i).to_string())))
                .collect()
        }
        DataType::LargeUtf8 => {
            let values = array.as_string::<i64>();
            (0..len)
                .map(|i| nullable(values, i, |i| Cell::Text(values.value(i).to_string())))
                .collect()
        }
        DataType::Timestamp(unit, _) => {
            let per_second = match unit {
                TimeUnit::Second => 1,
                TimeUnit::Millisecond => 1_000,
                TimeUnit::Microsecond => MICROS_PER_SECOND,
                TimeUnit::Nanosecond => 1_000_000_000,
            };
            let raw = cast(array.as_ref(), &DataType::Int64)?;
            let values = raw.as_primitive::<Int64Type>();
            (0..len)
                .map(|i| {
                    nullable(values, i, |i| Cell::Timestamp(values.value(i).div_euclid(per_second)))
                })
                .collect()
        }
        _ => (0..len)
            .map(|i| {
                if array.is_null(i) {
                    Ok(Cell::Null)
                } else {
                    array_value_to_string(array.as_ref(), i).map(Cell::Text)
                }
            })
            .collect::<Result<_, _>>()?,
    };
    Ok(cells)
}

fn nullable(array: &dyn Array, i: usize, value: impl FnOnce(usize) -> Cell) -> Cell {
    if array.is_null(i) { Cell::Null } else { value(i) }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
