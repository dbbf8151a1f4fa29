/// Append-only audit trail of window attempts (`_ingestion_log.parquet`).
///
/// One row per attempt, success or failure, across every run. Appending
/// reads the whole file, concatenates and rewrites it: two processes
/// appending at the same moment can lose rows.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use chrono_tz::Tz;
use tracing::debug;

use crate::model::{ExtractError, IngestionLogRow};
use crate::parquet_io::{read_table_if_exists, write_table};
use crate::table::{Cell, Table};

pub const LOG_FILE_NAME: &str = "_ingestion_log.parquet";

pub const LOG_COLUMNS: [&str; 8] = [
    "entity",
    "start_date",
    "status",
    "rows",
    "duration_ms",
    "error",
    "raw_file",
    "ingested_at_utc",
];

pub fn log_path(dir: &Path) -> PathBuf {
    dir.join(LOG_FILE_NAME)
}

fn optional_text(value: Option<&str>) -> Cell {
    value.map_or(Cell::Null, |v| Cell::Text(v.to_string()))
}

/// Rows in the fixed log column order.
pub fn to_table(rows: &[IngestionLogRow]) -> Table {
    let mut table = Table::new(LOG_COLUMNS.iter().map(|c| c.to_string()).collect());
    for row in rows {
        table.push_row(vec![
            Cell::Text(row.entity.clone()),
            Cell::Text(row.start_date.clone()),
            Cell::Text(row.status.to_string()),
            Cell::Int(row.rows as i64),
            row.duration_ms.map_or(Cell::Null, |ms| Cell::Int(ms as i64)),
            optional_text(row.error.as_deref()),
            optional_text(row.raw_file.as_deref()),
            Cell::Text(row.ingested_at_utc.to_rfc3339_opts(SecondsFormat::Micros, true)),
        ]);
    }
    table
}

/// Append `rows` to the log in `dir`, creating it if needed. Returns the
/// log path.
pub fn append(dir: &Path, rows: &[IngestionLogRow]) -> Result<PathBuf, ExtractError> {
    fs::create_dir_all(dir).map_err(|e| ExtractError::io(dir, e))?;
    let path = log_path(dir);

    let new_rows = to_table(rows);
    let full = match read_table_if_exists(&path)? {
        Some(existing) => Table::concat([existing, new_rows]),
        None => new_rows,
    };
    write_table(&full, &path, Tz::UTC)?;
    debug!(path = %path.display(), appended = rows.len(), total = full.num_rows(), "ingestion log updated");
    Ok(path)
}

/// Whole log; empty when none has been written yet.
pub fn read(dir: &Path) -> Result<Table, ExtractError> {
    Ok(read_table_if_exists(&log_path(dir))?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
