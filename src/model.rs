/// Window, FetchResult, RawMeta, IngestionLogRow, ExtractError
/// core data structures and error handling
///
/// Core data types for the Surfline bronze extractor.
///
/// This module defines the shared domain model imported by all other modules.
/// It holds no I/O; the only logic is the mapping from a fetch result to the
/// ingestion-log row that audits it.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::table::Table;

/// Date format used for window starts, query parameters and landing paths.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

/// One bounded time span queried against the upstream API, identified by
/// its start date. The span length is carried by the request parameters
/// (`days`), not by the window itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Window {
    pub start: NaiveDate,
}

impl Window {
    pub fn new(start: NaiveDate) -> Self {
        Self { start }
    }

    /// The `start` query parameter, e.g. `2024-01-01`.
    pub fn start_param(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start.format(DATE_FORMAT))
    }
}

// ---------------------------------------------------------------------------
// Landing metadata
// ---------------------------------------------------------------------------

/// Sidecar metadata written next to every landed payload
/// (`response.meta.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMeta {
    pub entity: String,
    pub start_date: String,
    pub saved_at_utc: String,
    pub status_code: u16,
    pub hash_sha256: String,
    pub raw_file: String,
    pub duration_ms: u64,
    /// Filled in after the payload has been flattened.
    pub records_estimated: Option<usize>,
}

/// What happened when a response was captured to the landing layer.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCapture {
    Saved(RawMeta),
    /// The window start did not look like a date; nothing was written.
    Skipped,
    /// The body could not be parsed or written. Never aborts the fetch.
    Error(String),
}

impl RawCapture {
    pub fn raw_file(&self) -> Option<&str> {
        match self {
            RawCapture::Saved(meta) => Some(meta.raw_file.as_str()),
            _ => None,
        }
    }

    pub fn meta(&self) -> Option<&RawMeta> {
        match self {
            RawCapture::Saved(meta) => Some(meta),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Fetch results
// ---------------------------------------------------------------------------

/// Why a single window attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Upstream answered with something other than 200.
    HttpStatus,
    /// Upstream answered 200 but the body was not JSON.
    Parse,
    /// The JSON path or flattening produced zero rows.
    NoRecords,
    /// Timeout, connection reset, DNS failure and friends.
    Transport,
    /// The fetch task panicked before producing a result.
    Panicked,
}

/// Outcome of one window attempt. Exactly one variant per attempt.
#[derive(Debug, Clone)]
pub enum FetchResult {
    Success {
        start_date: String,
        table: Table,
        duration_ms: u64,
        raw: Option<RawCapture>,
    },
    Failure {
        start_date: String,
        error: String,
        kind: FailureKind,
        duration_ms: Option<u64>,
        raw: Option<RawCapture>,
    },
}

impl FetchResult {
    pub fn start_date(&self) -> &str {
        match self {
            FetchResult::Success { start_date, .. } | FetchResult::Failure { start_date, .. } => {
                start_date
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match self {
            FetchResult::Success { duration_ms, .. } => Some(*duration_ms),
            FetchResult::Failure { duration_ms, .. } => *duration_ms,
        }
    }

    pub fn raw(&self) -> Option<&RawCapture> {
        match self {
            FetchResult::Success { raw, .. } | FetchResult::Failure { raw, .. } => raw.as_ref(),
        }
    }

    /// Rows produced by this attempt (0 for failures).
    pub fn row_count(&self) -> usize {
        match self {
            FetchResult::Success { table, .. } => table.num_rows(),
            FetchResult::Failure { .. } => 0,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            FetchResult::Success { .. } => None,
            FetchResult::Failure { error, .. } => Some(error),
        }
    }
}

// ---------------------------------------------------------------------------
// Ingestion log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Success,
    Failure,
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStatus::Success => write!(f, "success"),
            FetchStatus::Failure => write!(f, "failure"),
        }
    }
}

/// One audit row per window attempt (not per output row).
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionLogRow {
    pub entity: String,
    pub start_date: String,
    pub status: FetchStatus,
    pub rows: usize,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub raw_file: Option<String>,
    pub ingested_at_utc: DateTime<Utc>,
}

impl IngestionLogRow {
    pub fn from_result(entity: &str, result: &FetchResult, ingested_at_utc: DateTime<Utc>) -> Self {
        Self {
            entity: entity.to_string(),
            start_date: result.start_date().to_string(),
            status: if result.is_success() {
                FetchStatus::Success
            } else {
                FetchStatus::Failure
            },
            rows: result.row_count(),
            duration_ms: result.duration_ms(),
            error: result.error().map(str::to_string),
            raw_file: result.raw().and_then(RawCapture::raw_file).map(str::to_string),
            ingested_at_utc,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can cross a public boundary of the extractor. Per-window
/// faults never show up here: they are folded into `FetchResult::Failure`.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDateFormat(String),

    #[error("window stride must be at least one day")]
    InvalidStride,

    #[error("window {start_date} could not be fetched: {error}")]
    WindowFailed { start_date: String, error: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ExtractError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExtractError::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    fn saved_meta() -> RawMeta {
        RawMeta {
            entity: "wind".to_string(),
            start_date: "2024-01-01".to_string(),
            saved_at_utc: "2024-05-01T13:00:00+00:00".to_string(),
            status_code: 503,
            hash_sha256: "00".repeat(32),
            raw_file: "data/raw/wind/start=2024-01-01/response.json.gz".to_string(),
            duration_ms: 120,
            records_estimated: None,
        }
    }

    #[test]
    fn test_window_formats_as_iso_date() {
        let window = Window::new(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(window.start_param(), "2024-02-01");
        assert_eq!(window.to_string(), "2024-02-01");
    }

    #[test]
    fn test_failure_log_row_carries_error_and_raw_file() {
        let result = FetchResult::Failure {
            start_date: "2024-01-01".to_string(),
            error: "Status Code: 503".to_string(),
            kind: FailureKind::HttpStatus,
            duration_ms: Some(120),
            raw: Some(RawCapture::Saved(saved_meta())),
        };

        let row = IngestionLogRow::from_result("wind", &result, fixed_now());
        assert_eq!(row.status, FetchStatus::Failure);
        assert_eq!(row.rows, 0);
        assert_eq!(row.error.as_deref(), Some("Status Code: 503"));
        assert_eq!(
            row.raw_file.as_deref(),
            Some("data/raw/wind/start=2024-01-01/response.json.gz")
        );
        assert_eq!(row.duration_ms, Some(120));
    }

    #[test]
    fn test_success_log_row_has_no_error() {
        let mut table = Table::default();
        table.push_record(vec![("timestamp".to_string(), crate::table::Cell::Int(1))]);
        let result = FetchResult::Success {
            start_date: "2024-01-17".to_string(),
            table,
            duration_ms: 40,
            raw: Some(RawCapture::Error("raw payload parse error".to_string())),
        };

        let row = IngestionLogRow::from_result("tides", &result, fixed_now());
        assert_eq!(row.status, FetchStatus::Success);
        assert_eq!(row.rows, 1);
        assert!(row.error.is_none());
        assert!(row.raw_file.is_none(), "capture errors have no raw file");
    }

    #[test]
    fn test_fetch_status_display_matches_log_values() {
        assert_eq!(FetchStatus::Success.to_string(), "success");
        assert_eq!(FetchStatus::Failure.to_string(), "failure");
    }
}
