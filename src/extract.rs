/// Concurrent extraction of one entity over a date range.
///
/// Windows are fetched on a small dedicated pool and their results funnel
/// back through a bounded channel sized to the window count. The receiving
/// loop is the barrier: consolidation starts only after every task has
/// reported (or dropped its sender). Results arrive in completion order,
/// and nothing downstream depends on window order.
///
/// No window failure aborts a run. Failures are logged, listed in the
/// report and written to the ingestion log; the output file is only
/// skipped when no window succeeded at all.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use crossbeam_channel::bounded;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::ThreadPoolBuilder;
use reqwest::blocking::Client;
use tracing::{error, info, warn};

use crate::config::{Config, EntitySpec, RequestParams};
use crate::consolidate::{TableStats, consolidate};
use crate::ingest::surfline::fetch_window;
use crate::ingestion_log;
use crate::landing::RawStore;
use crate::logging::{log_run_summary, log_window_failure};
use crate::model::{ExtractError, FailureKind, FetchResult, IngestionLogRow, Window};
use crate::parquet_io::write_table;
use crate::table::Table;
use crate::windows::windows_between;

/// Failure messages longer than this are cut in the report.
pub const MAX_REPORTED_ERROR_CHARS: usize = 120;

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<output_dir>/surfline_bronze_<entity>.parquet`
pub fn output_path(config: &Config, entity: &str) -> PathBuf {
    config
        .project
        .output_dir
        .join(format!("surfline_bronze_{entity}.parquet"))
}

/// The ingestion log lives with the raw payloads when they are captured,
/// in the landing directory otherwise.
pub fn log_dir(config: &Config) -> &Path {
    if config.project.capture_raw {
        &config.project.raw_dir
    } else {
        &config.project.landing_dir
    }
}

pub fn raw_store(config: &Config) -> Option<RawStore> {
    config
        .project
        .capture_raw
        .then(|| RawStore::new(config.project.raw_dir.clone()))
}

pub fn truncate_error(message: &str) -> String {
    if message.chars().count() > MAX_REPORTED_ERROR_CHARS {
        let cut: String = message.chars().take(MAX_REPORTED_ERROR_CHARS).collect();
        format!("{cut}...")
    } else {
        message.to_string()
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct WindowFailure {
    pub start_date: String,
    pub kind: FailureKind,
    pub error: String,
}

/// Everything one extraction run produced.
#[derive(Debug, Clone)]
pub struct ExtractionReport {
    pub entity: String,
    pub windows: usize,
    pub successes: usize,
    /// Sorted by window start.
    pub failures: Vec<WindowFailure>,
    /// Consolidated table; `None` when no window succeeded.
    pub table: Option<Table>,
    pub stats: Option<TableStats>,
    /// Set only when the output file was written.
    pub output: Option<PathBuf>,
    /// Set only when the ingestion log was updated.
    pub log_path: Option<PathBuf>,
}

impl ExtractionReport {
    pub fn extracted_anything(&self) -> bool {
        self.table.is_some()
    }

    /// Human-readable failure report, one line per failed window.
    pub fn failure_lines(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|f| format!("  - start date: {}, error: {}", f.start_date, truncate_error(&f.error)))
            .collect()
    }

    fn log_failures(&self) {
        if self.failures.is_empty() {
            info!(entity = %self.entity, "no failures detected during extraction");
            return;
        }
        warn!(
            entity = %self.entity,
            "the following windows could not be extracted and need reprocessing:"
        );
        for line in self.failure_lines() {
            warn!(entity = %self.entity, "{line}");
        }
        warn!(
            entity = %self.entity,
            "reprocess them with: surfline_bronze repair {} <start_date>",
            self.entity
        );
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

fn progress_bar(len: usize, entity: &str) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|s| s.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar.set_message(format!("fetching '{entity}'"));
    bar
}

/// Run one fetch task, turning a panic into a failed window so every
/// task reports exactly one result.
pub fn guarded<F>(start_date: String, fetch: F) -> FetchResult
where
    F: FnOnce() -> FetchResult,
{
    match panic::catch_unwind(AssertUnwindSafe(fetch)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(start_date = %start_date, "fetch task panicked: {message}");
            FetchResult::Failure {
                start_date,
                error: format!("fetch task panicked: {message}"),
                kind: FailureKind::Panicked,
                duration_ms: None,
                raw: None,
            }
        }
    }
}

/// Fetch every window on a pool of `config.project.workers` threads and
/// wait for all of them. Returned in completion order.
pub fn fetch_all(
    config: &Config,
    client: &Client,
    spec: &EntitySpec,
    windows: Vec<Window>,
) -> Result<Vec<FetchResult>, ExtractError> {
    let expected = windows.len();
    if expected == 0 {
        return Ok(Vec::new());
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(config.project.workers)
        .thread_name(|i| format!("fetch-{i}"))
        .build()?;

    let (sender, receiver) = bounded::<FetchResult>(expected);
    let spec = Arc::new(spec.clone());
    let raw = raw_store(config);
    let cooldown = config.api.cooldown();

    for window in windows {
        let params = RequestParams::for_window(&config.api, &spec, &window);
        let start_date = params.start().to_string();
        let sender = sender.clone();
        let client = client.clone();
        let spec = Arc::clone(&spec);
        let raw = raw.clone();
        pool.spawn(move || {
            let result = guarded(start_date, || {
                fetch_window(&client, &spec, &params, raw.as_ref(), cooldown)
            });
            // Capacity equals the task count, so this never blocks; a closed
            // receiver only happens if the collector is already gone.
            let _ = sender.send(result);
        });
    }
    drop(sender);

    let progress = progress_bar(expected, &spec.name);
    let mut results = Vec::with_capacity(expected);
    for result in receiver.iter() {
        progress.inc(1);
        results.push(result);
    }
    progress.finish_and_clear();

    Ok(results)
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract `entity` for `start..=end`, write its consolidated table and
/// append the ingestion log.
///
/// Errors are limited to setup problems (unknown entity, bad stride, pool
/// creation). Persistence faults are logged as warnings and reflected as
/// `None` paths in the report.
pub fn extract_entity(
    config: &Config,
    client: &Client,
    entity: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<ExtractionReport, ExtractError> {
    info!(entity, %start, %end, "starting concurrent extraction");
    let spec = config.entity(entity)?;
    let windows: Vec<Window> = windows_between(start, end, config.project.window_days)?.collect();
    let window_count = windows.len();

    let results = fetch_all(config, client, &spec, windows)?;

    let ingested_at = Utc::now();
    let mut tables = Vec::new();
    let mut failures = Vec::new();
    let mut log_rows = Vec::with_capacity(results.len());
    for result in results {
        log_rows.push(IngestionLogRow::from_result(entity, &result, ingested_at));
        match result {
            FetchResult::Success { table, .. } => tables.push(table),
            FetchResult::Failure { start_date, error, kind, .. } => {
                log_window_failure(entity, &start_date, kind, &error);
                failures.push(WindowFailure { start_date, kind, error });
            }
        }
    }
    failures.sort_by(|a, b| a.start_date.cmp(&b.start_date));
    let successes = tables.len();
    log_run_summary(entity, log_rows.len(), successes, failures.len());

    let mut report = ExtractionReport {
        entity: entity.to_string(),
        windows: window_count,
        successes,
        failures,
        table: None,
        stats: None,
        output: None,
        log_path: None,
    };

    if tables.is_empty() {
        warn!(entity, "no data was extracted successfully");
    } else {
        info!(entity, windows = successes, "consolidating");
        let table = consolidate(tables, &spec.profile, end, config.project.timezone);
        let path = output_path(config, entity);
        match write_table(&table, &path, config.project.timezone) {
            Ok(()) => {
                info!(entity, path = %path.display(), "consolidated table saved");
                report.output = Some(path);
            }
            Err(e) => warn!(entity, path = %path.display(), error = %e, "could not write consolidated table"),
        }
        let stats = TableStats::of(&table);
        info!(entity, "summary -> {stats}");
        report.stats = Some(stats);
        report.table = Some(table);
    }

    report.log_failures();

    if !log_rows.is_empty() {
        match ingestion_log::append(log_dir(config), &log_rows) {
            Ok(path) => report.log_path = Some(path),
            Err(e) => warn!(entity, error = %e, "could not record ingestion log"),
        }
    }

    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
