/// Gap repair: re-fetch one window and merge it into the consolidated
/// table of its entity.
///
/// The merged table is fully re-derived (local time, dedup, sort) rather
/// than patched, so repairing the same window twice rewrites the same
/// table. A failed fetch leaves the existing file untouched.

use std::path::PathBuf;

use chrono::Utc;
use reqwest::blocking::Client;
use tracing::{info, warn};

use crate::config::{Config, RequestParams};
use crate::consolidate::normalize;
use crate::extract::{log_dir, output_path, raw_store};
use crate::ingest::surfline::fetch_window;
use crate::ingestion_log;
use crate::logging::log_window_failure;
use crate::model::{ExtractError, FetchResult, IngestionLogRow, Window};
use crate::parquet_io::{read_table_if_exists, write_table};
use crate::table::Table;
use crate::windows::parse_date;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    pub path: PathBuf,
    /// Rows returned by the repaired window.
    pub fetched_rows: usize,
    /// Rows in the file after the merge.
    pub total_rows: usize,
    /// True when no consolidated file existed before.
    pub created: bool,
}

pub fn repair_window(
    config: &Config,
    client: &Client,
    entity: &str,
    start_date: &str,
) -> Result<RepairOutcome, ExtractError> {
    let window = Window::new(parse_date(start_date)?);
    let spec = config.entity(entity)?;
    info!(entity, start_date, "repairing window");

    let params = RequestParams::for_window(&config.api, &spec, &window);
    let raw = raw_store(config);
    let result = fetch_window(client, &spec, &params, raw.as_ref(), config.api.cooldown());

    let log_row = IngestionLogRow::from_result(entity, &result, Utc::now());
    if let Err(e) = ingestion_log::append(log_dir(config), &[log_row]) {
        warn!(entity, error = %e, "could not record ingestion log");
    }

    let fresh = match result {
        FetchResult::Success { table, .. } => table,
        FetchResult::Failure { start_date, error, kind, .. } => {
            log_window_failure(entity, &start_date, kind, &error);
            warn!(entity, "repair fetch failed, consolidated file not modified");
            return Err(ExtractError::WindowFailed { start_date, error });
        }
    };
    let fetched_rows = fresh.num_rows();
    info!(entity, rows = fetched_rows, "window re-fetched");

    let path = output_path(config, entity);
    let existing = read_table_if_exists(&path)?;
    let created = existing.is_none();
    let mut merged = match existing {
        Some(existing) => {
            info!(entity, path = %path.display(), existing_rows = existing.num_rows(), "merging into existing table");
            Table::concat([existing, fresh])
        }
        None => {
            warn!(entity, path = %path.display(), "consolidated file not found, creating it from this window only");
            fresh
        }
    };

    let removed = normalize(&mut merged, &spec.profile);
    write_table(&merged, &path, config.project.timezone)?;
    info!(
        entity,
        path = %path.display(),
        duplicates = removed,
        total = merged.num_rows(),
        "consolidated table repaired"
    );

    Ok(RepairOutcome {
        path,
        fetched_rows,
        total_rows: merged.num_rows(),
        created,
    })
}
