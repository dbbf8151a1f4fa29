//! Consolidation of fetched windows into one entity table.
//!
//! Timestamps stay UTC epoch seconds in memory (`Cell::Timestamp`); the
//! configured zone is attached when the table is written. The only place
//! the zone matters here is the range-end cut-off, which is a local
//! wall-clock time.

use std::fmt;

use chrono::{NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::entities::{DedupStrategy, EntityProfile, LOCAL_TIME_COLUMN, is_offset_column};
use crate::table::{Cell, Table};

/// Preferred source for the derived local-time column: the aggregate
/// timestamp copied down by record-path flattening, then the plain one.
pub const TIMESTAMP_SOURCES: [&str; 2] = ["total_timestamp", "timestamp"];

fn to_timestamp(cell: &Cell) -> Cell {
    match cell.as_epoch_seconds() {
        Some(secs) => Cell::Timestamp(secs),
        None => Cell::Null,
    }
}

/// Add (or refresh) the local-time column and convert the profile's epoch
/// columns to timestamps. Safe to run again on already-derived data.
pub fn derive_local_time(table: &mut Table, profile: &EntityProfile) {
    match TIMESTAMP_SOURCES.iter().find(|c| table.has_column(c)) {
        Some(source) => {
            let derived: Vec<Cell> = table
                .column(source)
                .unwrap_or_default()
                .into_iter()
                .map(to_timestamp)
                .collect();
            table.set_column(LOCAL_TIME_COLUMN, derived);
        }
        None => debug!("no timestamp column, '{LOCAL_TIME_COLUMN}' not derived"),
    }

    for column in &profile.epoch_columns {
        if !table.map_column(column, to_timestamp) {
            debug!(column = %column, "epoch column absent, left as is");
        }
    }
}

/// Drop duplicates according to the entity's strategy, keeping the first
/// occurrence. Returns the number of rows removed.
pub fn dedup(table: &mut Table, profile: &EntityProfile) -> usize {
    match profile.dedup {
        DedupStrategy::Time => table.dedup_by(&[LOCAL_TIME_COLUMN]),
        DedupStrategy::Anchor => table.dedup_by(&[profile.time_anchor.as_str()]),
        DedupStrategy::Row => table.dedup_excluding(is_offset_column),
    }
}

/// Sort ascending on the time anchor. A missing anchor leaves the order
/// untouched.
pub fn sort(table: &mut Table, profile: &EntityProfile) {
    if !table.sort_by(&profile.time_anchor) {
        warn!(anchor = %profile.time_anchor, "time anchor column missing, table left unsorted");
    }
}

/// Epoch seconds of `end` at 23:59:59 local time in `tz`.
pub fn range_end_epoch(end: NaiveDate, tz: Tz) -> i64 {
    let last_second = end
        .and_hms_opt(23, 59, 59)
        .unwrap_or_else(|| end.and_time(NaiveTime::default()));
    match tz.from_local_datetime(&last_second).latest() {
        Some(local) => local.timestamp(),
        // 23:59:59 skipped by a DST jump: fall back to the naive time as UTC.
        None => last_second.and_utc().timestamp(),
    }
}

/// Drop rows whose anchor lies after `end` 23:59:59 local. Rows without a
/// usable anchor value are dropped as well. Returns rows removed.
pub fn clip_to_range_end(table: &mut Table, profile: &EntityProfile, end: NaiveDate, tz: Tz) -> usize {
    let Some(idx) = table.column_index(&profile.time_anchor) else {
        warn!(anchor = %profile.time_anchor, "time anchor column missing, range filter skipped");
        return 0;
    };
    let limit = range_end_epoch(end, tz);
    table.retain_rows(|row| row[idx].as_epoch_seconds().is_some_and(|t| t <= limit))
}

/// Re-derive, dedup and sort. Used on merged old+new data by repair.
pub fn normalize(table: &mut Table, profile: &EntityProfile) -> usize {
    derive_local_time(table, profile);
    let removed = dedup(table, profile);
    sort(table, profile);
    removed
}

/// Merge successful window tables into one consolidated table bounded to
/// `end`. Input order does not matter.
pub fn consolidate(tables: Vec<Table>, profile: &EntityProfile, end: NaiveDate, tz: Tz) -> Table {
    let mut table = Table::concat(tables);
    let merged = table.num_rows();
    let duplicates = normalize(&mut table, profile);
    let clipped = clip_to_range_end(&mut table, profile, end, tz);
    debug!(merged, duplicates, clipped, kept = table.num_rows(), "consolidated");
    table
}

// ---------------------------------------------------------------------------
// Summary statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    pub rows: usize,
    pub columns: usize,
    pub nulls: usize,
}

impl TableStats {
    pub fn of(table: &Table) -> Self {
        let (rows, columns) = table.shape();
        Self {
            rows,
            columns,
            nulls: table.null_count(),
        }
    }
}

impl fmt::Display for TableStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rows: {} | columns: {} | nulls: {}", self.rows, self.columns, self.nulls)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
