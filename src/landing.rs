//! Raw payload store (the landing layer).
//!
//! Every captured response is kept as gzip-compressed JSON together with a
//! sidecar describing it:
//!
//! ```text
//! <raw_root>/<entity>/start=<YYYY-MM-DD>/response.json.gz
//! <raw_root>/<entity>/start=<YYYY-MM-DD>/response.meta.json
//! ```
//!
//! Re-saving the same entity and window overwrites both files.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::model::{DATE_FORMAT, ExtractError, RawMeta};

pub const RAW_FILE_NAME: &str = "response.json.gz";
pub const META_FILE_NAME: &str = "response.meta.json";

/// Hex-encoded SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// `YYYY-MM-DD` with digits in the right places and a real calendar date.
pub fn is_strict_date(value: &str) -> bool {
    let bytes = value.as_bytes();
    let shaped = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    shaped && NaiveDate::parse_from_str(value, DATE_FORMAT).is_ok()
}

#[derive(Debug, Clone)]
pub struct RawStore {
    root: PathBuf,
}

impl RawStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_dir(&self, entity: &str, window_start: &str) -> PathBuf {
        self.root.join(entity).join(format!("start={window_start}"))
    }

    /// Land one response body.
    ///
    /// Returns `Ok(None)` without touching the filesystem when
    /// `window_start` is not a strict date: a malformed marker must never
    /// abort extraction.
    pub fn save(
        &self,
        entity: &str,
        window_start: &str,
        payload: &Value,
        status_code: u16,
        duration_ms: u64,
    ) -> Result<Option<RawMeta>, ExtractError> {
        if !is_strict_date(window_start) {
            warn!(entity, window_start, "invalid start date, skipping raw capture for this request");
            return Ok(None);
        }

        let dir = self.partition_dir(entity, window_start);
        fs::create_dir_all(&dir).map_err(|e| ExtractError::io(&dir, e))?;

        let bytes = serde_json::to_vec(payload)?;
        let hash_sha256 = sha256_hex(&bytes);

        let raw_file = dir.join(RAW_FILE_NAME);
        write_gzip(&raw_file, &bytes)?;

        let meta = RawMeta {
            entity: entity.to_string(),
            start_date: window_start.to_string(),
            saved_at_utc: Utc::now().to_rfc3339(),
            status_code,
            hash_sha256,
            raw_file: raw_file.display().to_string(),
            duration_ms,
            records_estimated: None,
        };
        write_sidecar(&meta)?;
        debug!(entity, window_start, bytes = bytes.len(), "raw payload landed");
        Ok(Some(meta))
    }

    /// Decompressed bytes of a landed payload.
    pub fn read_payload(&self, entity: &str, window_start: &str) -> Result<Vec<u8>, ExtractError> {
        read_gzip(&self.partition_dir(entity, window_start).join(RAW_FILE_NAME))
    }

    pub fn load_meta(&self, entity: &str, window_start: &str) -> Result<RawMeta, ExtractError> {
        read_sidecar(&self.partition_dir(entity, window_start).join(META_FILE_NAME))
    }
}

/// Path of the sidecar belonging to `meta.raw_file`.
pub fn sidecar_path(meta: &RawMeta) -> PathBuf {
    Path::new(&meta.raw_file).with_file_name(META_FILE_NAME)
}

/// Write (or rewrite) the human-readable sidecar for `meta`.
pub fn write_sidecar(meta: &RawMeta) -> Result<(), ExtractError> {
    let path = sidecar_path(meta);
    let text = serde_json::to_string_pretty(meta)?;
    fs::write(&path, text).map_err(|e| ExtractError::io(&path, e))
}

pub fn read_sidecar(path: &Path) -> Result<RawMeta, ExtractError> {
    let text = fs::read_to_string(path).map_err(|e| ExtractError::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}

fn write_gzip(path: &Path, bytes: &[u8]) -> Result<(), ExtractError> {
    let file = File::create(path).map_err(|e| ExtractError::io(path, e))?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(bytes).map_err(|e| ExtractError::io(path, e))?;
    encoder.finish().map_err(|e| ExtractError::io(path, e))?;
    Ok(())
}

pub fn read_gzip(path: &Path) -> Result<Vec<u8>, ExtractError> {
    let file = File::open(path).map_err(|e| ExtractError::io(path, e))?;
    let mut decoder = GzDecoder::new(file);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|e| ExtractError::io(path, e))?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
