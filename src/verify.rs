//! Landing Layer Verification Module
//!
//! Re-reads every landed payload under the raw directory, re-hashes the
//! decompressed bytes and compares them with the SHA-256 recorded in the
//! sidecar. Use this before replaying raw payloads or after moving the
//! landing directory around.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::landing::{META_FILE_NAME, RAW_FILE_NAME, read_gzip, read_sidecar, sha256_hex};
use crate::model::ExtractError;

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub raw_dir: String,
    pub results: Vec<PayloadVerification>,
    pub summary: VerificationSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub verified: usize,
    pub hash_mismatch: usize,
    pub missing: usize,
    pub unreadable: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadVerification {
    pub entity: String,
    pub partition: String,
    pub status: VerificationStatus,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VerificationStatus {
    Verified,
    HashMismatch,
    /// Payload or sidecar absent from the partition.
    Missing,
    /// Present but not decodable (bad gzip, bad sidecar JSON).
    Unreadable,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.summary.verified == self.summary.total
    }
}

// ============================================================================
// Verification
// ============================================================================

/// Check a single `start=<date>` partition directory.
pub fn verify_partition(entity: &str, dir: &Path) -> PayloadVerification {
    let partition = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut result = PayloadVerification {
        entity: entity.to_string(),
        partition,
        status: VerificationStatus::Missing,
        expected_hash: None,
        actual_hash: None,
        error_message: None,
    };

    let meta_path = dir.join(META_FILE_NAME);
    let raw_path = dir.join(RAW_FILE_NAME);
    for required in [&meta_path, &raw_path] {
        if !required.exists() {
            result.error_message = Some(format!("{} not found", required.display()));
            return result;
        }
    }

    let meta = match read_sidecar(&meta_path) {
        Ok(meta) => meta,
        Err(e) => {
            result.status = VerificationStatus::Unreadable;
            result.error_message = Some(e.to_string());
            return result;
        }
    };
    result.expected_hash = Some(meta.hash_sha256.clone());

    match read_gzip(&raw_path) {
        Ok(bytes) => {
            let actual = sha256_hex(&bytes);
            result.status = if actual == meta.hash_sha256 {
                VerificationStatus::Verified
            } else {
                VerificationStatus::HashMismatch
            };
            result.actual_hash = Some(actual);
        }
        Err(e) => {
            result.status = VerificationStatus::Unreadable;
            result.error_message = Some(e.to_string());
        }
    }
    result
}

fn sorted_dirs(dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| ExtractError::io(dir, e))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// Verify every `<raw_dir>/<entity>/start=<date>/` partition.
pub fn verify_landing(raw_dir: &Path) -> Result<VerificationReport, ExtractError> {
    let mut results = Vec::new();

    if raw_dir.exists() {
        for entity_dir in sorted_dirs(raw_dir)? {
            let entity = entity_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            for partition in sorted_dirs(&entity_dir)? {
                let is_partition = partition
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("start="));
                if !is_partition {
                    continue;
                }
                let verification = verify_partition(&entity, &partition);
                if verification.status != VerificationStatus::Verified {
                    warn!(
                        entity = %verification.entity,
                        partition = %verification.partition,
                        status = ?verification.status,
                        "raw payload failed verification"
                    );
                }
                results.push(verification);
            }
        }
    } else {
        debug!(raw_dir = %raw_dir.display(), "raw directory does not exist, nothing to verify");
    }

    let mut summary = VerificationSummary {
        total: results.len(),
        ..Default::default()
    };
    for r in &results {
        match r.status {
            VerificationStatus::Verified => summary.verified += 1,
            VerificationStatus::HashMismatch => summary.hash_mismatch += 1,
            VerificationStatus::Missing => summary.missing += 1,
            VerificationStatus::Unreadable => summary.unreadable += 1,
        }
    }

    Ok(VerificationReport {
        timestamp: Utc::now().to_rfc3339(),
        raw_dir: raw_dir.display().to_string(),
        results,
        summary,
    })
}

pub fn print_summary(report: &VerificationReport) {
    println!("\n===============================================================");
    println!("RAW LANDING VERIFICATION SUMMARY");
    println!("===============================================================");
    println!();
    println!("Raw directory:   {}", report.raw_dir);
    println!("Payloads:        {}", report.summary.total);
    println!("Verified:        {}", report.summary.verified);
    println!("Hash mismatch:   {}", report.summary.hash_mismatch);
    println!("Missing files:   {}", report.summary.missing);
    println!("Unreadable:      {}", report.summary.unreadable);
    println!();

    for r in report.results.iter().filter(|r| r.status != VerificationStatus::Verified) {
        println!(
            "  {:?}: {}/{} {}",
            r.status,
            r.entity,
            r.partition,
            r.error_message.as_deref().unwrap_or("")
        );
    }

    let success_rate = if report.summary.total > 0 {
        (report.summary.verified as f64 / report.summary.total as f64) * 100.0
    } else {
        100.0
    };
    println!("Overall: {:.1}% verified ({}/{})", success_rate, report.summary.verified, report.summary.total);
    println!("===============================================================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landing::RawStore;
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_clean_landing_verifies() {
        let tmp = TempDir::new().unwrap();
        let store = RawStore::new(tmp.path());
        store.save("wind", "2024-01-01", &json!({"data": {"wind": []}}), 200, 10).unwrap();
        store.save("tides", "2024-01-01", &json!({"data": {"tides": []}}), 200, 10).unwrap();

        let report = verify_landing(tmp.path()).unwrap();
        assert_eq!(report.summary.total, 2);
        assert!(report.is_clean());
        assert_eq!(report.results[0].entity, "tides", "entities are visited in sorted order");
    }

    #[test]
    fn test_tampered_payload_is_a_hash_mismatch() {
        let tmp = TempDir::new().unwrap();
        let store = RawStore::new(tmp.path());
        store.save("wind", "2024-01-01", &json!({"v": 1}), 200, 10).unwrap();

        let raw = store.partition_dir("wind", "2024-01-01").join(RAW_FILE_NAME);
        let mut encoder = flate2::write::GzEncoder::new(fs::File::create(&raw).unwrap(), flate2::Compression::default());
        encoder.write_all(br#"{"v":2}"#).unwrap();
        encoder.finish().unwrap();

        let report = verify_landing(tmp.path()).unwrap();
        assert_eq!(report.summary.hash_mismatch, 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_missing_payload_and_garbage_gzip() {
        let tmp = TempDir::new().unwrap();
        let store = RawStore::new(tmp.path());
        store.save("wind", "2024-01-01", &json!({"v": 1}), 200, 10).unwrap();
        store.save("wind", "2024-01-17", &json!({"v": 1}), 200, 10).unwrap();

        fs::remove_file(store.partition_dir("wind", "2024-01-01").join(RAW_FILE_NAME)).unwrap();
        fs::write(store.partition_dir("wind", "2024-01-17").join(RAW_FILE_NAME), b"not gzip").unwrap();

        let report = verify_landing(tmp.path()).unwrap();
        assert_eq!(report.summary.missing, 1);
        assert_eq!(report.summary.unreadable, 1);
    }

    #[test]
    fn test_nonexistent_raw_dir_is_empty_report() {
        let tmp = TempDir::new().unwrap();
        let report = verify_landing(&tmp.path().join("nope")).unwrap();
        assert_eq!(report.summary, VerificationSummary::default());
        assert!(report.is_clean());
    }
}
