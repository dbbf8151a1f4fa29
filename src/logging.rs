/// Structured logging for the Surfline bronze extractor
///
/// All diagnostics go through `tracing`. `init_logging` installs the
/// process-wide subscriber once: a console layer, plus an ANSI-free file
/// layer when a log file is requested. The returned `LogHandle` owns the
/// file writer and flushes it when dropped, so keep it alive in `main`.
///
/// Window failures are classified before they are logged, so that an empty
/// window (common for far-past or far-future dates) does not look like an
/// outage.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt as tfmt};

use crate::model::FailureKind;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Upstream had nothing for the window; not a fault.
    Expected,
    /// Upstream answered wrongly (status, body); service or token problem.
    Unexpected,
    /// Timeouts and connection errors; may or may not be transient.
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

pub fn classify_failure(kind: FailureKind) -> FailureType {
    match kind {
        FailureKind::NoRecords => FailureType::Expected,
        FailureKind::HttpStatus | FailureKind::Parse | FailureKind::Panicked => FailureType::Unexpected,
        FailureKind::Transport => FailureType::Unknown,
    }
}

/// Log a failed window at a level matching its classification.
pub fn log_window_failure(entity: &str, start_date: &str, kind: FailureKind, message: &str) {
    let failure_type = classify_failure(kind);
    match failure_type {
        FailureType::Expected => {
            debug!(entity, start_date, %failure_type, "window failed: {message}")
        }
        FailureType::Unexpected => {
            error!(entity, start_date, %failure_type, "window failed: {message}")
        }
        FailureType::Unknown => {
            warn!(entity, start_date, %failure_type, "window failed: {message}")
        }
    }
}

// ---------------------------------------------------------------------------
// Run Summary Logging
// ---------------------------------------------------------------------------

pub fn log_run_summary(entity: &str, total: usize, successful: usize, failed: usize) {
    let message = format!("extraction complete: {successful}/{total} windows successful, {failed} failed");
    if failed == 0 {
        info!(entity, "{message}");
    } else if successful == 0 {
        error!(entity, "{message}");
    } else {
        warn!(entity, "{message}");
    }
}

// ---------------------------------------------------------------------------
// Subscriber setup
// ---------------------------------------------------------------------------

/// `logs/etl_<YYYYmmdd_HHMMSS>.log` for the given local time.
pub fn default_log_file(now: DateTime<Local>) -> PathBuf {
    PathBuf::from("logs").join(format!("etl_{}.log", now.format("%Y%m%d_%H%M%S")))
}

/// Log file shared between the subscriber and the `LogHandle`.
#[derive(Clone)]
pub struct SharedLogFile(Arc<Mutex<BufWriter<File>>>);

pub struct SharedLogWriter(Arc<Mutex<BufWriter<File>>>);

impl SharedLogFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self(Arc::new(Mutex::new(BufWriter::new(file)))))
    }

    pub fn flush(&self) -> io::Result<()> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?
            .flush()
    }
}

impl Write for SharedLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?
            .flush()
    }
}

impl<'a> MakeWriter<'a> for SharedLogFile {
    type Writer = SharedLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SharedLogWriter(Arc::clone(&self.0))
    }
}

/// Keeps the log file open for the life of the process.
pub struct LogHandle {
    file: Option<SharedLogFile>,
    path: Option<PathBuf>,
}

impl LogHandle {
    pub fn log_file(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn flush(&self) {
        if let Some(file) = &self.file {
            if let Err(e) = file.flush() {
                eprintln!("Failed to flush log file: {e}");
            }
        }
    }
}

impl Drop for LogHandle {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over
/// `level`. If a subscriber is already installed it is kept.
pub fn init_logging(level: LogLevel, log_file: Option<&Path>) -> io::Result<LogHandle> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("surfline_bronze={},warn", level.as_filter())));

    let file = log_file.map(SharedLogFile::open).transpose()?;
    let file_layer = file
        .clone()
        .map(|writer| tfmt::layer().with_ansi(false).with_writer(writer));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tfmt::layer().with_target(false))
        .with(file_layer)
        .try_init();
    if installed.is_err() {
        eprintln!("Logging already initialised; keeping the existing subscriber");
    }

    Ok(LogHandle {
        file,
        path: log_file.map(Path::to_path_buf),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_log_level_parses_cli_values() {
        assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert_eq!("debug".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(classify_failure(FailureKind::NoRecords), FailureType::Expected);
        assert_eq!(classify_failure(FailureKind::HttpStatus), FailureType::Unexpected);
        assert_eq!(classify_failure(FailureKind::Parse), FailureType::Unexpected);
        assert_eq!(classify_failure(FailureKind::Transport), FailureType::Unknown);
        assert_eq!(classify_failure(FailureKind::Panicked), FailureType::Unexpected);
    }

    #[test]
    fn test_default_log_file_name() {
        let now = Local.with_ymd_and_hms(2024, 5, 1, 8, 30, 5).unwrap();
        assert_eq!(default_log_file(now), PathBuf::from("logs/etl_20240501_083005.log"));
    }

    #[test]
    fn test_shared_log_file_writes_through() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("etl.log");
        let shared = SharedLogFile::open(&path).unwrap();

        let mut writer = shared.make_writer();
        writer.write_all(b"window failed\n").unwrap();
        shared.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "window failed\n");
    }
}
