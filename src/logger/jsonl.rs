//! JSONL activity log: one self-contained JSON object per line.
//!
//! Lines are assembled in memory and written with a single `write_all` so a
//! reader tailing the file never sees a partial line.
//!
//! Degradation chain:
//! 1. Primary file path
//! 2. stderr with `[VIC-JSONL]` prefix
//! 3. Silent discard (a scan never fails because its activity log did)

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, VicError};
use crate::core::paths::ensure_parent_dir;
use crate::scanner::aggregate::ScanReport;
use crate::scanner::model::{OutcomeCounts, ScanResult};

/// Severity level for activity events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ScanStart,
    FileScanned,
    ScanComplete,
    ScanInterrupted,
    HistoryWriteFailed,
}

/// A single JSONL line. Everything except `ts`, `event` and `severity` is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp with millisecond precision.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preliminary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovered: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanned: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<OutcomeCounts>,
    /// Hex FNV-1a hash of the effective configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// First diagnostic line or other freeform detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            root: None,
            path: None,
            outcome: None,
            preliminary: None,
            mode: None,
            worker: None,
            duration_ms: None,
            discovered: None,
            skipped: None,
            scanned: None,
            cancelled: None,
            counts: None,
            config_hash: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    pub fn scan_start(root: &Path, config_hash: &str) -> Self {
        let mut entry = Self::new(EventType::ScanStart, Severity::Info);
        entry.root = Some(root.display().to_string());
        entry.config_hash = Some(config_hash.to_string());
        entry
    }

    pub fn file_scanned(result: &ScanResult) -> Self {
        let severity = if result.outcome.is_healthy() {
            Severity::Info
        } else {
            Severity::Warning
        };
        let mut entry = Self::new(EventType::FileScanned, severity);
        entry.path = Some(result.path().display().to_string());
        entry.outcome = Some(result.outcome.kind().to_string());
        entry.preliminary = result
            .preliminary
            .as_ref()
            .map(|outcome| outcome.kind().to_string());
        entry.mode = Some(result.mode.to_string());
        entry.worker = Some(result.worker.to_string());
        entry.duration_ms = Some(duration_ms(result.elapsed));
        entry.details = result.outcome.detail();
        entry
    }

    /// `scan_complete`, or `scan_interrupted` when tasks were cancelled.
    pub fn scan_finished(root: &Path, report: &ScanReport) -> Self {
        let (event, severity) = if report.interrupted() {
            (EventType::ScanInterrupted, Severity::Warning)
        } else {
            (EventType::ScanComplete, Severity::Info)
        };
        let summary = &report.summary;
        let mut entry = Self::new(event, severity);
        entry.root = Some(root.display().to_string());
        entry.discovered = Some(summary.total_discovered);
        entry.skipped = Some(summary.total_skipped);
        entry.scanned = Some(summary.total_scanned);
        entry.cancelled = Some(summary.cancelled);
        entry.counts = Some(summary.counts);
        entry.duration_ms = Some(duration_ms(summary.wall_clock));
        entry
    }

    pub fn history_write_failed(root: &Path, message: &str) -> Self {
        let mut entry = Self::new(EventType::HistoryWriteFailed, Severity::Critical);
        entry.root = Some(root.display().to_string());
        entry.error_code = extract_code(message);
        entry.error_message = Some(message.to_string());
        entry
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Normal,
    Stderr,
    Discard,
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Rotate once the file would grow past this. Default: 16 MiB.
    pub max_size_bytes: u64,
    /// Rotated files kept next to the primary. Default: 3.
    pub max_rotated_files: u32,
    /// Seconds between forced fsync calls. Default: 10.
    pub fsync_interval_secs: u64,
}

impl JsonlConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 10,
        }
    }
}

/// Append-only JSONL writer with rotation and fallback.
pub struct JsonlWriter {
    config: JsonlConfig,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    bytes_written: u64,
    last_fsync: Instant,
}

impl JsonlWriter {
    /// Open the log file, degrading to stderr on failure.
    pub fn open(config: JsonlConfig) -> Self {
        let mut w = Self {
            config,
            writer: None,
            state: WriterState::Discard,
            bytes_written: 0,
            last_fsync: Instant::now(),
        };
        match open_append(&w.config.path) {
            Ok((file, size)) => {
                w.writer = Some(BufWriter::with_capacity(64 * 1024, file));
                w.state = WriterState::Normal;
                w.bytes_written = size;
            }
            Err(e) => {
                w.state = WriterState::Stderr;
                let _ = writeln!(io::stderr(), "[VIC-JSONL] {e}; using stderr");
            }
        }
        w
    }

    /// Write a single entry as one JSONL line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(json) => format!("{json}\n"),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[VIC-JSONL] serialize error: {e}");
                return;
            }
        };
        self.write_line(&line);
    }

    /// Everything a finished run produced: one line per scanned file, a
    /// history failure if there was one, then the closing summary.
    pub fn write_report(&mut self, root: &Path, report: &ScanReport) {
        for result in &report.results {
            self.write_entry(&LogEntry::file_scanned(result));
        }
        if let Some(message) = &report.history_error {
            self.write_entry(&LogEntry::history_write_failed(root, message));
        }
        self.write_entry(&LogEntry::scan_finished(root, report));
        self.flush();
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    pub fn fsync(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
            let _ = w.get_ref().sync_data();
            self.last_fsync = Instant::now();
        }
    }

    /// Current degradation state.
    pub fn state(&self) -> &str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn write_line(&mut self, line: &str) {
        if self.state == WriterState::Normal
            && self.bytes_written + line.len() as u64 > self.config.max_size_bytes
        {
            self.rotate();
        }

        match self.state {
            WriterState::Normal => {
                let Some(w) = self.writer.as_mut() else {
                    self.degrade();
                    self.write_line(line);
                    return;
                };
                if w.write_all(line.as_bytes()).is_err() {
                    self.degrade();
                    self.write_line(line);
                    return;
                }
                self.bytes_written += line.len() as u64;
                if self.last_fsync.elapsed() >= Duration::from_secs(self.config.fsync_interval_secs)
                {
                    self.fsync();
                }
            }
            WriterState::Stderr => {
                if write!(io::stderr(), "[VIC-JSONL] {line}").is_err() {
                    self.degrade();
                }
            }
            WriterState::Discard => {}
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        self.state = match self.state {
            WriterState::Normal => {
                let _ = writeln!(io::stderr(), "[VIC-JSONL] log write failed, using stderr");
                WriterState::Stderr
            }
            WriterState::Stderr | WriterState::Discard => WriterState::Discard,
        };
    }

    fn rotate(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
        self.writer = None;

        let base = self.config.path.clone();
        // .N is dropped, .N-1 → .N, …, current → .1
        let _ = fs::remove_file(rotated_name(&base, self.config.max_rotated_files));
        for i in (1..self.config.max_rotated_files).rev() {
            let _ = rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        if self.config.max_rotated_files > 0 {
            let _ = rename(&base, rotated_name(&base, 1));
        } else {
            let _ = fs::remove_file(&base);
        }

        match open_append(&base) {
            Ok((file, _)) => {
                self.writer = Some(BufWriter::with_capacity(64 * 1024, file));
                self.bytes_written = 0;
            }
            Err(_) => self.degrade(),
        }
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Open or create a file for appending. Returns `(File, current_size)`.
fn open_append(path: &Path) -> Result<(File, u64)> {
    ensure_parent_dir(path)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| VicError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// `foo.jsonl` → `foo.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

/// Pull `VIC-NNNN` out of a rendered error message.
fn extract_code(message: &str) -> Option<String> {
    let start = message.find("[VIC-")? + 1;
    let end = start + message[start..].find(']')?;
    Some(message[start..end].to_string())
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
