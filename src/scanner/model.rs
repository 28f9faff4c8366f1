//! Plain data shared by every stage of a scan run.
//!
//! Everything here is immutable once built: discovery snapshots a file into a
//! [`VideoFile`], the engine wraps it in a [`ScanTask`], a worker turns the task
//! into exactly one [`ScanResult`], and the aggregator folds results into a
//! [`ScanSummary`].

#![allow(missing_docs)]

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scanner::mode::{Pass, ScanMode};

/// A candidate media file as seen at discovery time.
///
/// `modified` is the snapshot used for staleness checks; later changes to the
/// file on disk do not update it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

impl VideoFile {
    pub fn from_metadata(path: PathBuf, meta: &fs::Metadata) -> Self {
        Self {
            path,
            size_bytes: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }

    pub fn extension(&self) -> Option<String> {
        crate::core::paths::extension_lowercase(&self.path)
    }
}

/// Per-pass timeouts carried by each task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTimeouts {
    pub quick: Duration,
    pub deep: Duration,
}

impl ModeTimeouts {
    pub const fn for_pass(&self, pass: Pass) -> Duration {
        match pass {
            Pass::Quick => self.quick,
            Pass::Deep => self.deep,
        }
    }
}

impl Default for ModeTimeouts {
    fn default() -> Self {
        Self {
            quick: Duration::from_secs(60),
            deep: Duration::from_secs(3_600),
        }
    }
}

/// One unit of work for the pool. `sequence` is unique within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTask {
    pub file: VideoFile,
    pub mode: ScanMode,
    pub timeouts: ModeTimeouts,
    pub sequence: u64,
}

/// Field-less discriminant of [`ScanOutcome`], used for counting and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Healthy,
    Corrupt,
    TimedOut,
    ExecutionError,
}

impl OutcomeKind {
    pub const ALL: [Self; 4] = [
        Self::Healthy,
        Self::Corrupt,
        Self::TimedOut,
        Self::ExecutionError,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Corrupt => "corrupt",
            Self::TimedOut => "timed_out",
            Self::ExecutionError => "execution_error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of one analysis of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanOutcome {
    Healthy,
    Corrupt { diagnostics: Vec<String> },
    TimedOut,
    ExecutionError { message: String },
}

impl ScanOutcome {
    pub const fn kind(&self) -> OutcomeKind {
        match self {
            Self::Healthy => OutcomeKind::Healthy,
            Self::Corrupt { .. } => OutcomeKind::Corrupt,
            Self::TimedOut => OutcomeKind::TimedOut,
            Self::ExecutionError { .. } => OutcomeKind::ExecutionError,
        }
    }

    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Diagnostic lines for corrupt outcomes; empty otherwise.
    pub fn diagnostics(&self) -> &[String] {
        match self {
            Self::Corrupt { diagnostics } => diagnostics,
            _ => &[],
        }
    }

    /// One-line human description, used by the CLI and the activity log.
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Healthy | Self::TimedOut => None,
            Self::Corrupt { diagnostics } => diagnostics.first().cloned(),
            Self::ExecutionError { message } => Some(message.clone()),
        }
    }
}

/// Identifies the worker thread that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl WorkerId {
    /// Results synthesised by the pool itself rather than a worker.
    pub const COORDINATOR: Self = Self(usize::MAX);
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::COORDINATOR {
            f.write_str("coordinator")
        } else {
            write!(f, "worker-{}", self.0)
        }
    }
}

/// Final record for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub file: VideoFile,
    pub outcome: ScanOutcome,
    pub mode: ScanMode,
    pub elapsed: Duration,
    pub worker: WorkerId,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    /// Quick-pass outcome when a hybrid scan escalated to a deep pass.
    pub preliminary: Option<ScanOutcome>,
}

impl ScanResult {
    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

/// Per-kind tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub healthy: usize,
    pub corrupt: usize,
    pub timed_out: usize,
    pub execution_error: usize,
}

impl OutcomeCounts {
    pub const fn record(&mut self, kind: OutcomeKind) {
        self.add(kind, 1);
    }

    pub const fn add(&mut self, kind: OutcomeKind, count: usize) {
        match kind {
            OutcomeKind::Healthy => self.healthy += count,
            OutcomeKind::Corrupt => self.corrupt += count,
            OutcomeKind::TimedOut => self.timed_out += count,
            OutcomeKind::ExecutionError => self.execution_error += count,
        }
    }

    pub const fn get(&self, kind: OutcomeKind) -> usize {
        match kind {
            OutcomeKind::Healthy => self.healthy,
            OutcomeKind::Corrupt => self.corrupt,
            OutcomeKind::TimedOut => self.timed_out,
            OutcomeKind::ExecutionError => self.execution_error,
        }
    }

    pub const fn total(&self) -> usize {
        self.healthy + self.corrupt + self.timed_out + self.execution_error
    }

    /// Files that did not come back healthy.
    pub const fn unhealthy(&self) -> usize {
        self.total() - self.healthy
    }
}

/// Run-level totals.
///
/// `total_discovered == total_skipped + total_scanned + cancelled` for every
/// run that was not aborted by a fatal error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub total_discovered: usize,
    pub total_skipped: usize,
    pub total_scanned: usize,
    pub counts: OutcomeCounts,
    pub cancelled: usize,
    pub wall_clock: Duration,
}
