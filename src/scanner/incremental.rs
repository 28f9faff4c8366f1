//! Incremental re-scan decisions.
//!
//! A file is skipped only when its history says it was healthy, unchanged,
//! and checked recently enough. Everything else is scanned again.

#![allow(missing_docs)]

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::history::{HistoryStore, ScanHistoryRecord};
use crate::scanner::model::{OutcomeKind, VideoFile};

/// When history may be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementalPolicy {
    pub enabled: bool,
    /// Healthy records older than this are re-verified.
    pub max_age: Duration,
}

impl Default for IncrementalPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age: Duration::from_secs(7 * 24 * 3_600),
        }
    }
}

/// Why a file is being scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanReason {
    IncrementalDisabled,
    NoHistory,
    Modified,
    Stale,
    PreviouslyUnhealthy,
}

impl fmt::Display for ScanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::IncrementalDisabled => "incremental disabled",
            Self::NoHistory => "no history",
            Self::Modified => "modified since last scan",
            Self::Stale => "last scan too old",
            Self::PreviouslyUnhealthy => "previously unhealthy",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDecision {
    Scan(ScanReason),
    Skip,
}

impl ScanDecision {
    pub const fn should_scan(self) -> bool {
        matches!(self, Self::Scan(_))
    }
}

/// Decide whether `file` needs analysis given its history record.
///
/// A record timestamp in the future counts as age zero.
pub fn decide(
    file: &VideoFile,
    record: Option<&ScanHistoryRecord>,
    policy: &IncrementalPolicy,
    now: DateTime<Utc>,
) -> ScanDecision {
    if !policy.enabled {
        return ScanDecision::Scan(ScanReason::IncrementalDisabled);
    }
    let Some(record) = record else {
        return ScanDecision::Scan(ScanReason::NoHistory);
    };
    if record.file_modified_at_scan != file.modified {
        return ScanDecision::Scan(ScanReason::Modified);
    }
    let age = (now - record.last_scan_time).to_std().unwrap_or(Duration::ZERO);
    if age > policy.max_age {
        return ScanDecision::Scan(ScanReason::Stale);
    }
    if record.last_outcome != OutcomeKind::Healthy {
        return ScanDecision::Scan(ScanReason::PreviouslyUnhealthy);
    }
    ScanDecision::Skip
}

/// Binds a store, a policy and a fixed `now` for one run.
pub struct IncrementalFilter<'a> {
    store: &'a dyn HistoryStore,
    policy: IncrementalPolicy,
    now: DateTime<Utc>,
}

impl<'a> IncrementalFilter<'a> {
    pub fn new(store: &'a dyn HistoryStore, policy: IncrementalPolicy, now: DateTime<Utc>) -> Self {
        Self { store, policy, now }
    }

    /// Decision for one file. Lookup errors count as missing history.
    pub fn decision(&self, file: &VideoFile) -> ScanDecision {
        if !self.policy.enabled {
            return ScanDecision::Scan(ScanReason::IncrementalDisabled);
        }
        let record = match self.store.get(&file.path) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(
                    path = %file.path.display(),
                    code = error.code(),
                    %error,
                    "history lookup failed, scanning file"
                );
                None
            }
        };
        decide(file, record.as_ref(), &self.policy, self.now)
    }

    pub fn should_scan(&self, file: &VideoFile) -> bool {
        self.decision(file).should_scan()
    }

    /// Split files into `(to_scan, skipped)`, preserving order.
    pub fn partition<I>(&self, files: I) -> (Vec<VideoFile>, Vec<VideoFile>)
    where
        I: IntoIterator<Item = VideoFile>,
    {
        let mut to_scan = Vec::new();
        let mut skipped = Vec::new();
        for file in files {
            match self.decision(&file) {
                ScanDecision::Scan(reason) => {
                    tracing::debug!(path = %file.path.display(), %reason, "selected for scan");
                    to_scan.push(file);
                }
                ScanDecision::Skip => {
                    tracing::debug!(path = %file.path.display(), "skipped, recently healthy");
                    skipped.push(file);
                }
            }
        }
        (to_scan, skipped)
    }
}
