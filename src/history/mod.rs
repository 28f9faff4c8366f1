//! Scan history: what each file looked like the last time it was analysed.
//!
//! The engine reads the store before a run (incremental filtering) and writes
//! one batch after it. Workers never touch it.

#![allow(missing_docs)]

#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

use crate::core::errors::Result;
use crate::scanner::model::{OutcomeCounts, OutcomeKind, ScanResult};

/// Last known state of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanHistoryRecord {
    pub path: PathBuf,
    pub last_scan_time: DateTime<Utc>,
    pub last_outcome: OutcomeKind,
    /// Modification time captured at discovery for the scan that wrote this record.
    pub file_modified_at_scan: SystemTime,
}

impl ScanHistoryRecord {
    pub fn from_result(result: &ScanResult) -> Self {
        Self {
            path: result.file.path.clone(),
            last_scan_time: result.timestamp,
            last_outcome: result.outcome.kind(),
            file_modified_at_scan: result.file.modified,
        }
    }
}

/// Aggregate view of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryStats {
    pub total_records: usize,
    pub by_outcome: OutcomeCounts,
    pub oldest_scan: Option<DateTime<Utc>>,
    pub newest_scan: Option<DateTime<Utc>>,
}

/// Persistent per-path scan history.
pub trait HistoryStore {
    fn get(&self, path: &Path) -> Result<Option<ScanHistoryRecord>>;

    /// Insert or replace records by path. Returns the number written.
    fn upsert_batch(&mut self, records: &[ScanHistoryRecord]) -> Result<usize>;

    fn stats(&self) -> Result<HistoryStats>;

    /// Whether writes survive the process.
    fn is_durable(&self) -> bool {
        true
    }
}

/// Volatile store for tests and degraded runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistoryStore {
    records: BTreeMap<PathBuf, ScanHistoryRecord>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn get(&self, path: &Path) -> Result<Option<ScanHistoryRecord>> {
        Ok(self.records.get(path).cloned())
    }

    fn upsert_batch(&mut self, records: &[ScanHistoryRecord]) -> Result<usize> {
        for record in records {
            self.records.insert(record.path.clone(), record.clone());
        }
        Ok(records.len())
    }

    fn stats(&self) -> Result<HistoryStats> {
        let mut stats = HistoryStats {
            total_records: self.records.len(),
            ..HistoryStats::default()
        };
        for record in self.records.values() {
            stats.by_outcome.record(record.last_outcome);
            let at = record.last_scan_time;
            stats.oldest_scan = Some(stats.oldest_scan.map_or(at, |t| t.min(at)));
            stats.newest_scan = Some(stats.newest_scan.map_or(at, |t| t.max(at)));
        }
        Ok(stats)
    }

    fn is_durable(&self) -> bool {
        false
    }
}

/// Open the SQLite store at `path`, or fall back to an empty in-memory store
/// when it cannot be opened or validated. The error is returned alongside so
/// callers can report it.
#[cfg(feature = "sqlite")]
pub fn open_or_degrade(
    path: &Path,
) -> (Box<dyn HistoryStore>, Option<crate::core::errors::VicError>) {
    match sqlite::SqliteHistoryStore::open(path) {
        Ok(store) => (Box::new(store), None),
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                code = error.code(),
                %error,
                "scan history unavailable, treating every file as never scanned"
            );
            (Box::new(MemoryHistoryStore::new()), Some(error))
        }
    }
}

/// Nanoseconds since the epoch, negative before it, saturating at the i64 range.
pub fn system_time_to_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_nanos()).map_or(i64::MIN, |n| -n),
    }
}

pub fn nanos_to_system_time(nanos: i64) -> SystemTime {
    let magnitude = Duration::from_nanos(nanos.unsigned_abs());
    if nanos >= 0 {
        UNIX_EPOCH + magnitude
    } else {
        UNIX_EPOCH - magnitude
    }
}
