//! Folds pool events into the run report and writes history once.

#![allow(missing_docs)]

use std::time::Instant;

use crate::history::{HistoryStore, ScanHistoryRecord};
use crate::scanner::model::{OutcomeCounts, ScanResult, ScanSummary, ScanTask};
use crate::scanner::pool::PoolEvent;

/// Everything a caller gets back from a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub summary: ScanSummary,
    /// Sorted by sequence id.
    pub results: Vec<ScanResult>,
    /// Tasks that never completed because the run was interrupted.
    pub cancelled: Vec<ScanTask>,
    pub history_persisted: bool,
    pub history_error: Option<String>,
}

impl ScanReport {
    pub fn interrupted(&self) -> bool {
        !self.cancelled.is_empty()
    }

    /// Results that did not come back healthy.
    pub fn unhealthy(&self) -> impl Iterator<Item = &ScanResult> {
        self.results.iter().filter(|r| !r.outcome.is_healthy())
    }
}

/// Accumulates one run's events.
#[derive(Debug)]
pub struct ResultAggregator {
    total_discovered: usize,
    total_skipped: usize,
    started: Instant,
    counts: OutcomeCounts,
    results: Vec<ScanResult>,
    cancelled: Vec<ScanTask>,
}

impl ResultAggregator {
    pub fn new(total_discovered: usize, total_skipped: usize, started: Instant) -> Self {
        Self {
            total_discovered,
            total_skipped,
            started,
            counts: OutcomeCounts::default(),
            results: Vec::new(),
            cancelled: Vec::new(),
        }
    }

    pub fn record(&mut self, event: PoolEvent) {
        match event {
            PoolEvent::Finished(result) => {
                self.counts.record(result.outcome.kind());
                self.results.push(result);
            }
            PoolEvent::Cancelled(task) => self.cancelled.push(task),
        }
    }

    pub const fn counts(&self) -> &OutcomeCounts {
        &self.counts
    }

    /// One record per finished result. Cancelled and skipped files are left alone.
    pub fn history_records(&self) -> Vec<ScanHistoryRecord> {
        self.results.iter().map(ScanHistoryRecord::from_result).collect()
    }

    /// Persist history in one batch and build the report. A failed write is
    /// logged and reported, never propagated.
    pub fn finish(mut self, store: &mut dyn HistoryStore) -> ScanReport {
        let records = self.history_records();
        let (history_persisted, history_error) = if records.is_empty() {
            (true, None)
        } else {
            match store.upsert_batch(&records) {
                Ok(written) => {
                    tracing::debug!(written, "scan history updated");
                    (true, None)
                }
                Err(error) => {
                    tracing::warn!(
                        code = error.code(),
                        %error,
                        records = records.len(),
                        "failed to persist scan history"
                    );
                    (false, Some(error.to_string()))
                }
            }
        };

        self.results.sort_by_key(|r| r.sequence);
        self.cancelled.sort_by_key(|t| t.sequence);

        let summary = ScanSummary {
            total_discovered: self.total_discovered,
            total_skipped: self.total_skipped,
            total_scanned: self.results.len(),
            counts: self.counts,
            cancelled: self.cancelled.len(),
            wall_clock: self.started.elapsed(),
        };

        ScanReport {
            summary,
            results: self.results,
            cancelled: self.cancelled,
            history_persisted,
            history_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::{Result, VicError};
    use crate::history::{HistoryStats, MemoryHistoryStore};
    use crate::scanner::mode::ScanMode;
    use crate::scanner::model::{ModeTimeouts, OutcomeKind, ScanOutcome, VideoFile, WorkerId};
    use chrono::Utc;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, UNIX_EPOCH};

    fn task(sequence: u64) -> ScanTask {
        ScanTask {
            file: VideoFile {
                path: PathBuf::from(format!("/m/{sequence}.mkv")),
                size_bytes: 1,
                modified: UNIX_EPOCH + Duration::from_secs(sequence),
            },
            mode: ScanMode::Quick,
            timeouts: ModeTimeouts::default(),
            sequence,
        }
    }

    fn finished(sequence: u64, outcome: ScanOutcome) -> PoolEvent {
        let task = task(sequence);
        PoolEvent::Finished(ScanResult {
            file: task.file,
            outcome,
            mode: task.mode,
            elapsed: Duration::from_millis(5),
            worker: WorkerId(0),
            timestamp: Utc::now(),
            sequence,
            preliminary: None,
        })
    }

    #[test]
    fn summary_counts_and_ordering() {
        let mut aggregator = ResultAggregator::new(6, 1, Instant::now());
        aggregator.record(finished(3, ScanOutcome::TimedOut));
        aggregator.record(finished(0, ScanOutcome::Healthy));
        aggregator.record(PoolEvent::Cancelled(task(4)));
        aggregator.record(finished(1, ScanOutcome::Corrupt { diagnostics: vec!["x".into()] }));
        aggregator.record(finished(2, ScanOutcome::Healthy));

        let mut store = MemoryHistoryStore::new();
        let report = aggregator.finish(&mut store);

        assert_eq!(report.summary.total_discovered, 6);
        assert_eq!(report.summary.total_skipped, 1);
        assert_eq!(report.summary.total_scanned, 4);
        assert_eq!(report.summary.cancelled, 1);
        assert_eq!(report.summary.counts.healthy, 2);
        assert_eq!(report.summary.counts.corrupt, 1);
        assert_eq!(report.summary.counts.timed_out, 1);
        let order: Vec<u64> = report.results.iter().map(|r| r.sequence).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert!(report.interrupted());
        assert_eq!(report.unhealthy().count(), 2);

        assert!(report.history_persisted);
        assert_eq!(store.len(), 4, "cancelled task is not recorded");
        assert!(store.get(Path::new("/m/4.mkv")).unwrap().is_none());
        let stored = store.get(Path::new("/m/3.mkv")).unwrap().unwrap();
        assert_eq!(stored.last_outcome, OutcomeKind::TimedOut);
        assert_eq!(stored.file_modified_at_scan, UNIX_EPOCH + Duration::from_secs(3));
    }

    struct ReadOnlyStore;

    impl HistoryStore for ReadOnlyStore {
        fn get(&self, _path: &Path) -> Result<Option<ScanHistoryRecord>> {
            Ok(None)
        }

        fn upsert_batch(&mut self, _records: &[ScanHistoryRecord]) -> Result<usize> {
            Err(VicError::Sql {
                context: "upsert",
                details: "attempt to write a readonly database".to_string(),
            })
        }

        fn stats(&self) -> Result<HistoryStats> {
            Ok(HistoryStats::default())
        }
    }

    #[test]
    fn history_write_failure_still_returns_report() {
        let mut aggregator = ResultAggregator::new(1, 0, Instant::now());
        aggregator.record(finished(0, ScanOutcome::Healthy));
        let report = aggregator.finish(&mut ReadOnlyStore);
        assert!(!report.history_persisted);
        assert!(report.history_error.unwrap().contains("VIC-2102"));
        assert_eq!(report.summary.counts.healthy, 1);
    }

    #[test]
    fn empty_run_touches_nothing() {
        let report = ResultAggregator::new(0, 0, Instant::now()).finish(&mut ReadOnlyStore);
        assert!(report.history_persisted);
        assert_eq!(report.summary.total_scanned, 0);
        assert_eq!(report.summary.counts.total(), 0);
        assert!(report.results.is_empty());
    }
}
