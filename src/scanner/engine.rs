//! Single entry point for one scan run.
//!
//! ```text
//! FileDiscovery -> IncrementalFilter -> WorkerPool -> ResultAggregator
//!                         ^                                  |
//!                         +------------ HistoryStore <-------+
//! ```

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::core::errors::{Result, VicError};
use crate::history::HistoryStore;
use crate::scanner::aggregate::{ResultAggregator, ScanReport};
use crate::scanner::cancel::CancelToken;
use crate::scanner::discovery::{DiscoveryOptions, FileDiscovery};
use crate::scanner::incremental::{IncrementalFilter, IncrementalPolicy};
use crate::scanner::invoker::Analyzer;
use crate::scanner::mode::{ModeSelector, StrategyOutcome, ToolProfile, run_strategy};
use crate::scanner::model::{ModeTimeouts, ScanTask};
use crate::scanner::pool::{PoolEvent, TaskExecutor, WorkerPool};

/// Everything a run needs apart from the root, the store and the analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    pub max_workers: usize,
    pub modes: ModeSelector,
    pub timeouts: ModeTimeouts,
    pub recursive: bool,
    pub follow_symlinks: bool,
    pub extensions: BTreeSet<String>,
    pub incremental: IncrementalPolicy,
    pub tool: ToolProfile,
}

impl ScanSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(VicError::InvalidConfig {
                details: "max_workers must be >= 1".to_string(),
            });
        }
        if self.timeouts.quick.is_zero() || self.timeouts.deep.is_zero() {
            return Err(VicError::InvalidConfig {
                details: "quick and deep timeouts must be > 0".to_string(),
            });
        }
        if self.extensions.iter().all(|ext| ext.trim_start_matches('.').trim().is_empty()) {
            return Err(VicError::InvalidConfig {
                details: "at least one file extension must be allowed".to_string(),
            });
        }
        for params in [&self.tool.quick, &self.tool.deep] {
            if params.program.as_os_str().is_empty() {
                return Err(VicError::InvalidConfig {
                    details: "analysis program must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Runs each task's pass plan against a shared analyzer.
pub struct StrategyExecutor {
    analyzer: Arc<dyn Analyzer>,
    profile: ToolProfile,
}

impl StrategyExecutor {
    pub fn new(analyzer: Arc<dyn Analyzer>, profile: ToolProfile) -> Self {
        Self { analyzer, profile }
    }
}

impl TaskExecutor for StrategyExecutor {
    fn execute(&self, task: &ScanTask, cancel: &CancelToken) -> StrategyOutcome {
        run_strategy(task, &self.profile, self.analyzer.as_ref(), cancel)
    }
}

type ProgressFn = dyn Fn(&PoolEvent) + Send + Sync;

/// Orchestrates one run per call to [`ScanEngine::run`].
pub struct ScanEngine {
    settings: ScanSettings,
    analyzer: Arc<dyn Analyzer>,
    progress: Option<Arc<ProgressFn>>,
}

impl ScanEngine {
    /// Settings are validated here, before any file is touched.
    pub fn new(settings: ScanSettings, analyzer: Arc<dyn Analyzer>) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            analyzer,
            progress: None,
        })
    }

    /// Called on the collecting thread for every pool event, in completion order.
    #[must_use]
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PoolEvent) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub const fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Scan `root`.
    ///
    /// Only discovery and configuration failures are returned as errors; every
    /// per-file problem ends up in the report.
    pub fn run(
        &self,
        root: &Path,
        store: &mut dyn HistoryStore,
        cancel: &CancelToken,
    ) -> Result<ScanReport> {
        let started = Instant::now();
        let pool = WorkerPool::new(self.settings.max_workers)?;

        let discovery = FileDiscovery::new(DiscoveryOptions {
            root: root.to_path_buf(),
            recursive: self.settings.recursive,
            extensions: self.settings.extensions.clone(),
            follow_symlinks: self.settings.follow_symlinks,
        });
        let files = discovery.discover()?;

        let filter = IncrementalFilter::new(&*store, self.settings.incremental, Utc::now());
        let (to_scan, skipped) = filter.partition(files);
        let total_discovered = to_scan.len() + skipped.len();

        let tasks: Vec<ScanTask> = to_scan
            .into_iter()
            .zip(0_u64..)
            .map(|(file, sequence)| ScanTask {
                mode: self.settings.modes.select(&file),
                timeouts: self.settings.timeouts,
                sequence,
                file,
            })
            .collect();

        tracing::info!(
            root = %root.display(),
            discovered = total_discovered,
            skipped = skipped.len(),
            selected = tasks.len(),
            workers = pool.max_workers().min(tasks.len()),
            "scan started"
        );

        let executor: Arc<dyn TaskExecutor> = Arc::new(StrategyExecutor::new(
            Arc::clone(&self.analyzer),
            self.settings.tool.clone(),
        ));
        let mut aggregator = ResultAggregator::new(total_discovered, skipped.len(), started);
        for event in pool.run(tasks, executor, cancel) {
            if let Some(progress) = &self.progress {
                progress(&event);
            }
            aggregator.record(event);
        }

        let report = aggregator.finish(store);
        tracing::info!(
            scanned = report.summary.total_scanned,
            healthy = report.summary.counts.healthy,
            corrupt = report.summary.counts.corrupt,
            timed_out = report.summary.counts.timed_out,
            execution_error = report.summary.counts.execution_error,
            cancelled = report.summary.cancelled,
            elapsed_ms = report.summary.wall_clock.as_millis(),
            "scan finished"
        );
        Ok(report)
    }
}
