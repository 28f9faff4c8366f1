//! Bounded worker pool that turns scan tasks into scan results.
//!
//! Tasks are queued FIFO on an unbounded channel and pulled by at most
//! `max_workers` threads. Each task produces exactly one [`PoolEvent`]:
//! panics become `ExecutionError` results, tasks dropped by a dead worker are
//! synthesised by the collector, and tasks never started after a stop request
//! or torn down by a kill are reported as cancelled.

#![allow(missing_docs)]

use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel as channel;
use parking_lot::Mutex;

use crate::core::errors::{Result, VicError};
use crate::scanner::cancel::CancelToken;
use crate::scanner::mode::StrategyOutcome;
use crate::scanner::model::{ScanOutcome, ScanResult, ScanTask, WorkerId};

/// Work executed by a pool thread for one task.
pub trait TaskExecutor: Send + Sync {
    fn execute(&self, task: &ScanTask, cancel: &CancelToken) -> StrategyOutcome;
}

/// One task's terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    Finished(ScanResult),
    /// Never started, or killed while running.
    Cancelled(ScanTask),
}

impl PoolEvent {
    pub const fn sequence(&self) -> u64 {
        match self {
            Self::Finished(result) => result.sequence,
            Self::Cancelled(task) => task.sequence,
        }
    }
}

type Outstanding = Arc<Mutex<BTreeMap<u64, ScanTask>>>;

/// Pool sizing. A pool value is owned by the run that uses it.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Result<Self> {
        if max_workers == 0 {
            return Err(VicError::InvalidConfig {
                details: "max_workers must be >= 1".to_string(),
            });
        }
        Ok(Self { max_workers })
    }

    pub const fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Start working through `tasks`. Sequence ids must be unique.
    ///
    /// Events arrive in completion order through the returned iterator.
    pub fn run(
        &self,
        tasks: Vec<ScanTask>,
        executor: Arc<dyn TaskExecutor>,
        cancel: &CancelToken,
    ) -> PoolRun {
        let submitted = tasks.len();
        let (task_tx, task_rx) = channel::unbounded::<ScanTask>();
        let (event_tx, event_rx) = channel::unbounded::<PoolEvent>();
        let outstanding: Outstanding = Arc::new(Mutex::new(BTreeMap::new()));

        {
            let mut pending = outstanding.lock();
            for task in tasks {
                pending.insert(task.sequence, task.clone());
                // Receiver is alive until the workers below exit.
                let _ = task_tx.send(task);
            }
        }
        drop(task_tx);

        let workers = self.max_workers.min(submitted);
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let task_rx = task_rx.clone();
            let event_tx = event_tx.clone();
            let outstanding = Arc::clone(&outstanding);
            let executor = Arc::clone(&executor);
            let cancel = cancel.clone();
            let spawned = thread::Builder::new()
                .name(format!("vic-worker-{index}"))
                .spawn(move || {
                    worker_thread(
                        WorkerId(index),
                        &task_rx,
                        &event_tx,
                        &outstanding,
                        executor.as_ref(),
                        &cancel,
                    );
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(error) => tracing::warn!(index, %error, "failed to spawn scan worker"),
            }
        }
        drop(event_tx);

        tracing::debug!(submitted, workers = handles.len(), "worker pool started");

        PoolRun {
            events: event_rx,
            handles,
            outstanding,
            synthesised: VecDeque::new(),
            cancel: cancel.clone(),
            submitted,
            delivered: 0,
            drained: false,
        }
    }
}

/// Worker thread: pull tasks until the queue is empty.
fn worker_thread(
    worker: WorkerId,
    tasks: &channel::Receiver<ScanTask>,
    events: &channel::Sender<PoolEvent>,
    outstanding: &Mutex<BTreeMap<u64, ScanTask>>,
    executor: &dyn TaskExecutor,
    cancel: &CancelToken,
) {
    while let Ok(task) = tasks.recv() {
        let event = if cancel.is_stopping() {
            PoolEvent::Cancelled(task)
        } else {
            execute_isolated(worker, task, executor, cancel)
        };
        outstanding.lock().remove(&event.sequence());
        if events.send(event).is_err() {
            // Collector is gone; nobody is listening for the rest.
            return;
        }
    }
}

fn execute_isolated(
    worker: WorkerId,
    task: ScanTask,
    executor: &dyn TaskExecutor,
    cancel: &CancelToken,
) -> PoolEvent {
    let started = Instant::now();
    let attempt = panic::catch_unwind(AssertUnwindSafe(|| executor.execute(&task, cancel)));
    match attempt {
        Ok(strategy) if strategy.interrupted => {
            tracing::debug!(%worker, path = %task.file.path.display(), "task killed in flight");
            PoolEvent::Cancelled(task)
        }
        Ok(strategy) => {
            tracing::debug!(
                %worker,
                path = %task.file.path.display(),
                outcome = %strategy.outcome.kind(),
                elapsed_ms = strategy.elapsed.as_millis(),
                "task finished"
            );
            PoolEvent::Finished(ScanResult {
                outcome: strategy.outcome,
                preliminary: strategy.preliminary,
                elapsed: strategy.elapsed,
                mode: task.mode,
                worker,
                timestamp: Utc::now(),
                sequence: task.sequence,
                file: task.file,
            })
        }
        Err(payload) => {
            let message = format!("scan worker panicked: {}", panic_message(payload.as_ref()));
            tracing::warn!(%worker, path = %task.file.path.display(), %message);
            PoolEvent::Finished(failed_result(task, worker, message, started.elapsed()))
        }
    }
}

fn failed_result(task: ScanTask, worker: WorkerId, message: String, elapsed: Duration) -> ScanResult {
    ScanResult {
        outcome: ScanOutcome::ExecutionError { message },
        preliminary: None,
        elapsed,
        mode: task.mode,
        worker,
        timestamp: Utc::now(),
        sequence: task.sequence,
        file: task.file,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Live view of a running pool. Yields one event per submitted task.
///
/// Dropping an undrained run kills in-flight analysis and joins the workers.
pub struct PoolRun {
    events: channel::Receiver<PoolEvent>,
    handles: Vec<JoinHandle<()>>,
    outstanding: Outstanding,
    synthesised: VecDeque<PoolEvent>,
    cancel: CancelToken,
    submitted: usize,
    delivered: usize,
    drained: bool,
}

impl PoolRun {
    pub const fn submitted(&self) -> usize {
        self.submitted
    }

    pub const fn delivered(&self) -> usize {
        self.delivered
    }

    /// Drain every remaining event and join the workers.
    pub fn collect_all(mut self) -> Vec<PoolEvent> {
        let mut events = Vec::with_capacity(self.submitted - self.delivered);
        events.extend(self.by_ref());
        events
    }

    fn join_workers(&mut self) {
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("scan worker exited by panic");
            }
        }
    }

    /// Everything still outstanding after all workers exited was lost.
    fn synthesise_lost(&mut self) {
        let lost = std::mem::take(&mut *self.outstanding.lock());
        for (sequence, task) in lost {
            tracing::warn!(sequence, path = %task.file.path.display(), "task lost by worker pool");
            self.synthesised.push_back(PoolEvent::Finished(failed_result(
                task,
                WorkerId::COORDINATOR,
                "task was not completed by any worker".to_string(),
                Duration::ZERO,
            )));
        }
    }
}

impl Iterator for PoolRun {
    type Item = PoolEvent;

    fn next(&mut self) -> Option<PoolEvent> {
        if !self.drained {
            if let Ok(event) = self.events.recv() {
                self.delivered += 1;
                return Some(event);
            }
            self.drained = true;
            self.join_workers();
            self.synthesise_lost();
        }
        let event = self.synthesised.pop_front()?;
        self.delivered += 1;
        Some(event)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.submitted - self.delivered;
        (remaining, Some(remaining))
    }
}

impl Drop for PoolRun {
    fn drop(&mut self) {
        if !self.drained {
            self.cancel.kill();
            self.join_workers();
        }
    }
}
