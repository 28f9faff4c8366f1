//! Cooperative cancellation shared by the pool, the workers and the invoker.
//!
//! Two levels: *stop* keeps queued tasks from starting, *kill* also tears down
//! in-flight analysis processes. A stop can carry a deadline after which it
//! escalates to kill on its own.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Cloneable handle; all clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    stop: AtomicBool,
    kill: AtomicBool,
    kill_deadline: Mutex<Option<Instant>>,
}

impl CancelToken {
    /// A token with nothing requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop handing out queued tasks. In-flight tasks run to completion.
    pub fn request_stop(&self) {
        self.inner.stop.store(true, Ordering::Release);
    }

    /// Stop, and kill whatever is still running once `grace` has elapsed.
    ///
    /// Repeated calls can only bring the deadline closer. A grace too large to
    /// represent leaves the stop without a kill deadline.
    pub fn request_stop_within(&self, grace: Duration) {
        self.request_stop();
        let Some(deadline) = Instant::now().checked_add(grace) else {
            return;
        };
        let mut slot = self.inner.kill_deadline.lock();
        *slot = Some(slot.map_or(deadline, |current| current.min(deadline)));
    }

    /// Stop and kill in-flight analysis immediately.
    pub fn kill(&self) {
        self.inner.stop.store(true, Ordering::Release);
        self.inner.kill.store(true, Ordering::Release);
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.stop.load(Ordering::Acquire)
    }

    /// Whether in-flight work must be torn down now.
    pub fn should_kill(&self) -> bool {
        if self.inner.kill.load(Ordering::Acquire) {
            return true;
        }
        let expired = self
            .inner
            .kill_deadline
            .lock()
            .is_some_and(|deadline| Instant::now() >= deadline);
        if expired {
            self.inner.kill.store(true, Ordering::Release);
        }
        expired
    }
}
