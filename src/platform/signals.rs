//! SIGINT/SIGTERM handling for interactive scans.
//!
//! The first signal asks the run to stop: queued files are abandoned and
//! in-flight analyses get `grace` to finish before they are killed. A second
//! signal kills in-flight analyses immediately.

#![allow(missing_docs)]

use std::thread::{self, JoinHandle};
use std::time::Duration;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use signal_hook::iterator::backend::Handle;

use crate::core::errors::{Result, VicError};
use crate::scanner::cancel::CancelToken;

/// What a delivered signal did to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    Stop,
    Kill,
    Ignored,
}

/// Apply the `received`-th interrupt (1-based) to `cancel`.
pub fn escalate(received: usize, cancel: &CancelToken, grace: Duration) -> InterruptAction {
    match received {
        0 => InterruptAction::Ignored,
        1 => {
            cancel.request_stop_within(grace);
            InterruptAction::Stop
        }
        2 => {
            cancel.kill();
            InterruptAction::Kill
        }
        _ => InterruptAction::Ignored,
    }
}

/// Owns the signal-listening thread for the lifetime of one command.
pub struct InterruptHandler {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl InterruptHandler {
    pub fn install(cancel: CancelToken, grace: Duration) -> Result<Self> {
        let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| VicError::Runtime {
            details: format!("failed to register signal handlers: {e}"),
        })?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("vic-signals".to_string())
            .spawn(move || {
                let mut received = 0_usize;
                for signal in signals.forever() {
                    received += 1;
                    match escalate(received, &cancel, grace) {
                        InterruptAction::Stop => tracing::warn!(
                            signal,
                            grace_secs = grace.as_secs(),
                            "interrupt received, finishing in-flight files (repeat to abort)"
                        ),
                        InterruptAction::Kill => {
                            tracing::warn!(signal, "second interrupt, killing in-flight analyses");
                        }
                        InterruptAction::Ignored => {}
                    }
                }
            })
            .map_err(|e| VicError::Runtime {
                details: format!("failed to spawn signal thread: {e}"),
            })?;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

impl Drop for InterruptHandler {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
