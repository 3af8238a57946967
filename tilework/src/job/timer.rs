//! Delayed callbacks used for timed job kills.
//!
//! The scheduler only needs "run this once after a delay, unless cancelled".
//! [`TokioDelayTimer`] does that on a tokio runtime; [`ThreadDelayTimer`] is
//! the fallback when no runtime is available.

use crate::logging::TIMER_TARGET;
use crate::sync::Signal;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Callback run by a [`DelayTimer`].
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Schedules callbacks after a delay.
pub trait DelayTimer: Send + Sync {
    /// Runs `callback` once after `delay`, unless the returned handle is
    /// cancelled first. Dropping the handle does not cancel.
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;
}

/// Handle to a scheduled callback.
#[derive(Clone)]
pub struct TimerHandle {
    token: CancellationToken,
    wake: Signal,
    fired: Arc<AtomicBool>,
}

impl TimerHandle {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            wake: Signal::new(),
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancels the callback if it has not run yet.
    pub fn cancel(&self) {
        self.token.cancel();
        self.wake.set();
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns true once the callback has run.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Claims the right to fire. Fails if cancelled or already fired.
    fn claim(&self) -> bool {
        !self.token.is_cancelled() && !self.fired.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancelled", &self.is_cancelled())
            .field("fired", &self.has_fired())
            .finish()
    }
}

/// Timer backed by a tokio runtime.
#[derive(Clone, Debug)]
pub struct TokioDelayTimer {
    handle: Handle,
}

impl TokioDelayTimer {
    /// Creates a timer that spawns onto `handle`.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Creates a timer on the current runtime, if called from within one.
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl DelayTimer for TokioDelayTimer {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle::new();
        let timer = handle.clone();

        self.handle.spawn(async move {
            tokio::select! {
                _ = timer.token.cancelled() => {
                    trace!(target: TIMER_TARGET, "Delayed callback cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    if timer.claim() {
                        callback();
                    }
                }
            }
        });

        handle
    }
}

/// Timer that parks one OS thread per scheduled callback.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadDelayTimer;

impl DelayTimer for ThreadDelayTimer {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle::new();
        let timer = handle.clone();

        let spawned = thread::Builder::new()
            .name("tilework-timer".to_string())
            .spawn(move || {
                if !timer.wake.wait_timeout(delay) && timer.claim() {
                    callback();
                }
            });

        if let Err(e) = spawned {
            warn!(
                target: TIMER_TARGET,
                error = %e,
                "Failed to spawn timer thread, callback dropped"
            );
            handle.token.cancel();
        }
        handle
    }
}

/// Picks [`TokioDelayTimer`] inside a runtime, [`ThreadDelayTimer`] otherwise.
pub fn default_timer() -> Arc<dyn DelayTimer> {
    match TokioDelayTimer::try_current() {
        Some(timer) => Arc::new(timer),
        None => Arc::new(ThreadDelayTimer),
    }
}
