//! Blocking wait primitives shared by queues and workers.
//!
//! [`Signal`] is a manual-reset event: once set it stays set until reset, and
//! every waiter observes it. [`wait_any`] blocks on several signals at once,
//! which is what a worker needs to sleep on "exit requested" and "backlog has
//! work" at the same time.
//!
//! A `Signal` doubles as the external cancellation handle accepted by the
//! blocking queue operations.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cancellation handle accepted by blocking queue operations.
pub type CancelHandle = Signal;

/// Parking spot for one `wait_any` call.
#[derive(Default)]
struct Waiter {
    woken: Mutex<bool>,
    cond: Condvar,
}

impl Waiter {
    fn wake(&self) {
        let mut woken = self.woken.lock();
        *woken = true;
        self.cond.notify_one();
    }
}

struct SignalState {
    set: bool,
    waiters: Vec<Arc<Waiter>>,
}

struct SignalInner {
    state: Mutex<SignalState>,
    cond: Condvar,
}

/// Manual-reset event.
///
/// Cloning yields another handle to the same event.
#[derive(Clone)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

impl Signal {
    /// Creates a new, unset signal.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                state: Mutex::new(SignalState {
                    set: false,
                    waiters: Vec::new(),
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Sets the signal, releasing every current and future waiter.
    pub fn set(&self) {
        let mut state = self.inner.state.lock();
        if state.set {
            return;
        }
        state.set = true;
        for waiter in &state.waiters {
            waiter.wake();
        }
        self.inner.cond.notify_all();
    }

    /// Clears the signal.
    pub fn reset(&self) {
        self.inner.state.lock().set = false;
    }

    /// Returns true if the signal is currently set.
    pub fn is_set(&self) -> bool {
        self.inner.state.lock().set
    }

    /// Blocks until the signal is set.
    pub fn wait(&self) {
        let mut state = self.inner.state.lock();
        while !state.set {
            self.inner.cond.wait(&mut state);
        }
    }

    /// Blocks until the signal is set or `timeout` elapses.
    ///
    /// Returns true if the signal was set.
    ///
    /// A timeout too large to represent as a deadline waits without one.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);
        let mut state = self.inner.state.lock();
        while !state.set {
            match deadline {
                Some(deadline) => {
                    if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.inner.cond.wait(&mut state),
            }
        }
        state.set
    }

    fn register(&self, waiter: &Arc<Waiter>) {
        self.inner.state.lock().waiters.push(Arc::clone(waiter));
    }

    fn unregister(&self, waiter: &Arc<Waiter>) {
        self.inner
            .state
            .lock()
            .waiters
            .retain(|w| !Arc::ptr_eq(w, waiter));
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("set", &self.is_set())
            .finish()
    }
}

/// Deadline `timeout` from now, or `None` if it overflows `Instant`.
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Blocks until any of `signals` is set, or until `timeout` elapses.
///
/// Returns the index of the first set signal, or `None` on timeout. With an
/// empty slice and no timeout this would block forever, so it returns `None`
/// immediately instead.
pub fn wait_any(signals: &[&Signal], timeout: Option<Duration>) -> Option<usize> {
    if signals.is_empty() {
        return None;
    }

    let deadline = timeout.and_then(deadline_after);
    let waiter = Arc::new(Waiter::default());

    // Register before the first check so a set() racing with us always wakes us.
    for signal in signals {
        signal.register(&waiter);
    }

    let result = loop {
        if let Some(index) = signals.iter().position(|s| s.is_set()) {
            break Some(index);
        }

        let mut woken = waiter.woken.lock();
        if !*woken {
            match deadline {
                Some(deadline) => {
                    if waiter.cond.wait_until(&mut woken, deadline).timed_out() && !*woken {
                        drop(woken);
                        break signals.iter().position(|s| s.is_set());
                    }
                }
                None => waiter.cond.wait(&mut woken),
            }
        }
        *woken = false;
    };

    for signal in signals {
        signal.unregister(&waiter);
    }

    result
}
