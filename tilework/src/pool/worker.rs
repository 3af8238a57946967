//! Worker thread owning a private dispatch queue.
//!
//! A worker repeatedly:
//!
//! 1. runs one task from its private queue, or
//! 2. pulls exactly one task from the shared backlog into its private queue, or
//! 3. sleeps until either the exit signal or the backlog's non-empty signal fires.
//!
//! Exit is checked between tasks only; a running task is never interrupted.

use crate::error::PoolError;
use crate::logging::WORKER_TARGET;
use crate::sync::{wait_any, Signal};
use crate::task::{DispatchQueue, ReorderPolicy};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, warn};

/// One thread of a [`WorkerPool`](super::WorkerPool).
pub(crate) struct Worker {
    index: usize,
    queue: DispatchQueue,
    exit: Signal,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl Worker {
    pub(crate) fn new(
        index: usize,
        policy: ReorderPolicy,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            index,
            queue: DispatchQueue::for_worker(index, policy, Arc::clone(&telemetry)),
            exit: Signal::new(),
            running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
            telemetry,
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    /// True between a successful `start` and the end of the thread loop.
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// True if the calling thread is this worker's thread.
    pub(crate) fn is_current_thread(&self) -> bool {
        self.queue.owner_thread() == Some(thread::current().id())
    }

    /// Spawns the worker thread. A worker that is already running is left alone.
    pub(crate) fn start(
        &self,
        backlog: DispatchQueue,
        name_prefix: &str,
        seeded: usize,
    ) -> Result<(), PoolError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let index = self.index;
        let queue = self.queue.clone();
        let exit = self.exit.clone();
        let running = Arc::clone(&self.running);
        let telemetry = Arc::clone(&self.telemetry);

        let spawned = thread::Builder::new()
            .name(format!("{}-{}", name_prefix, index))
            .spawn(move || {
                let _running = RunningGuard(running);
                if let Err(e) = queue.bind_to_current_thread() {
                    error!(
                        target: WORKER_TARGET,
                        worker = index,
                        error = %e,
                        "Worker failed to bind its queue"
                    );
                    return;
                }

                telemetry.emit(TelemetryEvent::WorkerStarted {
                    worker: index,
                    seeded,
                });
                run_loop(index, &queue, &backlog, &exit);
                queue.unbind();
                telemetry.emit(TelemetryEvent::WorkerStopped { worker: index });
            });

        match spawned {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                Ok(())
            }
            Err(source) => {
                self.running.store(false, Ordering::Release);
                Err(PoolError::Spawn {
                    worker: index,
                    source,
                })
            }
        }
    }

    /// Stops the thread after its current task, then disposes the private queue.
    ///
    /// Returns the number of never-started tasks that were drained.
    pub(crate) fn dispose(&self) -> usize {
        self.exit.set();

        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                warn!(
                    target: WORKER_TARGET,
                    worker = self.index,
                    "Worker disposed from its own thread, not joining"
                );
            } else if handle.join().is_err() {
                warn!(target: WORKER_TARGET, worker = self.index, "Worker thread panicked");
            }
        }

        self.queue.dispose()
    }

    pub(crate) fn thread_id(&self) -> Option<ThreadId> {
        self.thread.lock().as_ref().map(|h| h.thread().id())
    }
}

/// Clears the running flag when the thread loop ends, including by panic.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn run_loop(index: usize, queue: &DispatchQueue, backlog: &DispatchQueue, exit: &Signal) {
    debug!(target: WORKER_TARGET, worker = index, "Worker loop started");

    loop {
        if exit.is_set() {
            break;
        }

        if queue.process_next_task() {
            continue;
        }

        let pulled = backlog.isolate_tasks(1);
        if !pulled.is_empty() {
            queue.push_many(pulled);
            continue;
        }

        wait_any(&[exit, backlog.non_empty_signal()], None);
    }

    debug!(target: WORKER_TARGET, worker = index, "Worker loop exited");
}
