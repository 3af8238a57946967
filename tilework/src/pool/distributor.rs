//! Worker pool balancing tasks across a fixed set of worker threads.
//!
//! Every dispatch lands in a shared backlog. Workers pull from it one task at
//! a time whenever their private queue runs dry, so balancing is pull-based:
//! a busy worker simply stops asking for more.

use super::worker::Worker;
use crate::error::{DispatchError, PoolError};
use crate::task::{DispatchQueue, ReorderPolicy, Task, TaskContext};
use crate::telemetry::{NullTelemetrySink, TelemetryEvent, TelemetrySink};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Fallback CPU count when detection fails.
pub const FALLBACK_CPU_COUNT: usize = 8;

/// Workers spawned per available CPU when no explicit count is configured.
pub const WORKERS_PER_CPU: usize = 3;

/// Default prefix for worker thread names.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "tilework-worker";

/// Returns the default worker count: three per available CPU.
pub fn default_worker_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_CPU_COUNT);
    cpus * WORKERS_PER_CPU
}

/// Worker pool construction settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads. Zero is replaced by [`default_worker_count`].
    pub workers: usize,
    /// Start the workers during construction.
    pub auto_start: bool,
    /// Reorder policy for the backlog and every private queue.
    pub reorder: ReorderPolicy,
    /// Worker threads are named `{prefix}-{index}`.
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            auto_start: true,
            reorder: ReorderPolicy::NeverReorder,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}

impl PoolConfig {
    /// Sets the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets whether workers start during construction.
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Sets the reorder policy.
    pub fn with_reorder(mut self, reorder: ReorderPolicy) -> Self {
        self.reorder = reorder;
        self
    }

    /// Sets the worker thread name prefix.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            default_worker_count()
        } else {
            self.workers
        }
    }
}

/// Point-in-time view of a pool's queues.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks waiting in the shared backlog.
    pub backlog: usize,
    /// Tasks waiting in each worker's private queue, by worker index.
    pub queued_per_worker: Vec<usize>,
    /// Workers whose thread loop is currently running.
    pub running_workers: usize,
}

impl PoolStats {
    /// Total number of tasks not yet taken by a worker loop.
    pub fn total_queued(&self) -> usize {
        self.backlog + self.queued_per_worker.iter().sum::<usize>()
    }
}

/// Shared backlog plus a fixed set of worker threads.
///
/// Dropping the pool disposes it.
pub struct WorkerPool {
    backlog: DispatchQueue,
    workers: Vec<Worker>,
    thread_name_prefix: String,
    disposed: AtomicBool,
    telemetry: Arc<dyn TelemetrySink>,
}

impl WorkerPool {
    /// Creates a pool without telemetry.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        Self::with_telemetry(config, Arc::new(NullTelemetrySink))
    }

    /// Creates a pool that reports through `telemetry`.
    ///
    /// With `auto_start` the workers are spawned before this returns.
    pub fn with_telemetry(
        config: PoolConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, PoolError> {
        let count = config.effective_workers();
        let backlog =
            DispatchQueue::with_telemetry("backlog", config.reorder, Arc::clone(&telemetry));
        let workers = (0..count)
            .map(|index| Worker::new(index, config.reorder, Arc::clone(&telemetry)))
            .collect();

        let pool = Self {
            backlog,
            workers,
            thread_name_prefix: config.thread_name_prefix,
            disposed: AtomicBool::new(false),
            telemetry,
        };

        info!(
            workers = count,
            reorder = %config.reorder,
            auto_start = config.auto_start,
            "Worker pool created"
        );

        if config.auto_start {
            pool.start()?;
        }
        Ok(pool)
    }

    /// Number of workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Returns true once [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Seeds every idle worker from the backlog, then starts its thread.
    ///
    /// Workers that are already running are left alone. A no-op after dispose.
    pub fn start(&self) -> Result<(), PoolError> {
        if self.is_disposed() {
            return Ok(());
        }

        let seeded = self.seed_workers();
        for (worker, seeded) in self.workers.iter().zip(seeded) {
            if worker.is_running() {
                continue;
            }
            worker.start(self.backlog.clone(), &self.thread_name_prefix, seeded)?;
        }

        info!(workers = self.workers.len(), "Worker pool started");
        Ok(())
    }

    /// Moves an equal share of the backlog into each idle worker's queue.
    ///
    /// The share is computed once from the backlog length before seeding
    /// begins. Returns the number of tasks given to each worker.
    pub(crate) fn seed_workers(&self) -> Vec<usize> {
        let share = self.backlog.len() / self.workers.len().max(1);

        self.workers
            .iter()
            .map(|worker| {
                if worker.is_running() || share == 0 {
                    return 0;
                }
                let batch = self.backlog.isolate_tasks(share);
                let seeded = batch.len();
                worker.queue().push_many(batch);
                debug!(worker = worker.index(), seeded, "Worker seeded from backlog");
                seeded
            })
            .collect()
    }

    /// Adds a task to the shared backlog.
    ///
    /// Rejected when called from one of this pool's own workers, since the
    /// calling worker could end up waiting on work only it would run.
    pub fn dispatch<T: Send + 'static>(&self, task: &Task<T>) -> Result<(), DispatchError> {
        if let Some(worker) = self.workers.iter().find(|w| w.is_current_thread()) {
            return Err(DispatchError::WorkerSelfDispatch {
                worker: worker.index(),
            });
        }
        self.backlog.dispatch(task)
    }

    /// Wraps `f` in a function task and dispatches it.
    pub fn dispatch_fn<T, F>(&self, f: F) -> Result<Task<T>, DispatchError>
    where
        T: Send + 'static,
        F: FnOnce(&TaskContext<'_>) -> T + Send + 'static,
    {
        let task = Task::function(f);
        self.dispatch(&task)?;
        Ok(task)
    }

    /// Wraps `f` in a procedure task and dispatches it.
    pub fn dispatch_procedure<F>(&self, f: F) -> Result<Task, DispatchError>
    where
        F: FnOnce(&TaskContext<'_>) + Send + 'static,
    {
        let task = Task::procedure(f);
        self.dispatch(&task)?;
        Ok(task)
    }

    /// Snapshot of queue depths and running workers.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            backlog: self.backlog.len(),
            queued_per_worker: self.workers.iter().map(|w| w.queue().len()).collect(),
            running_workers: self.workers.iter().filter(|w| w.is_running()).count(),
        }
    }

    /// Aborts every backlog task, then stops and disposes each worker.
    ///
    /// Each worker finishes the task it is running before its thread exits;
    /// tasks still in a private queue are aborted. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut drained = self.backlog.dispose();
        for worker in &self.workers {
            drained += worker.dispose();
        }

        self.telemetry.emit(TelemetryEvent::PoolDisposed { drained });
        info!(drained, "Worker pool disposed");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("backlog", &self.backlog.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RecordingSink;
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    fn idle_pool(workers: usize) -> WorkerPool {
        WorkerPool::new(
            PoolConfig::default()
                .with_workers(workers)
                .with_auto_start(false),
        )
        .unwrap()
    }

    #[test]
    fn test_default_worker_count() {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(FALLBACK_CPU_COUNT);
        assert_eq!(default_worker_count(), cpus * 3);
    }

    #[test]
    fn test_zero_workers_uses_default() {
        let pool = idle_pool(0);
        assert_eq!(pool.worker_count(), default_worker_count());
    }

    #[test]
    fn test_seed_divides_backlog_evenly() {
        let pool = idle_pool(4);
        let tasks: Vec<Task> = (0..40).map(|_| Task::procedure(|_| {})).collect();
        for task in &tasks {
            pool.dispatch(task).unwrap();
        }

        let seeded = pool.seed_workers();

        assert_eq!(seeded, vec![10, 10, 10, 10]);
        let stats = pool.stats();
        assert_eq!(stats.queued_per_worker, vec![10, 10, 10, 10]);
        assert_eq!(stats.backlog, 0);
        assert_eq!(stats.total_queued(), 40);
    }

    #[test]
    fn test_seed_leaves_remainder_in_backlog() {
        let pool = idle_pool(4);
        let tasks: Vec<Task> = (0..42).map(|_| Task::procedure(|_| {})).collect();
        for task in &tasks {
            pool.dispatch(task).unwrap();
        }

        let seeded = pool.seed_workers();

        assert_eq!(seeded.iter().sum::<usize>() + pool.stats().backlog, 42);
        assert_eq!(pool.stats().backlog, 2);
    }

    #[test]
    fn test_seed_with_small_backlog_gives_nothing() {
        let pool = idle_pool(4);
        let task = Task::procedure(|_| {});
        pool.dispatch(&task).unwrap();

        assert_eq!(pool.seed_workers(), vec![0, 0, 0, 0]);
        assert_eq!(pool.stats().backlog, 1);
    }

    #[test]
    fn test_started_pool_runs_every_task() {
        let pool = WorkerPool::new(PoolConfig::default().with_workers(3)).unwrap();

        let tasks: Vec<Task<usize>> = (0..30)
            .map(|i| pool.dispatch_fn(move |_| i * 2).unwrap())
            .collect();

        for (i, task) in tasks.iter().enumerate() {
            assert_eq!(task.result(), Ok(i * 2));
            assert!(task.is_succeeded());
        }
        pool.dispose();
    }

    #[test]
    fn test_start_seeds_pre_queued_tasks() {
        let pool = idle_pool(2);
        let ran = Arc::new(Mutex::new(0usize));
        let tasks: Vec<Task> = (0..10)
            .map(|_| {
                let ran = Arc::clone(&ran);
                pool.dispatch_procedure(move |_| *ran.lock() += 1).unwrap()
            })
            .collect();

        pool.start().unwrap();
        for task in &tasks {
            assert!(task.wait_timeout(Duration::from_secs(5)));
        }

        assert_eq!(*ran.lock(), 10);
        pool.dispose();
    }

    #[test]
    fn test_worker_self_dispatch_rejected() {
        let pool = Arc::new(WorkerPool::new(PoolConfig::default().with_workers(1)).unwrap());
        let (tx, rx) = mpsc::channel();

        let inner_pool = Arc::clone(&pool);
        let task = pool
            .dispatch_procedure(move |_| {
                let nested = Task::procedure(|_| {});
                let _ = tx.send(inner_pool.dispatch(&nested));
            })
            .unwrap();

        task.wait();
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result, Err(DispatchError::WorkerSelfDispatch { worker: 0 }));
        pool.dispose();
    }

    #[test]
    fn test_dispose_ends_never_started_tasks() {
        let pool = idle_pool(3);
        let tasks: Vec<Task> = (0..12)
            .map(|_| pool.dispatch_procedure(|_| {}).unwrap())
            .collect();

        pool.dispose();

        for task in &tasks {
            assert!(task.has_ended());
            assert!(task.is_failed());
        }
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let sink = Arc::new(RecordingSink::default());
        let pool = WorkerPool::with_telemetry(
            PoolConfig::default().with_workers(2),
            Arc::clone(&sink) as Arc<dyn TelemetrySink>,
        )
        .unwrap();

        pool.dispose();
        pool.dispose();
        drop(pool);

        let disposed = sink
            .types()
            .into_iter()
            .filter(|t| *t == "pool_disposed")
            .count();
        assert_eq!(disposed, 1);
    }

    #[test]
    fn test_dispatch_after_dispose_rejected() {
        let pool = idle_pool(1);
        pool.dispose();

        let result = pool.dispatch_procedure(|_| {});
        assert!(matches!(result, Err(DispatchError::Disposed { .. })));
    }

    #[test]
    fn test_dispose_waits_for_running_task() {
        let pool = WorkerPool::new(PoolConfig::default().with_workers(1)).unwrap();
        let (started_tx, started_rx) = mpsc::channel();

        let task = pool
            .dispatch_procedure(move |_| {
                let _ = started_tx.send(());
                std::thread::sleep(Duration::from_millis(50));
            })
            .unwrap();

        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pool.dispose();

        assert!(task.is_succeeded());
        assert_eq!(pool.stats().running_workers, 0);
    }

    #[test]
    fn test_stats_reports_running_workers() {
        let pool = WorkerPool::new(PoolConfig::default().with_workers(2)).unwrap();
        assert_eq!(pool.stats().running_workers, 2);
        pool.dispose();
        assert_eq!(pool.stats().running_workers, 0);
    }
}
