//! Dispatch queue: an ordered, thread-owned list of pending tasks.
//!
//! Tasks in one queue run strictly one after another on whichever thread
//! calls [`DispatchQueue::process_next_task`], normally the queue's owner.
//! A thread owns at most one queue, and that thread may not dispatch into its
//! own queue (it would be waiting on work only it can run).
//!
//! # Reordering
//!
//! | Policy                | When the queue is re-sorted          |
//! |-----------------------|--------------------------------------|
//! | `NeverReorder`        | never, strict FIFO                   |
//! | `ReorderWhenAdded`    | after every insertion                |
//! | `ReorderWhenExecuted` | after every executed task            |
//!
//! Sorting is stable and descending on priority, so equal priorities keep
//! their insertion order.

use super::task::{Runnable, Task, TaskId, TaskOutcome};
use crate::error::DispatchError;
use crate::sync::{wait_any, CancelHandle, Signal};
use crate::telemetry::{NullTelemetrySink, TelemetryEvent, TelemetrySink};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Global counter for queue IDs.
static QUEUE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Which queue, if any, each thread is bound to.
static BOUND_QUEUES: OnceLock<DashMap<ThreadId, u64>> = OnceLock::new();

fn bound_queues() -> &'static DashMap<ThreadId, u64> {
    BOUND_QUEUES.get_or_init(DashMap::new)
}

// =============================================================================
// Reorder Policy
// =============================================================================

/// When a queue re-sorts its pending tasks by priority.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReorderPolicy {
    /// Strict FIFO.
    #[default]
    NeverReorder,
    /// Re-sort after every insertion.
    ReorderWhenAdded,
    /// Re-sort the remainder after every executed task. Cheaper than
    /// `ReorderWhenAdded`, at the cost of slightly stale ordering.
    ReorderWhenExecuted,
}

impl fmt::Display for ReorderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NeverReorder => write!(f, "never"),
            Self::ReorderWhenAdded => write!(f, "when_added"),
            Self::ReorderWhenExecuted => write!(f, "when_executed"),
        }
    }
}

impl FromStr for ReorderPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "never" | "fifo" => Ok(Self::NeverReorder),
            "when_added" | "added" => Ok(Self::ReorderWhenAdded),
            "when_executed" | "executed" => Ok(Self::ReorderWhenExecuted),
            other => Err(format!(
                "unknown reorder policy '{}', expected never, when_added or when_executed",
                other
            )),
        }
    }
}

// =============================================================================
// Queued Task
// =============================================================================

/// A task sitting in a queue, detached from its typed handle.
///
/// Returned by [`DispatchQueue::isolate_tasks`] so a batch can be moved to
/// another queue with [`DispatchQueue::push_many`].
#[derive(Clone)]
pub struct QueuedTask {
    task: Arc<dyn Runnable>,
}

impl QueuedTask {
    /// ID of the underlying task.
    pub fn id(&self) -> TaskId {
        self.task.state().id()
    }

    /// Current priority of the underlying task.
    pub fn priority(&self) -> i32 {
        self.task.state().priority()
    }

    /// Current outcome of the underlying task.
    pub fn outcome(&self) -> TaskOutcome {
        self.task.state().outcome()
    }

    pub(crate) fn abort(&self) {
        self.task.state().abort();
    }
}

impl fmt::Debug for QueuedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedTask")
            .field("id", &self.id())
            .field("priority", &self.priority())
            .finish()
    }
}

fn sort_by_priority(tasks: &mut VecDeque<QueuedTask>) {
    // slice::sort_by is stable: equal priorities keep insertion order.
    tasks
        .make_contiguous()
        .sort_by(|a, b| b.priority().cmp(&a.priority()));
}

// =============================================================================
// Dispatch Queue
// =============================================================================

struct QueueInner {
    id: u64,
    name: String,
    policy: ReorderPolicy,
    worker: Option<usize>,
    tasks: Mutex<VecDeque<QueuedTask>>,
    non_empty: Signal,
    owner: Mutex<Option<ThreadId>>,
    disposed: AtomicBool,
    telemetry: Arc<dyn TelemetrySink>,
}

impl QueueInner {
    fn unbind(&self) {
        if let Some(owner) = self.owner.lock().take() {
            bound_queues().remove_if(&owner, |_, queue_id| *queue_id == self.id);
        }
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        self.unbind();
    }
}

/// Ordered queue of pending tasks, executed sequentially.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct DispatchQueue {
    inner: Arc<QueueInner>,
}

impl DispatchQueue {
    /// Creates a queue that is not bound to any thread.
    ///
    /// An unbound queue is a plain thread-safe task list; the worker pool
    /// uses one as its shared backlog.
    pub fn new(name: impl Into<String>, policy: ReorderPolicy) -> Self {
        Self::with_telemetry(name, policy, Arc::new(NullTelemetrySink))
    }

    /// Creates an unbound queue that emits telemetry events.
    pub fn with_telemetry(
        name: impl Into<String>,
        policy: ReorderPolicy,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self::build(name.into(), policy, None, telemetry)
    }

    /// Creates a queue and binds it to the calling thread.
    ///
    /// Fails if the calling thread already owns a queue.
    pub fn bind_current(
        name: impl Into<String>,
        policy: ReorderPolicy,
    ) -> Result<Self, DispatchError> {
        let queue = Self::new(name, policy);
        queue.bind_to_current_thread()?;
        Ok(queue)
    }

    pub(crate) fn for_worker(
        worker: usize,
        policy: ReorderPolicy,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self::build(format!("worker-{}", worker), policy, Some(worker), telemetry)
    }

    fn build(
        name: String,
        policy: ReorderPolicy,
        worker: Option<usize>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                id: QUEUE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                name,
                policy,
                worker,
                tasks: Mutex::new(VecDeque::new()),
                non_empty: Signal::new(),
                owner: Mutex::new(None),
                disposed: AtomicBool::new(false),
                telemetry,
            }),
        }
    }

    /// Binds this queue to the calling thread.
    pub fn bind_to_current_thread(&self) -> Result<(), DispatchError> {
        let current = thread::current().id();
        let mut owner = self.inner.owner.lock();

        if let Some(existing) = *owner {
            return Err(DispatchError::QueueOwned {
                queue: self.inner.name.clone(),
                owner: existing,
            });
        }

        match bound_queues().entry(current) {
            Entry::Occupied(_) => Err(DispatchError::QueueAlreadyBound { thread: current }),
            Entry::Vacant(entry) => {
                entry.insert(self.inner.id);
                *owner = Some(current);
                debug!(queue = %self.inner.name, thread = ?current, "Queue bound to thread");
                Ok(())
            }
        }
    }

    /// Releases the thread binding, if any.
    pub fn unbind(&self) {
        self.inner.unbind();
    }

    /// Queue name, used in logs and telemetry.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Reorder policy fixed at construction.
    pub fn policy(&self) -> ReorderPolicy {
        self.inner.policy
    }

    /// Thread this queue is bound to, if any.
    pub fn owner_thread(&self) -> Option<ThreadId> {
        *self.inner.owner.lock()
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    /// Returns true if no task is pending.
    pub fn is_empty(&self) -> bool {
        self.inner.tasks.lock().is_empty()
    }

    /// Returns true once [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Signal that is set while the queue holds at least one task.
    pub fn non_empty_signal(&self) -> &Signal {
        &self.inner.non_empty
    }

    /// Adds a task to the queue.
    ///
    /// Fails when called from the thread that owns this queue, when the task
    /// was already dispatched, or when the queue has been disposed.
    pub fn dispatch<T: Send + 'static>(&self, task: &Task<T>) -> Result<(), DispatchError> {
        if self.owner_thread() == Some(thread::current().id()) {
            return Err(DispatchError::SelfDispatch {
                queue: self.inner.name.clone(),
            });
        }
        self.dispatch_unchecked(task)
    }

    /// Adds a task without the owner-thread check.
    pub(crate) fn dispatch_unchecked<T: Send + 'static>(
        &self,
        task: &Task<T>,
    ) -> Result<(), DispatchError> {
        let queued = QueuedTask {
            task: task.runnable(),
        };
        let (task_id, priority) = (queued.id(), queued.priority());

        let depth = {
            // Checked under the task lock, so dispose() drains everything that got in
            let mut tasks = self.inner.tasks.lock();
            if self.is_disposed() {
                return Err(DispatchError::Disposed {
                    queue: self.inner.name.clone(),
                });
            }
            if !task.state().mark_dispatched() {
                return Err(DispatchError::AlreadyDispatched {
                    task: task.id().as_u64(),
                });
            }
            tasks.push_back(queued);
            if self.inner.policy == ReorderPolicy::ReorderWhenAdded {
                sort_by_priority(&mut tasks);
            }
            self.inner.non_empty.set();
            tasks.len()
        };

        self.inner.telemetry.emit(TelemetryEvent::TaskDispatched {
            queue: self.inner.name.clone(),
            task_id,
            priority,
            queue_depth: depth,
        });
        Ok(())
    }

    /// Appends a batch of tasks taken from another queue.
    ///
    /// A disposed queue aborts the batch instead.
    pub fn push_many(&self, batch: Vec<QueuedTask>) {
        if batch.is_empty() {
            return;
        }
        let mut tasks = self.inner.tasks.lock();
        if self.is_disposed() {
            drop(tasks);
            for task in &batch {
                task.abort();
            }
            return;
        }
        tasks.extend(batch);
        if self.inner.policy == ReorderPolicy::ReorderWhenAdded {
            sort_by_priority(&mut tasks);
        }
        self.inner.non_empty.set();
    }

    /// Removes up to `count` tasks from the head of the queue, atomically.
    pub fn isolate_tasks(&self, count: usize) -> Vec<QueuedTask> {
        let mut tasks = self.inner.tasks.lock();
        let take = count.min(tasks.len());
        let isolated: Vec<QueuedTask> = tasks.drain(..take).collect();
        if tasks.is_empty() {
            self.inner.non_empty.reset();
        }
        isolated
    }

    /// Removes `len / divisor` head tasks. A divisor of 0 is treated as 2.
    pub fn split_tasks(&self, divisor: usize) -> Vec<QueuedTask> {
        let divisor = if divisor == 0 { 2 } else { divisor };
        let mut tasks = self.inner.tasks.lock();
        let take = tasks.len() / divisor;
        let isolated: Vec<QueuedTask> = tasks.drain(..take).collect();
        if tasks.is_empty() {
            self.inner.non_empty.reset();
        }
        isolated
    }

    fn pop_next(&self) -> Option<QueuedTask> {
        let mut tasks = self.inner.tasks.lock();
        let next = tasks.pop_front();
        if tasks.is_empty() {
            self.inner.non_empty.reset();
        }
        next
    }

    /// Pops the head task and runs it on the calling thread.
    ///
    /// Returns false if the queue was empty. An aborted task is popped and
    /// ended without running its body; that still counts as processed.
    pub fn process_next_task(&self) -> bool {
        let Some(next) = self.pop_next() else {
            return false;
        };

        let started = Instant::now();
        next.task.run(&self.inner.name, self.inner.worker);

        if self.inner.policy == ReorderPolicy::ReorderWhenExecuted {
            sort_by_priority(&mut self.inner.tasks.lock());
        }

        self.inner.telemetry.emit(TelemetryEvent::TaskCompleted {
            queue: self.inner.name.clone(),
            task_id: next.id(),
            outcome: next.outcome(),
            duration: started.elapsed(),
        });
        true
    }

    /// Like [`process_next_task`](Self::process_next_task), but does nothing
    /// once `cancel` is set.
    pub fn process_next_task_unless(&self, cancel: &CancelHandle) -> bool {
        if cancel.is_set() {
            return false;
        }
        self.process_next_task()
    }

    /// Runs every queued task, including tasks added while draining.
    ///
    /// Returns the number of tasks processed.
    pub fn process_tasks(&self) -> usize {
        let mut processed = 0;
        while self.process_next_task() {
            processed += 1;
        }
        processed
    }

    /// Processes tasks as they arrive until `cancel` is set.
    ///
    /// Blocks while the queue is empty. Returns the number of tasks processed.
    pub fn process_tasks_until(&self, cancel: &CancelHandle) -> usize {
        let mut processed = 0;
        while !cancel.is_set() {
            if self.process_next_task() {
                processed += 1;
                continue;
            }
            wait_any(&[cancel, &self.inner.non_empty], None);
        }
        processed
    }

    /// Blocks until the queue holds a task, `cancel` is set, or `timeout`
    /// elapses. Returns true if a task is pending.
    pub fn wait_for_tasks(&self, cancel: Option<&CancelHandle>, timeout: Option<Duration>) -> bool {
        match cancel {
            Some(cancel) => {
                wait_any(&[cancel, &self.inner.non_empty], timeout);
            }
            None => {
                wait_any(&[&self.inner.non_empty], timeout);
            }
        }
        !self.is_empty()
    }

    /// Aborts every pending task and refuses further dispatches.
    ///
    /// Aborted tasks end as failed, so no waiter is left hanging. Returns the
    /// number of tasks drained. Idempotent: later calls return 0.
    pub fn dispose(&self) -> usize {
        let drained: Vec<QueuedTask> = {
            let mut tasks = self.inner.tasks.lock();
            if self.inner.disposed.swap(true, Ordering::AcqRel) {
                return 0;
            }
            let drained = tasks.drain(..).collect();
            self.inner.non_empty.reset();
            drained
        };

        for task in &drained {
            task.abort();
        }
        if !drained.is_empty() {
            warn!(
                queue = %self.inner.name,
                drained = drained.len(),
                "Queue disposed with pending tasks, aborting them"
            );
        }

        self.unbind();
        drained.len()
    }
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("name", &self.inner.name)
            .field("policy", &self.inner.policy)
            .field("len", &self.len())
            .field("owner", &self.owner_thread())
            .finish()
    }
}
