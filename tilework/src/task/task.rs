//! Task: a single function or procedure with cooperative abort and blocking wait.
//!
//! A [`Task`] is created from a closure and handed to a
//! [`DispatchQueue`](super::DispatchQueue) or a
//! [`WorkerPool`](crate::pool::WorkerPool). The handle stays with the caller,
//! who can abort it, wait for it, and read its result.
//!
//! # Lifecycle
//!
//! ```text
//! Pending ──run──► Running ──body returns──► Ended (Succeeded | Failed)
//!    │
//!    └──abort──► Ended (Failed, body never runs)
//! ```
//!
//! Aborting a running task only raises a flag. The body observes it through
//! [`TaskContext::is_aborted`]; nothing is interrupted.
//!
//! # Example
//!
//! ```ignore
//! use tilework::task::{DispatchQueue, ReorderPolicy, Task};
//!
//! let queue = DispatchQueue::new("loader", ReorderPolicy::NeverReorder);
//! let task = Task::function(|ctx| {
//!     if ctx.is_aborted() {
//!         return 0;
//!     }
//!     42
//! });
//! queue.dispatch(&task)?;
//! queue.process_tasks();
//! assert_eq!(task.result()?, 42);
//! ```

use crate::error::TaskError;
use crate::sync::deadline_after;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Global counter for task IDs.
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier attached to every task, used in telemetry and errors.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Allocates the next task ID.
    pub fn next() -> Self {
        Self(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Whether a task wraps a procedure or a result-producing function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    Procedure,
    Function,
}

/// Observable outcome of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Not yet picked up by a queue.
    Pending,
    /// Body is executing.
    Running,
    /// Ended without the abort flag set.
    Succeeded,
    /// Ended with the abort flag set (before or during the run).
    Failed,
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Pending,
    Running,
    Ended,
}

// =============================================================================
// Shared State
// =============================================================================

/// Type-independent state of a task: priority, flags, and the end-of-run latch.
pub(crate) struct TaskState {
    id: TaskId,
    kind: TaskKind,
    priority: AtomicI32,
    aborted: AtomicBool,
    dispatched: AtomicBool,
    phase: Mutex<Phase>,
    ended: Condvar,
}

impl TaskState {
    fn new(kind: TaskKind) -> Self {
        Self {
            id: TaskId::next(),
            kind,
            priority: AtomicI32::new(0),
            aborted: AtomicBool::new(false),
            dispatched: AtomicBool::new(false),
            phase: Mutex::new(Phase::Pending),
            ended: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn priority(&self) -> i32 {
        self.priority.load(Ordering::Relaxed)
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Raises the abort flag. A task still pending ends on the spot.
    pub(crate) fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        let mut phase = self.phase.lock();
        if *phase == Phase::Pending {
            *phase = Phase::Ended;
            self.ended.notify_all();
        }
    }

    /// Marks the task as handed to a queue. Returns false if it already was.
    pub(crate) fn mark_dispatched(&self) -> bool {
        !self.dispatched.swap(true, Ordering::AcqRel)
    }

    /// Moves Pending to Running. Fails if the task was aborted or already ran.
    fn try_begin(&self) -> bool {
        let mut phase = self.phase.lock();
        if *phase != Phase::Pending {
            return false;
        }
        if self.is_aborted() {
            *phase = Phase::Ended;
            self.ended.notify_all();
            return false;
        }
        *phase = Phase::Running;
        true
    }

    fn finish(&self) {
        let mut phase = self.phase.lock();
        *phase = Phase::Ended;
        self.ended.notify_all();
    }

    pub(crate) fn outcome(&self) -> TaskOutcome {
        match *self.phase.lock() {
            Phase::Pending => TaskOutcome::Pending,
            Phase::Running => TaskOutcome::Running,
            Phase::Ended if self.is_aborted() => TaskOutcome::Failed,
            Phase::Ended => TaskOutcome::Succeeded,
        }
    }

    fn is_started(&self) -> bool {
        *self.phase.lock() != Phase::Pending
    }

    fn has_ended(&self) -> bool {
        *self.phase.lock() == Phase::Ended
    }

    fn wait(&self) {
        let mut phase = self.phase.lock();
        while *phase != Phase::Ended {
            self.ended.wait(&mut phase);
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);
        let mut phase = self.phase.lock();
        while *phase != Phase::Ended {
            match deadline {
                Some(deadline) => {
                    if self.ended.wait_until(&mut phase, deadline).timed_out() {
                        break;
                    }
                }
                None => self.ended.wait(&mut phase),
            }
        }
        *phase == Phase::Ended
    }

    fn wait_if_running(&self) {
        let mut phase = self.phase.lock();
        while *phase == Phase::Running {
            self.ended.wait(&mut phase);
        }
    }
}

/// Ends the task when dropped, so a panicking body still releases waiters.
struct EndGuard<'a>(&'a TaskState);

impl Drop for EndGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!(task_id = %self.0.id, "Task body panicked");
        }
        self.0.finish();
    }
}

// =============================================================================
// Running Context
// =============================================================================

/// Context handed to a task body while it runs.
///
/// Replaces any notion of an ambient "current task": the body learns which
/// task it is, which queue runs it, and whether it has been asked to stop,
/// all from this value.
pub struct TaskContext<'a> {
    state: &'a TaskState,
    queue: &'a str,
    worker: Option<usize>,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(state: &'a TaskState, queue: &'a str, worker: Option<usize>) -> Self {
        Self {
            state,
            queue,
            worker,
        }
    }

    /// Returns true once the task has been asked to abort.
    ///
    /// Long-running bodies should poll this and return early.
    pub fn is_aborted(&self) -> bool {
        self.state.is_aborted()
    }

    /// Aborts the running task. It will end as failed.
    pub fn abort(&self) {
        self.state.aborted.store(true, Ordering::Release);
    }

    /// ID of the running task.
    pub fn task_id(&self) -> TaskId {
        self.state.id
    }

    /// Current priority of the running task.
    pub fn priority(&self) -> i32 {
        self.state.priority()
    }

    /// Name of the queue executing the task.
    pub fn queue_name(&self) -> &str {
        self.queue
    }

    /// Index of the pool worker executing the task, if any.
    pub fn worker_index(&self) -> Option<usize> {
        self.worker
    }
}

// =============================================================================
// Type Erasure
// =============================================================================

/// Object-safe view of a task, as stored by queues.
pub(crate) trait Runnable: Send + Sync {
    fn state(&self) -> &TaskState;

    /// Runs the body on the calling thread unless the task was aborted or
    /// already ran. Returns true if the body executed.
    fn run(&self, queue: &str, worker: Option<usize>) -> bool;
}

type Body<T> = Box<dyn FnOnce(&TaskContext<'_>) -> T + Send>;

struct TaskCore<T> {
    state: TaskState,
    body: Mutex<Option<Body<T>>>,
    result: Mutex<Option<T>>,
}

impl<T: Send + 'static> Runnable for TaskCore<T> {
    fn state(&self) -> &TaskState {
        &self.state
    }

    fn run(&self, queue: &str, worker: Option<usize>) -> bool {
        if !self.state.try_begin() {
            return false;
        }

        let body = self.body.lock().take();
        let _end = EndGuard(&self.state);

        if let Some(body) = body {
            let ctx = TaskContext::new(&self.state, queue, worker);
            let value = body(&ctx);
            *self.result.lock() = Some(value);
        }
        true
    }
}

// =============================================================================
// Task Handle
// =============================================================================

/// Handle to a task.
///
/// Cloning the handle does not clone the task; all clones observe the same
/// state and result.
pub struct Task<T = ()> {
    core: Arc<TaskCore<T>>,
}

impl Task<()> {
    /// Creates a task from a side-effecting procedure.
    ///
    /// Procedure tasks have no result slot; [`Task::result`] reports
    /// [`TaskError::ResultNotSupported`].
    pub fn procedure<F>(f: F) -> Self
    where
        F: FnOnce(&TaskContext<'_>) + Send + 'static,
    {
        Self::with_body(TaskKind::Procedure, Box::new(f))
    }
}

impl<T: Send + 'static> Task<T> {
    /// Creates a task from a function whose return value becomes the result.
    pub fn function<F>(f: F) -> Self
    where
        F: FnOnce(&TaskContext<'_>) -> T + Send + 'static,
    {
        Self::with_body(TaskKind::Function, Box::new(f))
    }

    /// Creates a function task that converts a panicking body into an abort.
    ///
    /// If `f` panics, the panic is caught, the task is aborted (so it ends as
    /// failed) and `T::default()` is stored as the result.
    pub fn function_safe<F>(f: F) -> Self
    where
        F: FnOnce(&TaskContext<'_>) -> T + Send + 'static,
        T: Default,
    {
        Self::function(move |ctx| match panic::catch_unwind(AssertUnwindSafe(|| f(ctx))) {
            Ok(value) => value,
            Err(_) => {
                warn!(task_id = %ctx.task_id(), "Task body panicked, aborting task");
                ctx.abort();
                T::default()
            }
        })
    }

    fn with_body(kind: TaskKind, body: Body<T>) -> Self {
        Self {
            core: Arc::new(TaskCore {
                state: TaskState::new(kind),
                body: Mutex::new(Some(body)),
                result: Mutex::new(None),
            }),
        }
    }

    /// Sets the priority and returns the task, for construction chains.
    pub fn with_priority(self, priority: i32) -> Self {
        self.set_priority(priority);
        self
    }

    /// Returns the task ID.
    pub fn id(&self) -> TaskId {
        self.core.state.id
    }

    /// Returns whether this task wraps a procedure or a function.
    pub fn kind(&self) -> TaskKind {
        self.core.state.kind
    }

    /// Returns the current priority. Higher runs first under reordering.
    pub fn priority(&self) -> i32 {
        self.core.state.priority()
    }

    /// Changes the priority. Takes effect at the owning queue's next re-sort.
    pub fn set_priority(&self, priority: i32) {
        self.core.state.priority.store(priority, Ordering::Relaxed);
    }

    /// Requests abort. Idempotent.
    ///
    /// A task that has not started will never run its body and ends
    /// immediately as failed. A running task must observe the flag itself.
    pub fn abort(&self) {
        self.core.state.abort();
    }

    /// Returns true once abort has been requested.
    pub fn is_aborted(&self) -> bool {
        self.core.state.is_aborted()
    }

    /// Returns true once the task has left the pending state.
    pub fn is_started(&self) -> bool {
        self.core.state.is_started()
    }

    /// Returns true once the task has ended, successfully or not.
    pub fn has_ended(&self) -> bool {
        self.core.state.has_ended()
    }

    /// Ended without being aborted.
    pub fn is_succeeded(&self) -> bool {
        self.outcome() == TaskOutcome::Succeeded
    }

    /// Ended after being aborted.
    pub fn is_failed(&self) -> bool {
        self.outcome() == TaskOutcome::Failed
    }

    /// Returns the current outcome.
    pub fn outcome(&self) -> TaskOutcome {
        self.core.state.outcome()
    }

    /// Blocks the calling thread until the task has ended.
    pub fn wait(&self) {
        self.core.state.wait();
    }

    /// Blocks until the task has ended or `timeout` elapses.
    ///
    /// Returns false on timeout. The task itself is unaffected.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.core.state.wait_timeout(timeout)
    }

    /// Blocks until the task has ended and returns a copy of its result.
    ///
    /// Repeated calls return the same value.
    pub fn result(&self) -> Result<T, TaskError>
    where
        T: Clone,
    {
        if self.kind() == TaskKind::Procedure {
            return Err(TaskError::ResultNotSupported);
        }
        self.wait();
        self.core
            .result
            .lock()
            .clone()
            .ok_or(TaskError::NoResult {
                task: self.id().as_u64(),
            })
    }

    /// Waits for a task that has started to end. Safe on tasks that never ran.
    pub fn dispose(&self) {
        self.core.state.wait_if_running();
    }

    pub(crate) fn runnable(&self) -> Arc<dyn Runnable> {
        Arc::clone(&self.core) as Arc<dyn Runnable>
    }

    pub(crate) fn state(&self) -> &TaskState {
        &self.core.state
    }
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.core.state.id)
            .field("kind", &self.core.state.kind)
            .field("priority", &self.core.state.priority())
            .field("outcome", &self.core.state.outcome())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn run(task: &Arc<dyn Runnable>) -> bool {
        task.run("test", None)
    }

    #[test]
    fn test_task_ids_are_unique() {
        let a = Task::procedure(|_| {});
        let b = Task::procedure(|_| {});
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = Task::function(|_| 1);
        assert_eq!(task.outcome(), TaskOutcome::Pending);
        assert!(!task.is_started());
        assert!(!task.has_ended());
        assert!(!task.is_succeeded());
        assert!(!task.is_failed());
    }

    #[test]
    fn test_function_task_result() {
        let task = Task::function(|_| 6 * 7);
        assert!(run(&task.runnable()));

        assert!(task.is_succeeded());
        assert_eq!(task.result(), Ok(42));
        assert_eq!(task.result(), Ok(42));
    }

    #[test]
    fn test_procedure_result_not_supported() {
        let task = Task::procedure(|_| {});
        assert_eq!(task.result(), Err(TaskError::ResultNotSupported));
    }

    #[test]
    fn test_abort_before_run_skips_body() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let task = Task::procedure(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        task.abort();
        assert!(task.has_ended());
        assert!(task.is_failed());

        assert!(!run(&task.runnable()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_abort_is_idempotent() {
        let task = Task::function(|_| 1);
        task.abort();
        task.abort();
        assert!(task.is_failed());
        assert_eq!(
            task.result(),
            Err(TaskError::NoResult {
                task: task.id().as_u64()
            })
        );
    }

    #[test]
    fn test_abort_while_running_is_cooperative() {
        let started = crate::sync::Signal::new();
        let started_clone = started.clone();
        let task = Task::function(move |ctx| {
            started_clone.set();
            let mut spins = 0u32;
            while !ctx.is_aborted() {
                spins += 1;
                thread::sleep(Duration::from_millis(1));
            }
            spins
        });

        let runnable = task.runnable();
        let handle = thread::spawn(move || runnable.run("test", None));

        started.wait();
        task.abort();
        assert!(handle.join().unwrap());

        assert!(task.has_ended());
        assert!(task.is_failed());
        assert!(task.result().is_ok());
    }

    #[test]
    fn test_body_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let task = Task::procedure(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        let runnable = task.runnable();
        assert!(runnable.run("test", None));
        assert!(!runnable.run("test", None));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_timeout_returns_false_without_side_effects() {
        let task = Task::function(|_| 1);
        assert!(!task.wait_timeout(Duration::from_millis(10)));
        assert_eq!(task.outcome(), TaskOutcome::Pending);
        assert!(!task.is_aborted());
    }

    #[test]
    fn test_wait_timeout_with_unbounded_duration() {
        let task = Task::function(|_| 3);
        assert!(task.runnable().run("test", None));

        assert!(task.wait_timeout(Duration::MAX));
        assert_eq!(task.result(), Ok(3));
    }

    #[test]
    fn test_wait_blocks_until_ended() {
        let task = Task::function(|_| {
            thread::sleep(Duration::from_millis(20));
            "done".to_string()
        });

        let runnable = task.runnable();
        let handle = thread::spawn(move || runnable.run("test", None));

        task.wait();
        assert!(task.has_ended());
        assert_eq!(task.result().unwrap(), "done");
        handle.join().unwrap();
    }

    #[test]
    fn test_context_exposes_queue_and_worker() {
        let task = Task::function(|ctx| (ctx.queue_name().to_string(), ctx.worker_index()));
        assert!(task.runnable().run("worker-2", Some(2)));
        assert_eq!(task.result().unwrap(), ("worker-2".to_string(), Some(2)));
    }

    #[test]
    fn test_context_abort_marks_failed() {
        let task = Task::function(|ctx| {
            ctx.abort();
            5
        });
        run(&task.runnable());
        assert!(task.is_failed());
        assert_eq!(task.result(), Ok(5));
    }

    #[test]
    fn test_function_safe_catches_panic() {
        let task: Task<u32> = Task::function_safe(|_| panic!("tile decode failed"));
        run(&task.runnable());

        assert!(task.has_ended());
        assert!(task.is_failed());
        assert_eq!(task.result(), Ok(0));
    }

    #[test]
    fn test_panicking_body_still_ends() {
        let task: Task<u32> = Task::function(|_| panic!("boom"));
        let runnable = task.runnable();
        let joined = thread::spawn(move || runnable.run("test", None)).join();

        assert!(joined.is_err());
        assert!(task.has_ended());
        assert!(!task.is_aborted());
    }

    #[test]
    fn test_dispose_on_never_run_task() {
        let task = Task::procedure(|_| {});
        task.dispose();
        assert!(!task.has_ended());
    }

    #[test]
    fn test_priority_round_trip() {
        let task = Task::procedure(|_| {}).with_priority(5);
        assert_eq!(task.priority(), 5);
        task.set_priority(-1);
        assert_eq!(task.priority(), -1);
    }

    #[test]
    fn test_mark_dispatched_once() {
        let task = Task::procedure(|_| {});
        assert!(task.state().mark_dispatched());
        assert!(!task.state().mark_dispatched());
    }
}
