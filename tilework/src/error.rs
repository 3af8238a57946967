//! Error types for the concurrency core.
//!
//! Every variant here is a misuse error: it is reported synchronously at the
//! call site and never retried. Cooperative cancellation (aborted tasks,
//! killed jobs) is not an error and is surfaced through task/job state instead.

use std::io;
use std::thread::ThreadId;
use thiserror::Error;

/// Errors raised when dispatching tasks into a queue or worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The current thread already has a dispatch queue bound to it.
    #[error("A dispatch queue is already bound to thread {thread:?}")]
    QueueAlreadyBound { thread: ThreadId },

    /// The queue is already owned by another thread.
    #[error("Dispatch queue '{queue}' is already bound to thread {owner:?}")]
    QueueOwned { queue: String, owner: ThreadId },

    /// Dispatch into a queue from the thread that owns it.
    ///
    /// The owning thread would deadlock waiting on work only it can run.
    #[error("Cannot dispatch into queue '{queue}' from its own thread")]
    SelfDispatch { queue: String },

    /// Dispatch into a worker pool from one of its own workers.
    #[error("Cannot dispatch into the worker pool from its own worker {worker}")]
    WorkerSelfDispatch { worker: usize },

    /// The task was already handed to a queue.
    #[error("Task {task} has already been dispatched")]
    AlreadyDispatched { task: u64 },

    /// The queue or pool has been disposed.
    #[error("Dispatch target '{queue}' has been disposed")]
    Disposed { queue: String },
}

/// Errors raised when reading a task's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task wraps a procedure and has no result slot.
    #[error("Operation not supported: procedure tasks do not produce a result")]
    ResultNotSupported,

    /// The task ended without its function producing a value.
    #[error("Task {task} ended without producing a result")]
    NoResult { task: u64 },
}

/// Errors raised when composing parent/child jobs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// Only jobs that have not been started can be queued as children.
    #[error("Job {job} has already been started and cannot become a child")]
    ChildAlreadyStarted { job: u64 },

    /// A job cannot be its own child.
    #[error("Job {job} cannot be added as a child of itself")]
    ChildOfItself { job: u64 },
}

/// Errors raised while starting a worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The operating system refused to spawn a worker thread.
    #[error("Failed to spawn worker thread {worker}: {source}")]
    Spawn { worker: usize, source: io::Error },
}
