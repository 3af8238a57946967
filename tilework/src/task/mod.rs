//! Task layer: cancelable, waitable units of work and the queues that run them.
//!
//! - [`Task`]: a procedure or function with cooperative abort, blocking wait,
//!   and (for functions) a typed result.
//! - [`DispatchQueue`]: an ordered, thread-owned list of tasks executed
//!   sequentially, with three [`ReorderPolicy`] variants.
//!
//! Tasks are distributed across threads by
//! [`WorkerPool`](crate::pool::WorkerPool).

mod queue;
#[allow(clippy::module_inception)]
mod task;

pub use queue::{DispatchQueue, QueuedTask, ReorderPolicy};
pub use task::{Task, TaskContext, TaskId, TaskKind, TaskOutcome};
