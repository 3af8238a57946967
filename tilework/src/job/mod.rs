//! Cooperative job scheduler.
//!
//! Jobs wrap resumable computations and are advanced one step per tick by a
//! [`JobScheduler`]. Work is cooperative: a step is never interrupted, so
//! pause and kill take effect between steps.
//!
//! # Example
//!
//! ```ignore
//! use tilework::job::{counted, JobOwner, JobScheduler};
//!
//! let scheduler = JobScheduler::new();
//! let job = scheduler.create_job(counted(3), JobOwner::none(), false);
//! job.create_child(counted(2));
//! job.on_complete(|job, was_killed, _owner| {
//!     println!("{} finished, killed: {}", job.id(), was_killed);
//! });
//! job.start();
//!
//! while !scheduler.is_idle() {
//!     scheduler.tick();
//! }
//! ```

#[allow(clippy::module_inception)]
mod job;
mod scheduler;
mod step;
mod ticker;
mod timer;

pub use job::{CompletionCallback, Job, JobId, JobOwner, JobStatus};
pub use scheduler::JobScheduler;
pub use step::{counted, from_iter, IterSteps, Resumable, Step};
pub use ticker::{TickDriver, DEFAULT_TICK_INTERVAL_MS};
pub use timer::{
    default_timer, DelayTimer, ThreadDelayTimer, TimerCallback, TimerHandle, TokioDelayTimer,
};
