//! tilework - cooperative job scheduling and worker-pool task execution.
//!
//! The crate has two independent layers:
//!
//! - [`job`]: a single-threaded, cooperative scheduler. Jobs wrap resumable
//!   computations that advance one step per host tick and can be paused,
//!   killed (immediately or after a delay) and chained parent → children.
//! - [`task`] and [`pool`]: real threads. Tasks are cancelable, waitable
//!   units of work dispatched into thread-owned queues; a worker pool
//!   balances them across a fixed set of workers.
//!
//! # High-Level API
//!
//! ```ignore
//! use tilework::config::ConfigFile;
//! use tilework::context::ConcurrencyContext;
//! use tilework::job::{counted, JobOwner};
//!
//! let context = ConcurrencyContext::init(&ConfigFile::default())?;
//!
//! let sum = context.pool().dispatch_fn(|_| (1..=10).sum::<u32>())?;
//! let job = context.scheduler().create_job(counted(5), JobOwner::none(), true);
//!
//! tokio::spawn(context.tick_driver().run(shutdown.clone()));
//! assert_eq!(sum.result()?, 55);
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod job;
pub mod logging;
pub mod pool;
pub mod sync;
pub mod task;
pub mod telemetry;

/// Version of the tilework library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
