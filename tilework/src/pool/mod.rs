//! Fixed-size worker pool fed from a shared backlog.
//!
//! ```ignore
//! use tilework::pool::{PoolConfig, WorkerPool};
//!
//! let pool = WorkerPool::new(PoolConfig::default().with_workers(4))?;
//! let task = pool.dispatch_fn(|_ctx| 6 * 7)?;
//! assert_eq!(task.result()?, 42);
//! pool.dispose();
//! ```

mod distributor;
mod worker;

pub use distributor::{
    default_worker_count, PoolConfig, PoolStats, WorkerPool, DEFAULT_THREAD_NAME_PREFIX,
    FALLBACK_CPU_COUNT, WORKERS_PER_CPU,
};
