//! Lifecycle of the process-wide scheduler and main worker pool.
//!
//! `ConcurrencyContext` owns the job scheduler and the main worker pool, so
//! both are created and torn down explicitly instead of living in globals.
//!
//! # Usage
//!
//! ```ignore
//! use tilework::config::ConfigFile;
//! use tilework::context::ConcurrencyContext;
//!
//! let context = ConcurrencyContext::init(&ConfigFile::load()?)?;
//!
//! let task = context.pool().dispatch_fn(|_| 1 + 1)?;
//! context.scheduler().create_job(my_computation, JobOwner::none(), true);
//!
//! context.shutdown();
//! ```

use crate::config::ConfigFile;
use crate::error::PoolError;
use crate::job::{default_timer, JobScheduler, TickDriver};
use crate::pool::WorkerPool;
use crate::telemetry::{NullTelemetrySink, TelemetrySink};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Explicitly initialised scheduler plus main worker pool.
pub struct ConcurrencyContext {
    scheduler: JobScheduler,
    pool: Arc<WorkerPool>,
    tick_interval: Duration,
}

impl ConcurrencyContext {
    /// Builds the scheduler and main pool from `config`, without telemetry.
    pub fn init(config: &ConfigFile) -> Result<Self, PoolError> {
        Self::init_with_telemetry(config, Arc::new(NullTelemetrySink))
    }

    /// Builds the scheduler and main pool, both reporting to `telemetry`.
    pub fn init_with_telemetry(
        config: &ConfigFile,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, PoolError> {
        let scheduler = JobScheduler::with_parts(default_timer(), Arc::clone(&telemetry));
        let pool = WorkerPool::with_telemetry(config.pool.to_pool_config(), telemetry)?;

        info!(
            workers = pool.worker_count(),
            tick_interval_ms = config.jobs.tick_interval_ms,
            "Concurrency context initialised"
        );

        Ok(Self {
            scheduler,
            pool: Arc::new(pool),
            tick_interval: config.jobs.tick_interval(),
        })
    }

    /// The job scheduler.
    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    /// The main worker pool.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// A tick driver for the scheduler at the configured interval.
    pub fn tick_driver(&self) -> TickDriver {
        TickDriver::new(self.scheduler.clone(), self.tick_interval)
    }

    /// Kills all jobs, delivers their notifications, and disposes the pool.
    ///
    /// Consumes the context to prevent further use after shutdown.
    pub fn shutdown(self) {
        let killed = self.scheduler.kill_all();
        self.scheduler.tick();
        self.pool.dispose();
        info!(killed_jobs = killed, "Concurrency context shut down");
    }
}
