//! Host tick source for the job scheduler.

use super::scheduler::JobScheduler;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default interval between scheduler ticks (roughly one display frame).
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 16;

/// Drives [`JobScheduler::tick`] from a tokio interval.
pub struct TickDriver {
    scheduler: JobScheduler,
    interval: Duration,
}

impl TickDriver {
    /// Creates a driver ticking `scheduler` every `interval`.
    pub fn new(scheduler: JobScheduler, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
        }
    }

    /// Creates a driver with the default interval.
    pub fn with_default_interval(scheduler: JobScheduler) -> Self {
        Self::new(scheduler, Duration::from_millis(DEFAULT_TICK_INTERVAL_MS))
    }

    /// Returns the tick interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ticks until `shutdown` is cancelled. Returns the number of ticks driven.
    ///
    /// Missed ticks are skipped rather than replayed in a burst.
    pub async fn run(self, shutdown: CancellationToken) -> u64 {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut driven = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.scheduler.tick();
                    driven += 1;
                }
            }
        }

        debug!(ticks = driven, "Tick driver stopped");
        driven
    }

    /// Ticks until the scheduler has no registered jobs or `shutdown` is cancelled.
    pub async fn run_until_idle(self, shutdown: CancellationToken) -> u64 {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut driven = 0u64;

        while !self.scheduler.is_idle() {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.scheduler.tick();
                    driven += 1;
                }
            }
        }

        debug!(ticks = driven, "Tick driver idle");
        driven
    }
}
