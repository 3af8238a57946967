//! Job scheduler: advances every live job by one step per external tick.

use super::job::{Job, JobId, JobOwner};
use super::step::Resumable;
use super::timer::{default_timer, DelayTimer};
use crate::telemetry::{NullTelemetrySink, TelemetrySink};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

pub(crate) struct SchedulerInner {
    live: Mutex<Vec<Job>>,
    pending: Mutex<Vec<Job>>,
    ticking: AtomicBool,
    ticks: Mutex<u64>,
    timer: Arc<dyn DelayTimer>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl SchedulerInner {
    /// Queues a started job; it joins the live set at the next tick.
    pub(crate) fn register(&self, job: Job) {
        self.pending.lock().push(job);
    }
}

/// Registry of live jobs, driven by a host tick source.
///
/// The scheduler is an explicit context object: create one, hand clones to
/// whoever creates jobs, and call [`tick`](Self::tick) from a single driver.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    /// Creates a scheduler with the default timer and no telemetry.
    pub fn new() -> Self {
        Self::with_parts(default_timer(), Arc::new(NullTelemetrySink))
    }

    /// Creates a scheduler with an explicit delayed-kill timer and telemetry sink.
    pub fn with_parts(timer: Arc<dyn DelayTimer>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                live: Mutex::new(Vec::new()),
                pending: Mutex::new(Vec::new()),
                ticking: AtomicBool::new(false),
                ticks: Mutex::new(0),
                timer,
                telemetry,
            }),
        }
    }

    /// Creates a job wrapping `computation`, optionally starting it.
    pub fn create_job<R>(&self, computation: R, owner: JobOwner, auto_start: bool) -> Job
    where
        R: Resumable + 'static,
    {
        let job = Job::new(
            Box::new(computation),
            owner,
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.timer),
            Arc::clone(&self.inner.telemetry),
        );
        if auto_start {
            job.start();
        }
        job
    }

    /// Visits every live job once.
    ///
    /// Jobs started during the tick, including children started by their
    /// parents, are first visited on the next tick. Finished jobs are dropped.
    /// Returns the number of jobs still registered afterwards.
    ///
    /// Calling `tick` from inside a job step is ignored with a warning.
    pub fn tick(&self) -> usize {
        if self.inner.ticking.swap(true, Ordering::AcqRel) {
            warn!("Reentrant JobScheduler::tick ignored");
            return self.job_count();
        }
        let _ticking = TickGuard(&self.inner.ticking);

        let joining = std::mem::take(&mut *self.inner.pending.lock());
        let snapshot = {
            let mut live = self.inner.live.lock();
            live.extend(joining);
            live.clone()
        };

        // Visit a snapshot so the live set stays visible to steps
        let finished: HashSet<JobId> = snapshot
            .iter()
            .filter(|job| job.visit())
            .map(Job::id)
            .collect();

        let remaining = {
            let mut live = self.inner.live.lock();
            if !finished.is_empty() {
                live.retain(|job| !finished.contains(&job.id()));
            }
            live.len()
        };

        let tick = {
            let mut ticks = self.inner.ticks.lock();
            *ticks += 1;
            *ticks
        };
        trace!(tick, live = remaining, "Scheduler tick");

        remaining + self.inner.pending.lock().len()
    }

    /// Number of registered jobs, including ones waiting for their first tick.
    pub fn job_count(&self) -> usize {
        self.inner.live.lock().len() + self.inner.pending.lock().len()
    }

    /// Returns true when no job is registered.
    pub fn is_idle(&self) -> bool {
        self.job_count() == 0
    }

    /// Number of completed ticks.
    pub fn ticks(&self) -> u64 {
        *self.inner.ticks.lock()
    }

    /// Kills every registered job. Notifications go out on the next tick.
    pub fn kill_all(&self) -> usize {
        let mut jobs: Vec<Job> = self.inner.live.lock().clone();
        jobs.extend(self.inner.pending.lock().iter().cloned());
        for job in &jobs {
            job.kill();
        }
        jobs.len()
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobScheduler")
            .field("jobs", &self.job_count())
            .field("ticks", &self.ticks())
            .finish()
    }
}

/// Clears the ticking flag, also when a job step panics.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
