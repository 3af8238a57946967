//! Job handle and per-visit stepping.
//!
//! A job wraps one resumable computation. The scheduler visits every live job
//! once per tick; a visit advances the computation by at most one step.
//!
//! # Lifecycle
//!
//! 1. Created by [`JobScheduler::create_job`](super::JobScheduler::create_job)
//! 2. Started: registered with the scheduler, running from the next tick
//! 3. First visit: no step is taken
//! 4. Each later visit: one step, unless paused
//! 5. Computation exhausted: queued children run one after another
//! 6. Completion callbacks fire once, with `was_killed` and the owner
//!
//! Flags live under one lock and the computation under another, so `kill`,
//! `pause` and child management stay callable from inside a step.

use super::scheduler::SchedulerInner;
use super::step::{Resumable, Step};
use super::timer::{DelayTimer, TimerHandle};
use crate::error::JobError;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Global counter for generating unique job IDs.
static JOB_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a job.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct JobId(u64);

impl JobId {
    /// Creates a unique auto-generated job ID.
    pub fn auto() -> Self {
        Self(JOB_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value of this ID.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Opaque owner reference, handed back in the completion notification.
///
/// The scheduler never inspects it.
#[derive(Clone, Default)]
pub struct JobOwner(Option<Arc<dyn Any + Send + Sync>>);

impl JobOwner {
    /// No owner.
    pub fn none() -> Self {
        Self(None)
    }

    /// Wraps `value` as the owner.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    /// Uses an existing shared value as the owner.
    pub fn from_arc(value: Arc<dyn Any + Send + Sync>) -> Self {
        Self(Some(value))
    }

    /// Returns true if there is no owner.
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Returns the owner as `T`, if it is one.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|v| v.downcast_ref::<T>())
    }
}

impl fmt::Debug for JobOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => write!(f, "JobOwner(..)"),
            None => write!(f, "JobOwner(None)"),
        }
    }
}

/// Observable state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    /// Not started yet.
    Created,
    /// Registered and stepping, or waiting for its pending notification.
    Running,
    /// Registered but not stepping.
    Paused,
    /// The completion notification has been sent.
    Finished { was_killed: bool },
}

impl JobStatus {
    /// Returns true for [`JobStatus::Finished`].
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

/// Completion callback: `(job, was_killed, owner)`.
pub type CompletionCallback = Box<dyn FnOnce(&Job, bool, &JobOwner) + Send + 'static>;

struct Flags {
    started: bool,
    running: bool,
    paused: bool,
    was_killed: bool,
    visited: bool,
    notified: bool,
    kill_timer: Option<TimerHandle>,
}

enum Frame {
    Unit(Box<dyn Resumable>),
    Job(Job),
}

struct Body {
    frames: Vec<Frame>,
}

#[derive(Default)]
struct Children {
    queued: VecDeque<Job>,
    active: Option<Job>,
}

pub(crate) struct JobInner {
    id: JobId,
    owner: JobOwner,
    flags: Mutex<Flags>,
    body: Mutex<Body>,
    children: Mutex<Children>,
    callbacks: Mutex<Vec<CompletionCallback>>,
    steps: AtomicU64,
    scheduler: Weak<SchedulerInner>,
    timer: Arc<dyn DelayTimer>,
    telemetry: Arc<dyn TelemetrySink>,
}

/// Handle to a job. Clones refer to the same job.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    pub(crate) fn new(
        computation: Box<dyn Resumable>,
        owner: JobOwner,
        scheduler: Weak<SchedulerInner>,
        timer: Arc<dyn DelayTimer>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            inner: Arc::new(JobInner {
                id: JobId::auto(),
                owner,
                flags: Mutex::new(Flags {
                    started: false,
                    running: false,
                    paused: false,
                    was_killed: false,
                    visited: false,
                    notified: false,
                    kill_timer: None,
                }),
                body: Mutex::new(Body {
                    frames: vec![Frame::Unit(computation)],
                }),
                children: Mutex::new(Children::default()),
                callbacks: Mutex::new(Vec::new()),
                steps: AtomicU64::new(0),
                scheduler,
                timer,
                telemetry,
            }),
        }
    }

    /// Returns the job ID.
    pub fn id(&self) -> JobId {
        self.inner.id
    }

    /// Returns the owner given at creation.
    pub fn owner(&self) -> &JobOwner {
        &self.inner.owner
    }

    /// Number of times the computation (or an awaited sub-unit) was resumed.
    pub fn steps_taken(&self) -> u64 {
        self.inner.steps.load(Ordering::Relaxed)
    }

    /// Returns the current status.
    pub fn status(&self) -> JobStatus {
        let flags = self.inner.flags.lock();
        if flags.notified {
            JobStatus::Finished {
                was_killed: flags.was_killed,
            }
        } else if !flags.started {
            JobStatus::Created
        } else if flags.running && flags.paused {
            JobStatus::Paused
        } else {
            JobStatus::Running
        }
    }

    /// Returns true once the job has been started.
    pub fn is_started(&self) -> bool {
        self.inner.flags.lock().started
    }

    /// Returns true while the job is started and not yet finished or killed.
    pub fn is_running(&self) -> bool {
        self.inner.flags.lock().running
    }

    /// Returns true while paused.
    pub fn is_paused(&self) -> bool {
        self.inner.flags.lock().paused
    }

    /// Returns true once the job has been killed.
    pub fn was_killed(&self) -> bool {
        self.inner.flags.lock().was_killed
    }

    /// Returns true once the completion notification has been sent.
    pub fn is_finished(&self) -> bool {
        self.inner.flags.lock().notified
    }

    /// Registers the job with its scheduler. It steps from the next tick on.
    ///
    /// Starting a job twice, or after it finished, does nothing. A job killed
    /// before it was started is registered only to deliver its notification.
    pub fn start(&self) {
        {
            let mut flags = self.inner.flags.lock();
            if flags.started {
                return;
            }
            flags.started = true;
            if !flags.was_killed {
                flags.running = true;
            }
        }

        match self.inner.scheduler.upgrade() {
            Some(scheduler) => {
                scheduler.register(self.clone());
                self.inner
                    .telemetry
                    .emit(TelemetryEvent::JobStarted { job_id: self.id() });
                debug!(job_id = %self.id(), "Job started");
            }
            None => {
                warn!(job_id = %self.id(), "Job started after its scheduler was dropped");
            }
        }
    }

    /// Stops stepping without unregistering.
    pub fn pause(&self) {
        self.inner.flags.lock().paused = true;
    }

    /// Resumes stepping on the next visit.
    pub fn unpause(&self) {
        self.inner.flags.lock().paused = false;
    }

    /// Kills the job. Takes effect at the next visit; a step in progress is
    /// never interrupted.
    ///
    /// The active child and any awaited job are killed along with it, and
    /// this job notifies only after they have. Queued children never start.
    pub fn kill(&self) {
        let mut flags = self.inner.flags.lock();
        if flags.notified {
            return;
        }
        flags.was_killed = true;
        flags.running = false;
        flags.paused = false;
        if let Some(timer) = flags.kill_timer.take() {
            timer.cancel();
        }
        trace!(job_id = %self.id(), "Job killed");
    }

    /// Kills the job after `delay`, independently of the tick rate.
    ///
    /// The kill waits for any step in progress. Scheduling again replaces the
    /// previous timer.
    pub fn kill_after(&self, delay: Duration) -> TimerHandle {
        let weak = Arc::downgrade(&self.inner);
        let handle = self.inner.timer.schedule(
            delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let job = Job { inner };
                    let _stepping = job.inner.body.lock();
                    job.kill();
                }
            }),
        );

        if let Some(previous) = self.inner.flags.lock().kill_timer.replace(handle.clone()) {
            previous.cancel();
        }

        self.inner.telemetry.emit(TelemetryEvent::JobKillScheduled {
            job_id: self.id(),
            delay,
        });
        handle
    }

    /// Queues a not-yet-started job to run after this job's own computation.
    pub fn add_child(&self, child: &Job) -> Result<(), JobError> {
        if child.inner_ptr_eq(self) {
            return Err(JobError::ChildOfItself {
                job: self.id().as_u64(),
            });
        }
        if child.is_started() {
            return Err(JobError::ChildAlreadyStarted {
                job: child.id().as_u64(),
            });
        }

        self.inner.children.lock().queued.push_back(child.clone());
        trace!(job_id = %self.id(), child_id = %child.id(), "Child job queued");
        Ok(())
    }

    /// Creates a child job from `computation` and queues it.
    ///
    /// The child shares this job's scheduler and owner.
    pub fn create_child<R: Resumable + 'static>(&self, computation: R) -> Job {
        let child = Job::new(
            Box::new(computation),
            self.inner.owner.clone(),
            self.inner.scheduler.clone(),
            Arc::clone(&self.inner.timer),
            Arc::clone(&self.inner.telemetry),
        );
        self.inner.children.lock().queued.push_back(child.clone());
        child
    }

    /// Removes a queued child. Returns false, with a diagnostic, if it is not queued.
    pub fn remove_child(&self, child: &Job) -> bool {
        let mut children = self.inner.children.lock();
        let before = children.queued.len();
        children.queued.retain(|c| !c.inner_ptr_eq(child));
        let removed = children.queued.len() != before;
        drop(children);

        if !removed {
            warn!(
                job_id = %self.id(),
                child_id = %child.id(),
                "Tried to remove a child job that is not queued"
            );
        }
        removed
    }

    /// Number of children still waiting to start.
    pub fn queued_children(&self) -> usize {
        self.inner.children.lock().queued.len()
    }

    /// Registers a completion callback.
    ///
    /// If the job has already finished, the callback runs immediately.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&Job, bool, &JobOwner) + Send + 'static,
    {
        let finished = {
            let flags = self.inner.flags.lock();
            if flags.notified {
                Some(flags.was_killed)
            } else {
                self.inner.callbacks.lock().push(Box::new(callback));
                return;
            }
        };

        if let Some(was_killed) = finished {
            callback(self, was_killed, &self.inner.owner);
        }
    }

    fn inner_ptr_eq(&self, other: &Job) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Visits the job once. Returns true when the job is finished and should
    /// be dropped from the scheduler.
    pub(crate) fn visit(&self) -> bool {
        {
            let mut flags = self.inner.flags.lock();
            if flags.notified {
                return true;
            }
            if flags.running {
                if !flags.visited {
                    flags.visited = true;
                    return false;
                }
                if flags.paused {
                    return false;
                }
            }
        }

        if self.is_running() && !self.advance() {
            return false;
        }
        if self.was_killed() && !self.wind_down() {
            return false;
        }

        self.finish();
        true
    }

    /// Kills the active child and any awaited job, dropping queued children.
    /// Returns true once every killed dependent has sent its notification.
    fn wind_down(&self) -> bool {
        let mut dependents = Vec::new();
        {
            let mut children = self.inner.children.lock();
            if !children.queued.is_empty() {
                debug!(
                    job_id = %self.id(),
                    dropped = children.queued.len(),
                    "Killed job dropped its queued children"
                );
                children.queued.clear();
            }
            dependents.extend(children.active.clone());
        }
        dependents.extend(self.inner.body.lock().frames.iter().filter_map(|frame| match frame {
            Frame::Job(awaited) => Some(awaited.clone()),
            Frame::Unit(_) => None,
        }));

        for job in &dependents {
            if !job.was_killed() {
                job.kill();
            }
        }
        dependents.iter().all(Job::is_finished)
    }

    /// Performs one step of work. Returns true once the computation and all
    /// children are exhausted, or the job was killed meanwhile.
    fn advance(&self) -> bool {
        let exhausted = self.step_computation();
        if !exhausted {
            return false;
        }
        if !self.is_running() {
            return true;
        }
        self.drive_children()
    }

    /// Returns true once every frame has been popped.
    fn step_computation(&self) -> bool {
        let mut body = self.inner.body.lock();

        let step = match body.frames.last_mut() {
            None => return true,
            Some(Frame::Job(awaited)) => {
                if awaited.is_finished() {
                    body.frames.pop();
                }
                return false;
            }
            Some(Frame::Unit(unit)) => {
                self.inner.steps.fetch_add(1, Ordering::Relaxed);
                unit.resume()
            }
        };

        match step {
            Step::Continue => false,
            Step::Await(unit) => {
                body.frames.push(Frame::Unit(unit));
                false
            }
            Step::AwaitJob(job) if job.inner_ptr_eq(self) => {
                warn!(job_id = %self.id(), "Job tried to await itself, continuing");
                false
            }
            Step::AwaitJob(job) => {
                job.start();
                body.frames.push(Frame::Job(job));
                false
            }
            Step::Done => {
                body.frames.pop();
                body.frames.is_empty()
            }
        }
    }

    /// Starts the next child when none is active. Returns true once every
    /// child has finished.
    fn drive_children(&self) -> bool {
        let mut children = self.inner.children.lock();

        if let Some(active) = &children.active {
            if !active.is_finished() {
                return false;
            }
            children.active = None;
        }

        match children.queued.pop_front() {
            Some(next) => {
                children.active = Some(next.clone());
                drop(children);
                debug!(job_id = %self.id(), child_id = %next.id(), "Starting child job");
                next.start();
                false
            }
            None => true,
        }
    }

    /// Sends the completion notification exactly once.
    fn finish(&self) {
        let (was_killed, timer) = {
            let mut flags = self.inner.flags.lock();
            if flags.notified {
                return;
            }
            flags.notified = true;
            flags.running = false;
            flags.paused = false;
            (flags.was_killed, flags.kill_timer.take())
        };

        if let Some(timer) = timer {
            timer.cancel();
        }

        if was_killed {
            *self.inner.children.lock() = Children::default();
            self.inner.body.lock().frames.clear();
        }

        let steps = self.steps_taken();
        self.inner.telemetry.emit(TelemetryEvent::JobCompleted {
            job_id: self.id(),
            was_killed,
            steps,
        });
        debug!(job_id = %self.id(), was_killed, steps, "Job completed");

        let callbacks = std::mem::take(&mut *self.inner.callbacks.lock());
        for callback in callbacks {
            callback(self, was_killed, &self.inner.owner);
        }
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.inner_ptr_eq(other)
    }
}

impl Eq for Job {}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("steps", &self.steps_taken())
            .finish()
    }
}
