//! Telemetry for job and task execution.
//!
//! The scheduler, queues and worker pool emit structured events through a sink
//! abstraction and never decide how those events are presented. Consumers (the
//! CLI, logging, tests) plug in a [`TelemetrySink`].
//!
//! # Example
//!
//! ```ignore
//! use tilework::telemetry::{TelemetryEvent, TelemetrySink};
//!
//! struct LoggingSink;
//!
//! impl TelemetrySink for LoggingSink {
//!     fn emit(&self, event: TelemetryEvent) {
//!         tracing::info!(?event, "Scheduler event");
//!     }
//! }
//! ```

use crate::job::JobId;
use crate::task::{TaskId, TaskOutcome};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Telemetry Events
// =============================================================================

/// Events emitted by the job scheduler and the task layer.
#[derive(Clone, Debug)]
pub enum TelemetryEvent {
    // -------------------------------------------------------------------------
    // Job Events
    // -------------------------------------------------------------------------
    /// A job was registered with the scheduler.
    JobStarted { job_id: JobId },

    /// A job emitted its completion notification.
    JobCompleted {
        job_id: JobId,
        was_killed: bool,
        steps: u64,
    },

    /// A delayed kill was scheduled for a job.
    JobKillScheduled { job_id: JobId, delay: Duration },

    // -------------------------------------------------------------------------
    // Task Events
    // -------------------------------------------------------------------------
    /// A task was added to a queue.
    TaskDispatched {
        queue: String,
        task_id: TaskId,
        priority: i32,
        queue_depth: usize,
    },

    /// A task was popped from a queue and has ended.
    TaskCompleted {
        queue: String,
        task_id: TaskId,
        outcome: TaskOutcome,
        duration: Duration,
    },

    // -------------------------------------------------------------------------
    // Worker Pool Events
    // -------------------------------------------------------------------------
    /// A worker thread started its loop.
    WorkerStarted { worker: usize, seeded: usize },

    /// A worker thread left its loop.
    WorkerStopped { worker: usize },

    /// A worker pool was disposed.
    PoolDisposed { drained: usize },
}

impl TelemetryEvent {
    /// Returns the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::JobStarted { job_id }
            | Self::JobCompleted { job_id, .. }
            | Self::JobKillScheduled { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    /// Returns a short name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JobStarted { .. } => "job_started",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobKillScheduled { .. } => "job_kill_scheduled",
            Self::TaskDispatched { .. } => "task_dispatched",
            Self::TaskCompleted { .. } => "task_completed",
            Self::WorkerStarted { .. } => "worker_started",
            Self::WorkerStopped { .. } => "worker_stopped",
            Self::PoolDisposed { .. } => "pool_disposed",
        }
    }
}

// =============================================================================
// Telemetry Sink Trait
// =============================================================================

/// Sink for telemetry events.
///
/// Events are emitted from worker threads as well as from the thread driving
/// the job scheduler, so implementations must be `Send + Sync`. `emit` should
/// be fast and must not block.
pub trait TelemetrySink: Send + Sync {
    /// Called when a telemetry event occurs.
    fn emit(&self, event: TelemetryEvent);
}

// =============================================================================
// Built-in Sink Implementations
// =============================================================================

/// No-op sink, used when telemetry is not wanted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn emit(&self, _event: TelemetryEvent) {}
}

/// Sink that logs events using the `tracing` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::JobStarted { job_id } => {
                tracing::debug!(job_id = %job_id, "Job started");
            }
            TelemetryEvent::JobCompleted {
                job_id,
                was_killed,
                steps,
            } => {
                tracing::debug!(
                    job_id = %job_id,
                    was_killed = was_killed,
                    steps = steps,
                    "Job completed"
                );
            }
            TelemetryEvent::JobKillScheduled { job_id, delay } => {
                tracing::debug!(
                    job_id = %job_id,
                    delay_ms = delay.as_millis(),
                    "Job kill scheduled"
                );
            }
            TelemetryEvent::TaskDispatched {
                queue,
                task_id,
                priority,
                queue_depth,
            } => {
                tracing::trace!(
                    queue = %queue,
                    task_id = %task_id,
                    priority = priority,
                    queue_depth = queue_depth,
                    "Task dispatched"
                );
            }
            TelemetryEvent::TaskCompleted {
                queue,
                task_id,
                outcome,
                duration,
            } => {
                tracing::debug!(
                    queue = %queue,
                    task_id = %task_id,
                    outcome = %outcome,
                    duration_ms = duration.as_millis(),
                    "Task completed"
                );
            }
            TelemetryEvent::WorkerStarted { worker, seeded } => {
                tracing::debug!(worker = worker, seeded = seeded, "Worker started");
            }
            TelemetryEvent::WorkerStopped { worker } => {
                tracing::debug!(worker = worker, "Worker stopped");
            }
            TelemetryEvent::PoolDisposed { drained } => {
                tracing::info!(drained = drained, "Worker pool disposed");
            }
        }
    }
}

/// Sink that forwards events to multiple sinks.
pub struct MultiplexTelemetrySink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl MultiplexTelemetrySink {
    /// Creates a new multiplex sink with the given sinks.
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }

    /// Adds a sink to the multiplex.
    pub fn add_sink(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.sinks.push(sink);
    }
}

impl TelemetrySink for MultiplexTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

impl std::fmt::Debug for MultiplexTelemetrySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplexTelemetrySink")
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

/// Sink that records every event, for assertions in tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) events: parking_lot::Mutex<Vec<TelemetryEvent>>,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn types(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.event_type()).collect()
    }
}

#[cfg(test)]
impl TelemetrySink for RecordingSink {
    fn emit(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_null_sink() {
        let sink = NullTelemetrySink;
        sink.emit(TelemetryEvent::JobStarted {
            job_id: JobId::auto(),
        });
    }

    #[test]
    fn test_tracing_sink() {
        let sink = TracingTelemetrySink;
        sink.emit(TelemetryEvent::PoolDisposed { drained: 3 });
    }

    #[test]
    fn test_event_job_id() {
        let job_id = JobId::auto();

        let event = TelemetryEvent::JobCompleted {
            job_id,
            was_killed: false,
            steps: 4,
        };
        assert_eq!(event.job_id(), Some(job_id));

        let event = TelemetryEvent::WorkerStopped { worker: 0 };
        assert_eq!(event.job_id(), None);
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(
            TelemetryEvent::WorkerStarted {
                worker: 1,
                seeded: 10
            }
            .event_type(),
            "worker_started"
        );
        assert_eq!(
            TelemetryEvent::TaskCompleted {
                queue: "backlog".to_string(),
                task_id: TaskId::next(),
                outcome: TaskOutcome::Succeeded,
                duration: Duration::ZERO,
            }
            .event_type(),
            "task_completed"
        );
    }

    #[test]
    fn test_multiplex_sink() {
        struct CountingSink(AtomicUsize);

        impl TelemetrySink for CountingSink {
            fn emit(&self, _event: TelemetryEvent) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let sink1 = Arc::new(CountingSink(AtomicUsize::new(0)));
        let sink2 = Arc::new(CountingSink(AtomicUsize::new(0)));

        let multiplex = MultiplexTelemetrySink::new(vec![
            Arc::clone(&sink1) as Arc<dyn TelemetrySink>,
            Arc::clone(&sink2) as Arc<dyn TelemetrySink>,
        ]);

        multiplex.emit(TelemetryEvent::WorkerStopped { worker: 2 });

        assert_eq!(sink1.0.load(Ordering::Relaxed), 1);
        assert_eq!(sink2.0.load(Ordering::Relaxed), 1);
    }
}
