//! Integration tests for tasks, dispatch queues and the worker pool.
//!
//! These tests verify:
//! - Priority reordering and cooperative abort on a bound queue
//! - Result retrieval and blocking waits across threads
//! - Backlog seeding, pull-based balancing and disposal of a worker pool

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tilework::error::{DispatchError, TaskError};
use tilework::pool::{PoolConfig, WorkerPool};
use tilework::sync::Signal;
use tilework::task::{DispatchQueue, ReorderPolicy, Task, TaskOutcome};
use tilework::telemetry::{TelemetryEvent, TelemetrySink};

// =============================================================================
// Test Helpers
// =============================================================================

/// Records the seed count reported by each worker as it starts.
#[derive(Default)]
struct SeedRecorder {
    seeded: Mutex<Vec<(usize, usize)>>,
    completed: AtomicUsize,
}

impl TelemetrySink for SeedRecorder {
    fn emit(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::WorkerStarted { worker, seeded } => {
                self.seeded.lock().push((worker, seeded));
            }
            TelemetryEvent::TaskCompleted { .. } => {
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

/// Runs `f` on a fresh thread that owns `queue`, returning its result.
fn on_owner_thread<R: Send + 'static>(
    queue: DispatchQueue,
    f: impl FnOnce(&DispatchQueue) -> R + Send + 'static,
) -> R {
    thread::spawn(move || {
        queue.bind_to_current_thread().unwrap();
        f(&queue)
    })
    .join()
    .unwrap()
}

// =============================================================================
// Queue Tests
// =============================================================================

#[test]
fn test_reorder_when_added_pops_highest_first() {
    let queue = DispatchQueue::new("main", ReorderPolicy::ReorderWhenAdded);
    let order = Arc::new(Mutex::new(Vec::new()));

    for priority in [1, 5, 3] {
        let order = Arc::clone(&order);
        let task = Task::procedure(move |ctx| order.lock().push(ctx.priority()))
            .with_priority(priority);
        queue.dispatch(&task).unwrap();
    }

    let processed = on_owner_thread(queue, |queue| queue.process_tasks());

    assert_eq!(processed, 3);
    assert_eq!(*order.lock(), vec![5, 3, 1]);
}

#[test]
fn test_aborted_task_never_runs() {
    let queue = DispatchQueue::new("main", ReorderPolicy::NeverReorder);
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    let task = Task::procedure(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    queue.dispatch(&task).unwrap();
    task.abort();
    on_owner_thread(queue, |queue| queue.process_tasks());

    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert!(task.has_ended());
    assert!(task.is_failed());
    assert!(!task.is_succeeded());
}

#[test]
fn test_cross_thread_dispatch_into_bound_queue() {
    let (queue_tx, queue_rx) = std::sync::mpsc::channel();
    let stop = Signal::new();
    let owner_stop = stop.clone();

    let owner = thread::spawn(move || {
        let queue = DispatchQueue::bind_current("ui", ReorderPolicy::NeverReorder).unwrap();
        queue_tx.send(queue.clone()).unwrap();
        let mut processed = 0;
        while !owner_stop.is_set() {
            processed += queue.process_tasks_until(&owner_stop);
            queue.wait_for_tasks(Some(&owner_stop), Some(Duration::from_millis(10)));
        }
        processed
    });

    let queue: DispatchQueue = queue_rx.recv().unwrap();
    let task = Task::function(|ctx| ctx.queue_name().to_string());
    queue.dispatch(&task).unwrap();

    assert_eq!(task.result(), Ok("ui".to_string()));
    stop.set();
    assert_eq!(owner.join().unwrap(), 1);
}

#[test]
fn test_result_is_stable_across_waits() {
    let queue = DispatchQueue::new("main", ReorderPolicy::NeverReorder);
    let task = Task::function(|_| vec![1, 2, 3]);
    let procedure = Task::procedure(|_| {});
    queue.dispatch(&task).unwrap();
    queue.dispatch(&procedure).unwrap();

    let waiter = {
        let task = task.clone();
        thread::spawn(move || task.result())
    };
    on_owner_thread(queue, |queue| queue.process_tasks());

    assert_eq!(waiter.join().unwrap(), Ok(vec![1, 2, 3]));
    assert_eq!(task.result(), Ok(vec![1, 2, 3]));
    assert!(task.wait_timeout(Duration::ZERO));
    assert_eq!(procedure.result(), Err(TaskError::ResultNotSupported));
}

#[test]
fn test_wait_timeout_does_not_cancel() {
    let task = Task::function(|_| 9);
    assert!(!task.wait_timeout(Duration::from_millis(10)));
    assert_eq!(task.outcome(), TaskOutcome::Pending);
    assert!(!task.is_aborted());

    let queue = DispatchQueue::new("main", ReorderPolicy::NeverReorder);
    queue.dispatch(&task).unwrap();
    on_owner_thread(queue, |queue| queue.process_next_task());
    assert_eq!(task.result(), Ok(9));
}

// =============================================================================
// Worker Pool Tests
// =============================================================================

#[test]
fn test_pool_seeds_equal_shares() {
    let recorder = Arc::new(SeedRecorder::default());
    let pool = WorkerPool::with_telemetry(
        PoolConfig::default().with_workers(4).with_auto_start(false),
        Arc::clone(&recorder) as Arc<dyn TelemetrySink>,
    )
    .unwrap();

    let tasks: Vec<Task> = (0..40)
        .map(|_| pool.dispatch_procedure(|_| {}).unwrap())
        .collect();
    assert_eq!(pool.stats().backlog, 40);

    pool.start().unwrap();
    for task in &tasks {
        assert!(task.wait_timeout(Duration::from_secs(10)));
    }

    let mut seeded = recorder.seeded.lock().clone();
    seeded.sort();
    assert_eq!(seeded, vec![(0, 10), (1, 10), (2, 10), (3, 10)]);
    assert!(tasks.iter().all(|t| t.is_succeeded()));
    pool.dispose();
}

#[test]
fn test_pool_runs_every_task_exactly_once() {
    let pool = WorkerPool::new(
        PoolConfig::default()
            .with_workers(4)
            .with_reorder(ReorderPolicy::ReorderWhenAdded),
    )
    .unwrap();
    let runs = Arc::new(Mutex::new(vec![0u32; 200]));

    let tasks: Vec<Task> = (0..200)
        .map(|i| {
            let runs = Arc::clone(&runs);
            let task = Task::procedure(move |_| runs.lock()[i] += 1).with_priority((i % 7) as i32);
            pool.dispatch(&task).unwrap();
            task
        })
        .collect();

    for task in &tasks {
        task.wait();
    }

    assert!(runs.lock().iter().all(|&n| n == 1));
    assert_eq!(pool.stats().total_queued(), 0);
    pool.dispose();
}

#[test]
fn test_pool_function_results() {
    let pool = WorkerPool::new(PoolConfig::default().with_workers(3)).unwrap();

    let squares: Vec<Task<u64>> = (0..50u64)
        .map(|n| pool.dispatch_fn(move |_| n * n).unwrap())
        .collect();

    let total: u64 = squares.iter().map(|t| t.result().unwrap()).sum();
    assert_eq!(total, (0..50u64).map(|n| n * n).sum());
    pool.dispose();
}

#[test]
fn test_pool_dispose_ends_never_started_tasks() {
    let pool = WorkerPool::new(PoolConfig::default().with_workers(2).with_auto_start(false)).unwrap();
    let tasks: Vec<Task<u32>> = (0..25)
        .map(|n| pool.dispatch_fn(move |_| n).unwrap())
        .collect();

    pool.dispose();

    for task in &tasks {
        assert!(task.wait_timeout(Duration::from_secs(1)));
        assert!(task.is_failed());
        assert!(matches!(task.result(), Err(TaskError::NoResult { .. })));
    }
}

#[test]
fn test_pool_dispose_with_busy_workers() {
    let pool = WorkerPool::new(PoolConfig::default().with_workers(2)).unwrap();
    let gate = Signal::new();

    let blockers: Vec<Task> = (0..2)
        .map(|_| {
            let gate = gate.clone();
            pool.dispatch_procedure(move |ctx| {
                while !ctx.is_aborted() && !gate.wait_timeout(Duration::from_millis(5)) {}
            })
            .unwrap()
        })
        .collect();
    let queued: Vec<Task> = (0..20)
        .map(|_| pool.dispatch_procedure(|_| {}).unwrap())
        .collect();

    while blockers.iter().any(|t| !t.is_started()) {
        thread::sleep(Duration::from_millis(1));
    }

    let releaser = {
        let gate = gate.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            gate.set();
        })
    };
    pool.dispose();
    releaser.join().unwrap();

    assert!(blockers.iter().all(|t| t.is_succeeded()));
    assert!(queued.iter().all(|t| t.has_ended()));
}

#[test]
fn test_dispose_racing_dispatch_leaves_no_task_unwaited() {
    let pool = Arc::new(WorkerPool::new(PoolConfig::default().with_workers(2)).unwrap());
    let go = Signal::new();

    let dispatchers: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let go = go.clone();
            thread::spawn(move || {
                go.wait();
                let mut accepted = Vec::new();
                for _ in 0..2_000 {
                    let task = Task::procedure(|_| {});
                    match pool.dispatch(&task) {
                        Ok(()) => accepted.push(task),
                        Err(DispatchError::Disposed { .. }) => break,
                        Err(e) => panic!("unexpected dispatch error: {}", e),
                    }
                }
                accepted
            })
        })
        .collect();

    go.set();
    thread::sleep(Duration::from_millis(2));
    pool.dispose();

    for dispatcher in dispatchers {
        for task in dispatcher.join().unwrap() {
            assert!(
                task.wait_timeout(Duration::from_secs(5)),
                "{} was accepted but never ended",
                task.id()
            );
        }
    }
}

#[test]
fn test_worker_cannot_dispatch_into_own_pool() {
    let pool = Arc::new(WorkerPool::new(PoolConfig::default().with_workers(2)).unwrap());
    let inner = Arc::clone(&pool);

    let attempt = pool
        .dispatch_fn(move |_| inner.dispatch_procedure(|_| {}).map(|_| ()))
        .unwrap();

    assert!(matches!(
        attempt.result().unwrap(),
        Err(DispatchError::WorkerSelfDispatch { .. })
    ));
    pool.dispose();
}
