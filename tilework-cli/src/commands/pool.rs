//! Pool command - dispatch prioritised tasks into a worker pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tilework::pool::{PoolStats, WorkerPool};
use tilework::task::{ReorderPolicy, Task};
use tilework::telemetry::TracingTelemetrySink;
use tracing::info;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the pool command.
pub struct PoolArgs {
    pub config: Option<PathBuf>,
    pub tasks: usize,
    pub workers: Option<usize>,
    pub reorder: Option<ReorderPolicy>,
    pub work: u64,
}

/// Run the pool command.
pub fn run(args: PoolArgs) -> Result<(), CliError> {
    let mut runner = CliRunner::new(args.config.as_deref())?;
    runner.log_startup("pool");

    let settings = &mut runner.config_mut().pool;
    if let Some(workers) = args.workers {
        settings.workers = workers;
    }
    if let Some(reorder) = args.reorder {
        settings.reorder = reorder;
    }

    // Queue everything first so start() seeds the workers from the backlog
    let config = settings.to_pool_config().with_auto_start(false);
    let pool = WorkerPool::with_telemetry(config, Arc::new(TracingTelemetrySink))?;

    let work = args.work;
    let tasks = (0..args.tasks)
        .map(|i| {
            let task = Task::function(move |ctx| {
                let mut acc = i as u64;
                for n in 0..work {
                    if ctx.is_aborted() {
                        break;
                    }
                    acc = acc.wrapping_mul(31).wrapping_add(n);
                }
                acc
            })
            .with_priority((i % 5) as i32);
            pool.dispatch(&task).map(|_| task)
        })
        .collect::<Result<Vec<Task<u64>>, _>>()?;

    print_stats("Before start", &pool.stats());

    let started = Instant::now();
    pool.start()?;

    let mut checksum = 0u64;
    for task in &tasks {
        checksum = checksum.wrapping_add(task.result()?);
    }
    let elapsed = started.elapsed();

    print_stats("After completion", &pool.stats());
    pool.dispose();

    info!(tasks = tasks.len(), elapsed_ms = elapsed.as_millis(), "Pool run finished");
    println!(
        "Ran {} tasks on {} workers in {:.2?} (checksum {:#x})",
        tasks.len(),
        pool.worker_count(),
        elapsed,
        checksum
    );

    Ok(())
}

fn print_stats(label: &str, stats: &PoolStats) {
    println!("{}:", label);
    println!("  Backlog:        {}", stats.backlog);
    println!("  Worker queues:  {:?}", stats.queued_per_worker);
    println!("  Running:        {}", stats.running_workers);
}
