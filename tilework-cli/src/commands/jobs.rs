//! Jobs command - run synthetic jobs under the tokio tick driver.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tilework::job::{counted, JobOwner, JobScheduler, TickDriver};
use tilework::telemetry::TracingTelemetrySink;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the jobs command.
pub struct JobsArgs {
    pub config: Option<PathBuf>,
    pub count: usize,
    pub steps: u64,
    pub children: usize,
    pub kill_after_ms: Option<u64>,
    pub tick_interval_ms: Option<u64>,
}

/// Run the jobs command.
pub fn run(args: JobsArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(args.config.as_deref())?;
    runner.log_startup("jobs");

    let interval = Duration::from_millis(
        args.tick_interval_ms
            .unwrap_or(runner.config().jobs.tick_interval_ms)
            .max(1),
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    let summary = runtime.block_on(async {
        let scheduler = JobScheduler::with_parts(
            tilework::job::default_timer(),
            Arc::new(TracingTelemetrySink),
        );
        let completed = Arc::new(AtomicUsize::new(0));
        let killed = Arc::new(AtomicUsize::new(0));

        for index in 0..args.count {
            let job = scheduler.create_job(counted(args.steps), JobOwner::new(index), false);
            for _ in 0..args.children {
                job.create_child(counted(args.steps));
            }

            let completed = Arc::clone(&completed);
            let killed = Arc::clone(&killed);
            job.on_complete(move |job, was_killed, owner| {
                if was_killed {
                    killed.fetch_add(1, Ordering::Relaxed);
                } else {
                    completed.fetch_add(1, Ordering::Relaxed);
                }
                info!(
                    job_id = %job.id(),
                    index = owner.downcast_ref::<usize>().copied().unwrap_or_default(),
                    was_killed,
                    steps = job.steps_taken(),
                    "Synthetic job finished"
                );
            });

            if let Some(ms) = args.kill_after_ms {
                job.kill_after(Duration::from_millis(ms));
            }
            job.start();
        }

        let started = Instant::now();
        let ticks = TickDriver::new(scheduler, interval)
            .run_until_idle(shutdown_on_ctrl_c())
            .await;

        (
            ticks,
            started.elapsed(),
            completed.load(Ordering::Relaxed),
            killed.load(Ordering::Relaxed),
        )
    });

    let (ticks, elapsed, completed, killed) = summary;
    println!("Jobs finished after {} ticks ({:.2?})", ticks, elapsed);
    println!("  Completed: {}", completed);
    println!("  Killed:    {}", killed);

    Ok(())
}

/// Token cancelled when the user presses Ctrl-C.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping tick driver");
            cancel.cancel();
        }
    });
    token
}
