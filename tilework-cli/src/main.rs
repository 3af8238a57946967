//! tilework CLI - Command-line interface
//!
//! This binary drives the tilework scheduler and worker pool with synthetic
//! workloads, using the configuration at `~/.tilework/config.ini`.

mod commands;
mod error;
mod runner;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tilework::task::ReorderPolicy;

use commands::jobs::JobsArgs;
use commands::pool::PoolArgs;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Reorder {
    /// Strict FIFO
    Never,
    /// Re-sort after every dispatch
    WhenAdded,
    /// Re-sort after every executed task
    WhenExecuted,
}

impl From<Reorder> for ReorderPolicy {
    fn from(value: Reorder) -> Self {
        match value {
            Reorder::Never => ReorderPolicy::NeverReorder,
            Reorder::WhenAdded => ReorderPolicy::ReorderWhenAdded,
            Reorder::WhenExecuted => ReorderPolicy::ReorderWhenExecuted,
        }
    }
}

#[derive(Parser)]
#[command(name = "tilework")]
#[command(version = tilework::VERSION)]
#[command(about = "Drive the tilework job scheduler and worker pool", long_about = None)]
struct Cli {
    /// Path to config.ini (defaults to ~/.tilework/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run synthetic jobs with children under the tick driver
    Jobs {
        /// Number of top-level jobs
        #[arg(long, default_value = "8")]
        count: usize,

        /// Steps per job (and per child)
        #[arg(long, default_value = "10")]
        steps: u64,

        /// Children queued under each job
        #[arg(long, default_value = "2")]
        children: usize,

        /// Kill every job after this many milliseconds
        #[arg(long)]
        kill_after_ms: Option<u64>,

        /// Override the configured tick interval
        #[arg(long)]
        tick_interval_ms: Option<u64>,
    },

    /// Dispatch prioritised tasks into a worker pool and report stats
    Pool {
        /// Number of tasks to dispatch
        #[arg(long, default_value = "1000")]
        tasks: usize,

        /// Override the configured worker count
        #[arg(long)]
        workers: Option<usize>,

        /// Override the configured reorder policy
        #[arg(long, value_enum)]
        reorder: Option<Reorder>,

        /// Iterations of busy work per task
        #[arg(long, default_value = "10000")]
        work: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Jobs {
            count,
            steps,
            children,
            kill_after_ms,
            tick_interval_ms,
        } => commands::jobs::run(JobsArgs {
            config: cli.config,
            count,
            steps,
            children,
            kill_after_ms,
            tick_interval_ms,
        }),
        Commands::Pool {
            tasks,
            workers,
            reorder,
            work,
        } => commands::pool::run(PoolArgs {
            config: cli.config,
            tasks,
            workers,
            reorder: reorder.map(ReorderPolicy::from),
            work,
        }),
    };

    if let Err(e) = result {
        e.exit();
    }
}
