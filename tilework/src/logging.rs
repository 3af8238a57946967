//! Logging setup driven by the `[logging]` config section.
//!
//! Two sinks share one filter:
//! - a plain-text file (cleared each session) that keeps targets and thread
//!   names, so lines from `tilework-worker-N` threads can be told apart
//! - a compact stdout layer for following a CLI run
//!
//! Worker threads log under [`WORKER_TARGET`] and timer threads under
//! [`TIMER_TARGET`], so either can be turned up on its own, e.g.
//! `RUST_LOG=info,tilework::worker=debug`.

use crate::config::LoggingSettings;
use std::fs;
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Log target used by worker pool threads.
pub const WORKER_TARGET: &str = "tilework::worker";

/// Log target used by delayed-kill timers.
pub const TIMER_TARGET: &str = "tilework::timer";

/// Keeps the non-blocking file writer alive. Dropping it flushes the file.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Installs the global subscriber described by `settings`.
///
/// `RUST_LOG`, when set, replaces the configured level.
///
/// # Errors
///
/// Fails if the log directory cannot be created, the log file cannot be
/// cleared, or a global subscriber is already installed.
pub fn init_logging(settings: &LoggingSettings) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(&settings.directory)?;
    fs::write(settings.directory.join(&settings.file), "")?;

    let file_appender = tracing_appender::rolling::never(&settings.directory, &settings.file);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(io::stdout)
        .with_target(false);

    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = EnvFilter::new(filter_directives(&settings.level, env.as_deref()));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(io::Error::other)?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Filter directives: the environment wins over the configured level.
fn filter_directives(level: &str, env: Option<&str>) -> String {
    match env.map(str::trim) {
        Some(directives) if !directives.is_empty() => directives.to_string(),
        _ => level.to_string(),
    }
}

/// Default log directory, relative to the working directory.
pub fn default_log_dir() -> &'static str {
    "logs"
}

/// Default log file name.
pub fn default_log_file() -> &'static str {
    "tilework.log"
}

/// Default level when `RUST_LOG` is unset.
pub fn default_log_level() -> &'static str {
    "info"
}
