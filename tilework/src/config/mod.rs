//! Configuration for the scheduler, worker pool and logging.
//!
//! Configuration lives in an INI file, by default `~/.tilework/config.ini`:
//!
//! ```ini
//! [pool]
//! workers = 12
//! auto_start = true
//! reorder = when_added
//!
//! [jobs]
//! tick_interval_ms = 16
//!
//! [logging]
//! directory = ~/.tilework/logs
//! file = tilework.log
//! level = info
//! ```
//!
//! Missing files and missing keys fall back to defaults.

mod defaults;
mod file;
mod parser;
mod settings;
mod writer;

pub use file::{
    config_directory, config_file_path, ConfigFile, ConfigFileError, JobSettings,
    LoggingSettings, PoolSettings, DEFAULT_AUTO_START, DEFAULT_WORKERS, LOG_LEVELS,
    MIN_TICK_INTERVAL_MS,
};
