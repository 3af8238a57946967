//! Default values and constants for all configuration settings.

use std::path::PathBuf;

use super::settings::*;
use crate::job::DEFAULT_TICK_INTERVAL_MS;
use crate::logging::{default_log_dir, default_log_file, default_log_level};
use crate::task::ReorderPolicy;

/// Worker count meaning "pick from the CPU count".
pub const DEFAULT_WORKERS: usize = 0;

/// Workers start as soon as the pool is built.
pub const DEFAULT_AUTO_START: bool = true;

/// Shortest accepted tick interval.
pub const MIN_TICK_INTERVAL_MS: u64 = 1;

/// Accepted values for `[logging] level`.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            pool: PoolSettings::default(),
            jobs: JobSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            auto_start: DEFAULT_AUTO_START,
            reorder: ReorderPolicy::NeverReorder,
        }
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(default_log_dir()),
            file: default_log_file().to_string(),
            level: default_log_level().to_string(),
        }
    }
}
