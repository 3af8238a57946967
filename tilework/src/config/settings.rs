//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use crate::pool::PoolConfig;
use crate::task::ReorderPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    /// Worker pool settings
    pub pool: PoolSettings,
    /// Job scheduler settings
    pub jobs: JobSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Worker thread count. `0` means three per available CPU.
    pub workers: usize,
    /// Start workers as soon as the pool is built.
    pub auto_start: bool,
    /// Queue reorder policy.
    pub reorder: ReorderPolicy,
}

/// Job scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    /// Interval between scheduler ticks, in milliseconds.
    pub tick_interval_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Directory the log file is written to.
    pub directory: PathBuf,
    /// Log file name.
    pub file: String,
    /// Level used when `RUST_LOG` is unset.
    pub level: String,
}

impl PoolSettings {
    /// Builds the pool configuration these settings describe.
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig::default()
            .with_workers(self.workers)
            .with_auto_start(self.auto_start)
            .with_reorder(self.reorder)
    }
}

impl JobSettings {
    /// Tick interval as a `Duration`.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        settings.to_pool_config()
    }
}
