//! INI serialization logic for converting `ConfigFile` → INI string.

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    format!(
        r#"[pool]
; Number of worker threads (0 = three per available CPU)
workers = {}
; Start workers as soon as the pool is created
auto_start = {}
; Queue reordering by task priority:
;   never         - strict FIFO
;   when_added    - re-sort after every dispatch
;   when_executed - re-sort after every executed task
reorder = {}

[jobs]
; Interval between job scheduler ticks, in milliseconds
tick_interval_ms = {}

[logging]
; Directory for log files (~ expands to the home directory)
directory = {}
; Log file name (cleared at the start of every run)
file = {}
; Level when RUST_LOG is unset: trace, debug, info, warn or error
level = {}
"#,
        config.pool.workers,
        config.pool.auto_start,
        config.pool.reorder,
        config.jobs.tick_interval_ms,
        config.logging.directory.to_string_lossy(),
        config.logging.file,
        config.logging.level,
    )
}
