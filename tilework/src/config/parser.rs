//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use ini::Ini;
use std::path::PathBuf;

use super::defaults::{LOG_LEVELS, MIN_TICK_INTERVAL_MS};
use super::file::ConfigFileError;
use super::settings::ConfigFile;
use crate::task::ReorderPolicy;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [pool] section
    if let Some(section) = ini.section(Some("pool")) {
        if let Some(v) = section.get("workers") {
            config.pool.workers = v.trim().parse().map_err(|_| {
                invalid(
                    "pool",
                    "workers",
                    v,
                    "must be a non-negative integer (0 = three per CPU)",
                )
            })?;
        }
        if let Some(v) = section.get("auto_start") {
            config.pool.auto_start = parse_bool(v);
        }
        if let Some(v) = section.get("reorder") {
            config.pool.reorder = v.parse::<ReorderPolicy>().map_err(|_| {
                invalid(
                    "pool",
                    "reorder",
                    v,
                    "must be one of: never, when_added, when_executed",
                )
            })?;
        }
    }

    // [jobs] section
    if let Some(section) = ini.section(Some("jobs")) {
        if let Some(v) = section.get("tick_interval_ms") {
            config.jobs.tick_interval_ms = v
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms >= MIN_TICK_INTERVAL_MS)
                .ok_or_else(|| {
                    invalid(
                        "jobs",
                        "tick_interval_ms",
                        v,
                        "must be a positive integer (milliseconds)",
                    )
                })?;
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = v.to_string();
            }
        }
        if let Some(v) = section.get("level") {
            let level = v.trim().to_lowercase();
            if !LOG_LEVELS.contains(&level.as_str()) {
                return Err(invalid(
                    "logging",
                    "level",
                    v,
                    "must be one of: trace, debug, info, warn, error",
                ));
            }
            config.logging.level = level;
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse a boolean value from INI ("true", "1", "yes", "on" are truthy).
pub(super) fn parse_bool(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    v == "true" || v == "1" || v == "yes" || v == "on"
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn load(content: &str) -> Result<ConfigFile, ConfigFileError> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.ini");
        std::fs::write(&path, content).unwrap();
        ConfigFile::load_from(&path)
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool(" YES "));
        assert!(parse_bool("1"));
        assert!(parse_bool("on"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("nope"));
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/var/log"), PathBuf::from("/var/log"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/logs"), home.join("logs"));
        }
    }

    #[test]
    fn test_pool_section() {
        let config =
            load("[pool]\nworkers = 12\nauto_start = false\nreorder = when_added\n").unwrap();

        assert_eq!(config.pool.workers, 12);
        assert!(!config.pool.auto_start);
        assert_eq!(config.pool.reorder, ReorderPolicy::ReorderWhenAdded);
    }

    #[test]
    fn test_jobs_section() {
        let config = load("[jobs]\ntick_interval_ms = 33\n").unwrap();
        assert_eq!(config.jobs.tick_interval_ms, 33);
    }

    #[test]
    fn test_logging_section() {
        let config =
            load("[logging]\ndirectory = /tmp/tw\nfile = run.log\nlevel = DEBUG\n").unwrap();
        assert_eq!(config.logging.directory, PathBuf::from("/tmp/tw"));
        assert_eq!(config.logging.file, "run.log");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_log_level() {
        let err = load("[logging]\nlevel = loud\n").unwrap_err();
        assert!(err.to_string().contains("logging.level"));
    }

    #[test]
    fn test_missing_keys_keep_defaults() {
        let config = load("[pool]\nreorder = when_executed\n").unwrap();
        let defaults = ConfigFile::default();

        assert_eq!(config.pool.workers, defaults.pool.workers);
        assert_eq!(config.jobs, defaults.jobs);
        assert_eq!(config.pool.reorder, ReorderPolicy::ReorderWhenExecuted);
    }

    #[test]
    fn test_invalid_workers() {
        let err = load("[pool]\nworkers = lots\n").unwrap_err();
        match err {
            ConfigFileError::InvalidValue { section, key, value, .. } => {
                assert_eq!(section, "pool");
                assert_eq!(key, "workers");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_invalid_reorder() {
        let err = load("[pool]\nreorder = sometimes\n").unwrap_err();
        assert!(matches!(err, ConfigFileError::InvalidValue { ref key, .. } if key == "reorder"));
    }

    #[test]
    fn test_zero_tick_interval_rejected() {
        let err = load("[jobs]\ntick_interval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("jobs.tick_interval_ms"));
    }
}
