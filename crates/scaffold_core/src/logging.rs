use anyhow::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::ScaffoldConfig;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str =
    "info,scaffold_core=debug,scaffold_network=debug,scaffold_room=debug,mesh=debug";

/// File name prefix for the daily log files.
const LOG_FILE_PREFIX: &str = "scaffold";

/// Initializes logging to `~/.scaffold/logs` plus a compact console layer.
/// `RUST_LOG` wins over `config.log_level`.
/// The returned guard must stay alive for as long as logs should be flushed.
pub fn init_logging(config: &ScaffoldConfig) -> Result<WorkerGuard> {
    let logs_dir = ScaffoldConfig::logs_dir()?;
    std::fs::create_dir_all(&logs_dir)?;

    let file_appender = tracing_appender::rolling::daily(&logs_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .compact(),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}

/// Initialize file-only logging in `logs_dir` with `filter` as the fallback
/// directive. For embedders and tests that should not touch `~/.scaffold`.
pub fn init_logging_to_dir(logs_dir: &Path, filter: &str) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter(filter))
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}

fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback_filter(fallback))
}

/// Parses `directives`, falling back to [`DEFAULT_FILTER`] if they are invalid.
fn fallback_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_missing_log_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let logs_dir = tmp.path().join("nested").join("logs");
        assert!(!logs_dir.exists());

        // The global subscriber can only be installed once per process, so
        // the result may be an error; the directory must exist either way.
        let result = init_logging_to_dir(&logs_dir, "warn");
        assert!(logs_dir.exists());

        if let Err(e) = result {
            assert!(e.to_string().contains("logging"), "unexpected error: {e}");
        }
    }

    #[test]
    fn test_accepts_existing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let logs_dir = tmp.path().join("logs");
        std::fs::create_dir_all(&logs_dir).unwrap();

        drop(init_logging_to_dir(&logs_dir, "info"));
        assert!(logs_dir.exists());
    }

    #[test]
    fn test_fallback_filters_parse() {
        for f in [DEFAULT_FILTER, "debug", "scaffold_network=trace,warn"] {
            assert!(EnvFilter::try_new(f).is_ok(), "{f}");
        }
    }

    #[test]
    fn test_configured_level_becomes_filter() {
        let filter = fallback_filter("warn,scaffold_network=trace").to_string();
        assert!(filter.contains("scaffold_network=trace"), "{filter}");
        assert!(!filter.contains("scaffold_room"), "{filter}");
    }

    #[test]
    fn test_invalid_level_uses_default() {
        let filter = fallback_filter("scaffold_network=loud").to_string();
        assert!(filter.contains("scaffold_room=debug"), "{filter}");
        assert!(filter.contains("mesh=debug"), "{filter}");
    }
}
