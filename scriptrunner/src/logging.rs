//! Logging setup for scriptrunner processes.
//!
//! - Writes to `logs/scriptrunner.log` (truncated on session start)
//! - Also prints to stdout for CLI tailing
//! - Configurable via the `RUST_LOG` environment variable (default `info`)

use crate::config::{LoggingSettings, DEFAULT_LOG_DIR, DEFAULT_LOG_FILE};
use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping it flushes and closes the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initialize the global subscriber with a file layer and a stdout layer.
///
/// Creates `log_dir` if needed and truncates any previous log file.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be prepared, or if a
/// global subscriber is already installed.
pub fn init_logging(log_dir: &Path, log_file: &str) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;
    fs::write(log_dir.join(log_file), "")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true)
        .compact();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// [`init_logging`] driven by the `[logging]` config section.
pub fn init_from_settings(settings: &LoggingSettings) -> Result<LoggingGuard, io::Error> {
    init_logging(&settings.directory, &settings.file)
}

/// Default log directory.
pub fn default_log_dir() -> &'static str {
    DEFAULT_LOG_DIR
}

/// Default log file name.
pub fn default_log_file() -> &'static str {
    DEFAULT_LOG_FILE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        assert_eq!(default_log_dir(), "logs");
        assert_eq!(default_log_file(), "scriptrunner.log");
    }

    #[test]
    fn test_init_prepares_file() {
        // The global subscriber can only be installed once per test binary,
        // so only the file handling is checked here.
        let dir = tempfile::TempDir::new().unwrap();
        let log_dir = dir.path().join("logs");
        let log_path = log_dir.join("test.log");
        fs::create_dir_all(&log_dir).unwrap();
        fs::write(&log_path, "old log data").unwrap();

        if let Ok(_guard) = init_logging(&log_dir, "test.log") {
            assert!(log_path.exists());
        }
        assert!(!fs::read_to_string(&log_path)
            .unwrap()
            .contains("old log data"));
    }
}
