//! Structured logging setup.
//!
//! Stdout always; a daily rotating file as well when a log directory is
//! configured. The filter comes from the configured filter (`PETGATE_LOG`),
//! then `RUST_LOG`, then a build-type default.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Directory for rotating log files (None = stdout only)
    pub log_dir: Option<PathBuf>,
    /// Whether stdout is a terminal (enables ANSI colors)
    pub is_tty: bool,
    /// Optional custom log filter
    pub log_filter: Option<String>,
}

impl LogConfig {
    /// Create a new logging configuration.
    pub fn new(log_dir: Option<PathBuf>) -> Self {
        Self { log_dir, is_tty: atty::is(atty::Stream::Stdout), log_filter: None }
    }

    /// Set custom log filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }
}

/// Guard that must be held for the lifetime of the process.
///
/// Dropping this guard flushes pending log entries.
pub struct LoggingGuard {
    _worker_guard: Option<WorkerGuard>,
}

/// Initialize logging with the given configuration.
///
/// If file logging cannot be set up, falls back to stdout only.
pub fn init_logging(config: LogConfig) -> LoggingGuard {
    let Some(log_dir) = config.log_dir.as_ref() else {
        return init_stdout_logging(&config);
    };

    match build_file_writer(log_dir) {
        Ok((file_writer, guard)) => {
            let stdout = std::io::stdout.with_max_level(tracing::Level::INFO);
            tracing_subscriber::fmt()
                .with_writer(stdout.and(file_writer))
                .with_env_filter(build_env_filter(config.log_filter.as_deref()))
                .with_ansi(false)
                .with_target(true)
                .init();
            LoggingGuard { _worker_guard: Some(guard) }
        }
        Err(e) => {
            eprintln!("Warning: Failed to initialize file logging: {}. Using stdout only.", e);
            init_stdout_logging(&config)
        }
    }
}

/// Initialize stdout-only logging.
fn init_stdout_logging(config: &LogConfig) -> LoggingGuard {
    tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(config.log_filter.as_deref()))
        .with_ansi(config.is_tty)
        .with_target(false)
        .init();

    LoggingGuard { _worker_guard: None }
}

fn build_file_writer(
    log_dir: &Path,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard), Box<dyn std::error::Error>>
{
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("petgate")
        .filename_suffix("log")
        .build(log_dir)?;

    Ok(tracing_appender::non_blocking(file_appender))
}

/// Build the environment filter from config or defaults.
fn build_env_filter(custom_filter: Option<&str>) -> EnvFilter {
    // Priority: custom filter > RUST_LOG > default
    if let Some(filter) = custom_filter {
        return EnvFilter::try_new(filter).unwrap_or_else(|e| {
            eprintln!("Warning: Invalid log filter {filter:?}: {e}. Using the default.");
            EnvFilter::new(default_log_filter())
        });
    }

    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_log_filter()))
}

/// Get the default log filter based on build type.
pub fn default_log_filter() -> &'static str {
    #[cfg(debug_assertions)]
    {
        "debug,petgate=trace,petgate_core=trace,tokio_postgres=warn,russh=warn,hyper=warn"
    }
    #[cfg(not(debug_assertions))]
    {
        "info,tokio_postgres=warn,russh=warn,hyper=warn,tower_http=info"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(default_log_filter()).is_ok());
    }

    #[test]
    fn test_bad_custom_filter_falls_back() {
        let filter = build_env_filter(Some("petgate=loudest"));
        assert_eq!(filter.to_string(), EnvFilter::new(default_log_filter()).to_string());
    }

    #[test]
    fn test_file_writer_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("nested").join("logs");

        let (_writer, _guard) = build_file_writer(&log_dir).unwrap();
        assert!(log_dir.is_dir());
    }
}
