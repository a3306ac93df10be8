//! Logging setup.
//!
//! - Writes to `<dir>/imagetier.log`, truncated at startup
//! - Mirrors to stdout for CLI use
//! - Filtered by `RUST_LOG`, defaulting to `info`

use crate::config::LoggingSettings;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Keep alive for as long as logging is needed. Dropping it flushes the file.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
    path: PathBuf,
}

impl LoggingGuard {
    /// The log file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Create `log_dir` and truncate `log_file` inside it.
fn prepare_log_file(log_dir: &Path, log_file: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(log_file);
    fs::write(&path, "")?;
    Ok(path)
}

/// Install the global subscriber with a file layer and a stdout layer.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the file cannot
/// be truncated.
pub fn init_logging(log_dir: &Path, log_file: &str) -> io::Result<LoggingGuard> {
    let path = prepare_log_file(log_dir, log_file)?;

    let appender = tracing_appender::rolling::never(log_dir, log_file);
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true)
        .with_target(false)
        .compact();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // A second init (e.g. in tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
        path,
    })
}

/// [`init_logging`] driven by the `[logging]` config section.
pub fn init_from_settings(settings: &LoggingSettings) -> io::Result<LoggingGuard> {
    init_logging(&settings.directory, &settings.file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prepare_creates_directory_and_file() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("nested/logs");

        let path = prepare_log_file(&dir, "imagetier.log").unwrap();

        assert!(dir.is_dir());
        assert_eq!(path, dir.join("imagetier.log"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_prepare_truncates_previous_session() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("imagetier.log");
        fs::write(&path, "old session").unwrap();

        prepare_log_file(temp_dir.path(), "imagetier.log").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_init_returns_guard_for_file() {
        let temp_dir = TempDir::new().unwrap();
        let guard = init_logging(temp_dir.path(), "test.log").unwrap();
        assert_eq!(guard.path(), temp_dir.path().join("test.log"));
    }
}
