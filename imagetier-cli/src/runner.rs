//! CLI runner for common setup.
//!
//! Loads the config file, initializes logging and builds loaders so command
//! handlers don't repeat it.

use crate::error::CliError;
use imagetier::config::{config_file_path, ConfigFile, LoaderSettings};
use imagetier::logging::{init_from_settings, LoggingGuard};
use imagetier::{Loader, LoaderComponents};
use std::path::{Path, PathBuf};
use tracing::info;

/// Resolve `--config`, defaulting to the per-user config file.
pub fn resolve_config_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf).unwrap_or_else(config_file_path)
}

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Keeps logging active while the runner exists
    _logging_guard: LoggingGuard,
    config: ConfigFile,
    config_path: PathBuf,
}

impl CliRunner {
    /// Load the config (defaults if the file is missing) and start logging.
    pub fn new(config_path: Option<&Path>) -> Result<Self, CliError> {
        let config_path = resolve_config_path(config_path);
        let config = ConfigFile::load_from(&config_path)?;

        let logging_guard = init_from_settings(&config.logging)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            _logging_guard: logging_guard,
            config,
            config_path,
        })
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("imagetier v{}", imagetier::VERSION);
        info!(config = %self.config_path.display(), "imagetier CLI: {} command", command);
    }

    /// Build and configure a loader from the config file. Must be called
    /// inside the tokio runtime.
    pub fn create_loader(&self) -> Result<Loader, CliError> {
        let loader = Loader::new(LoaderComponents::default());
        loader.configure(LoaderSettings::from(&self.config))?;
        info!("loader ready");
        Ok(loader)
    }
}
