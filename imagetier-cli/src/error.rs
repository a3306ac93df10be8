//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and exit codes.

use imagetier::config::{ConfigError, ConfigFileError};
use imagetier::FailureReason;
use std::fmt;
use std::path::PathBuf;
use std::process;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Config file could not be read, parsed or written
    ConfigFile(ConfigFileError),
    /// Settings rejected by the loader
    Loader(ConfigError),
    /// The image load ended in failure
    LoadFailed { url: String, reason: FailureReason },
    /// The image load was canceled before it finished
    LoadCanceled { url: String },
    /// Refused to overwrite an existing file
    AlreadyExists(PathBuf),
    /// Disk cache operation failed
    Cache(String),
    /// Failed to start the async runtime
    Runtime(std::io::Error),
}

impl CliError {
    /// Process exit code: 2 for configuration problems, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::ConfigFile(_) | CliError::Loader(_) | CliError::AlreadyExists(_) => 2,
            _ => 1,
        }
    }

    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::ConfigFile(ConfigFileError::InvalidValue { .. }) => {
                eprintln!();
                eprintln!("Run 'imagetier config show' to see the effective settings,");
                eprintln!("or 'imagetier config init --force' to start from defaults.");
            }
            CliError::AlreadyExists(_) => {
                eprintln!("Use --force to overwrite it.");
            }
            _ => {}
        }

        process::exit(self.exit_code())
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::ConfigFile(e) => write!(f, "Configuration error: {}", e),
            CliError::Loader(e) => write!(f, "Loader rejected settings: {}", e),
            CliError::LoadFailed { url, reason } => {
                write!(f, "Failed to load '{}': {}", url, reason)
            }
            CliError::LoadCanceled { url } => write!(f, "Load of '{}' was canceled", url),
            CliError::AlreadyExists(path) => {
                write!(f, "File already exists: {}", path.display())
            }
            CliError::Cache(msg) => write!(f, "Cache error: {}", msg),
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ConfigFile(e) => Some(e),
            CliError::Loader(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Loader(e)
    }
}
