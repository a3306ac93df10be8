//! Configuration for the loader.
//!
//! Two layers:
//!
//! - [`ConfigFile`]: the on-disk `config.ini`, one struct per `[section]`,
//!   parsed with `rust-ini` on top of the `DEFAULT_*` constants.
//! - [`LoaderSettings`]: the validated runtime view handed to
//!   [`Loader::configure`](crate::loader::Loader::configure).
//!
//! # Example
//!
//! ```
//! use imagetier::config::{ConfigFile, LoaderSettings};
//!
//! let file = ConfigFile::default();
//! let settings = LoaderSettings::from(&file).with_reload_times(0);
//! assert!(settings.validate().is_ok());
//! ```

mod defaults;
mod file;
mod loader;
mod parser;
mod settings;
mod size;
mod writer;

pub use defaults::*;
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use loader::{ConfigError, LoaderSettings};
pub use settings::{CacheSettings, ConfigFile, EngineSettings, LoggingSettings, NetworkSettings};
pub use size::{format_size, parse_size, SizeParseError};
