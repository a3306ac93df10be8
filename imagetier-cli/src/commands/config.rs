//! Configuration management CLI commands.
//!
//! Provides `config init`, `config show` and `config path`.

use clap::Subcommand;
use imagetier::config::{ConfigFile, LoaderSettings};
use std::path::PathBuf;

use crate::error::CliError;
use crate::runner::resolve_config_path;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Write a config file with every setting at its default
    Init {
        /// Where to write it (defaults to the per-user config file)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective settings
    Show {
        /// Config file to read (defaults to the per-user config file)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Show the default configuration file path
    Path,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init { path, force } => run_init(path, force),
        ConfigCommands::Show { path } => run_show(path),
        ConfigCommands::Path => {
            println!("{}", resolve_config_path(None).display());
            Ok(())
        }
    }
}

fn run_init(path: Option<PathBuf>, force: bool) -> Result<(), CliError> {
    let path = resolve_config_path(path.as_deref());
    if path.exists() && !force {
        return Err(CliError::AlreadyExists(path));
    }

    ConfigFile::default().save_to(&path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn run_show(path: Option<PathBuf>) -> Result<(), CliError> {
    let path = resolve_config_path(path.as_deref());
    let config = ConfigFile::load_from(&path)?;

    if path.exists() {
        println!("# Loaded from {}", path.display());
    } else {
        println!("# {} not found, showing defaults", path.display());
    }
    println!();
    print!("{}", config.to_ini_string());

    LoaderSettings::from(&config).validate()?;
    Ok(())
}
