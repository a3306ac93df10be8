//! imagetier CLI - Command-line interface
//!
//! Loads images through the imagetier loader and manages its config file
//! and disk cache.

mod commands;
mod error;
mod runner;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::cache::CacheAction;
use commands::config::ConfigCommands;
use commands::load::LoadArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "imagetier", version)]
#[command(about = "Tiered memory/disk/network image loader", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load one image and print the outcome and cache report
    Load(LoadArgs),

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Inspect or clear the disk cache
    Cache {
        /// Config file to use instead of the per-user one
        #[arg(long, global = true)]
        config: Option<PathBuf>,

        #[command(subcommand)]
        action: CacheAction,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Load(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(CliError::Runtime)?;
            runtime.block_on(commands::load::run(args))
        }
        Commands::Config { action } => commands::config::run(action),
        Commands::Cache { config, action } => commands::cache::run(action, config.as_deref()),
    }
}
