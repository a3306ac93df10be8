//! Disk cache management CLI commands.

use clap::Subcommand;
use imagetier::cache::{DiskStoreConfig, FsDiskStore};
use imagetier::config::{format_size, ConfigFile};
use std::path::Path;

use crate::error::CliError;
use crate::runner::resolve_config_path;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show disk cache statistics
    Stats,
    /// Remove every entry from the disk cache
    Clear,
}

/// Run a cache subcommand against the disk store named in the config.
pub fn run(action: CacheAction, config_path: Option<&Path>) -> Result<(), CliError> {
    let config = ConfigFile::load_from(&resolve_config_path(config_path))?;
    let cache = &config.cache;
    let store = FsDiskStore::open(
        DiskStoreConfig::new(&cache.directory, cache.disk_size)
            .with_app_version(cache.app_version)
            .with_wipe_on_version_change(cache.wipe_on_version_change),
    )
    .map_err(|e| CliError::Cache(e.to_string()))?;

    match action {
        CacheAction::Stats => {
            println!("Disk cache: {}", store.directory().display());
            println!("  Entries: {}", store.entry_count());
            println!(
                "  Size:    {} / {}",
                format_size(store.size_bytes() as usize),
                format_size(store.max_size_bytes() as usize)
            );
        }
        CacheAction::Clear => {
            let entries = store.entry_count();
            let bytes = store.size_bytes();
            store.clear().map_err(|e| CliError::Cache(e.to_string()))?;
            println!(
                "Deleted {} entries, freed {} from {}",
                entries,
                format_size(bytes as usize),
                store.directory().display()
            );
        }
    }
    Ok(())
}
