//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use crate::task::ConflictPolicy;
use std::path::PathBuf;

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub cache: CacheSettings,
    pub engine: EngineSettings,
    pub network: NetworkSettings,
    pub logging: LoggingSettings,
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    /// Disk store directory
    pub directory: PathBuf,
    /// Active memory cache budget in bytes
    pub memory_size: usize,
    /// Recycle station budget in bytes (0 = disabled)
    pub recycler_size: usize,
    /// Disk store budget in bytes
    pub disk_size: usize,
    /// Version stamped on the disk store
    pub app_version: u32,
    /// Wipe the disk store when `app_version` changes
    pub wipe_on_version_change: bool,
}

/// `[engine]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub memory_threads: usize,
    pub disk_threads: usize,
    pub network_threads: usize,
    pub memory_queue: usize,
    pub disk_queue: usize,
    pub network_queue: usize,
    pub duplicate_policy: ConflictPolicy,
    /// Network retries after the first failure
    pub reload_times: u32,
    /// Per-stage timeout in seconds, 0 = none
    pub task_timeout: u64,
    /// Route misses through the memory tier first
    pub memory_recheck: bool,
}

/// `[network]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSettings {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file: String,
}
