//! Default values and constants for all configuration settings.
//!
//! Contains all `DEFAULT_*` constants and the `ConfigFile::default()`
//! implementation.

use std::path::PathBuf;

use super::settings::*;
use crate::task::ConflictPolicy;

// =============================================================================
// Cache
// =============================================================================

/// Default active memory cache budget (32 MB).
pub const DEFAULT_MEMORY_CACHE_SIZE: usize = 32 * 1024 * 1024;

/// Default recycle station budget (32 MB). 0 disables the station.
pub const DEFAULT_RECYCLER_SIZE: usize = 32 * 1024 * 1024;

/// Default disk store budget (30 MB).
pub const DEFAULT_DISK_CACHE_SIZE: usize = 30 * 1024 * 1024;

/// Default app version stamped on the disk store.
pub const DEFAULT_APP_VERSION: u32 = 1;

/// Whether a changed app version wipes the disk store by default.
pub const DEFAULT_WIPE_ON_VERSION_CHANGE: bool = false;

// =============================================================================
// Engine
// =============================================================================

pub const DEFAULT_MEMORY_THREADS: usize = 1;
pub const DEFAULT_DISK_THREADS: usize = 2;
pub const DEFAULT_NETWORK_THREADS: usize = 3;

/// Default in-flight capacity of each tier queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Default handling of duplicate loads for the same key.
pub const DEFAULT_DUPLICATE_POLICY: ConflictPolicy = ConflictPolicy::Follow;

/// Network retries after the first failed attempt.
pub const DEFAULT_RELOAD_TIMES: u32 = 2;

/// Per-stage task timeout in seconds (0 = none).
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 0;

/// Whether misses pass through the memory tier before the disk tier.
pub const DEFAULT_MEMORY_RECHECK: bool = false;

// =============================================================================
// Network
// =============================================================================

/// Default connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Default read timeout in milliseconds.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 3000;

// =============================================================================
// Logging
// =============================================================================

pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_LOG_FILE: &str = "imagetier.log";

/// Default disk store directory (`<cache dir>/imagetier`).
pub fn default_disk_directory() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("imagetier")
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            cache: CacheSettings {
                directory: default_disk_directory(),
                memory_size: DEFAULT_MEMORY_CACHE_SIZE,
                recycler_size: DEFAULT_RECYCLER_SIZE,
                disk_size: DEFAULT_DISK_CACHE_SIZE,
                app_version: DEFAULT_APP_VERSION,
                wipe_on_version_change: DEFAULT_WIPE_ON_VERSION_CHANGE,
            },
            engine: EngineSettings {
                memory_threads: DEFAULT_MEMORY_THREADS,
                disk_threads: DEFAULT_DISK_THREADS,
                network_threads: DEFAULT_NETWORK_THREADS,
                memory_queue: DEFAULT_QUEUE_CAPACITY,
                disk_queue: DEFAULT_QUEUE_CAPACITY,
                network_queue: DEFAULT_QUEUE_CAPACITY,
                duplicate_policy: DEFAULT_DUPLICATE_POLICY,
                reload_times: DEFAULT_RELOAD_TIMES,
                task_timeout: DEFAULT_TASK_TIMEOUT_SECS,
                memory_recheck: DEFAULT_MEMORY_RECHECK,
            },
            network: NetworkSettings {
                connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
                read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            },
            logging: LoggingSettings {
                directory: PathBuf::from(DEFAULT_LOG_DIR),
                file: DEFAULT_LOG_FILE.to_string(),
            },
        }
    }
}
