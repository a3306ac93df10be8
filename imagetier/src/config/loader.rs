//! Runtime settings handed to [`Loader::configure`](crate::loader::Loader::configure).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::settings::ConfigFile;
use crate::engine::Tier;
use crate::task::ConflictPolicy;

/// Loader lifecycle and settings errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("loader is not configured")]
    NotConfigured,

    #[error("loader already started executing tasks; configure must come first")]
    AlreadyStarted,

    #[error("loader has been destroyed")]
    Destroyed,

    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),
}

/// Engine-level settings: budgets, worker counts, queue capacities and
/// network timeouts.
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderSettings {
    pub memory_cache_size: usize,
    pub recycler_size: usize,
    pub disk_directory: PathBuf,
    pub disk_cache_size: usize,
    pub app_version: u32,
    pub wipe_on_version_change: bool,
    pub memory_threads: usize,
    pub disk_threads: usize,
    pub network_threads: usize,
    pub memory_queue: usize,
    pub disk_queue: usize,
    pub network_queue: usize,
    pub duplicate_policy: ConflictPolicy,
    pub reload_times: u32,
    pub task_timeout: Option<Duration>,
    pub memory_recheck: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self::from(&ConfigFile::default())
    }
}

impl From<&ConfigFile> for LoaderSettings {
    fn from(config: &ConfigFile) -> Self {
        let engine = &config.engine;
        Self {
            memory_cache_size: config.cache.memory_size,
            recycler_size: config.cache.recycler_size,
            disk_directory: config.cache.directory.clone(),
            disk_cache_size: config.cache.disk_size,
            app_version: config.cache.app_version,
            wipe_on_version_change: config.cache.wipe_on_version_change,
            memory_threads: engine.memory_threads,
            disk_threads: engine.disk_threads,
            network_threads: engine.network_threads,
            memory_queue: engine.memory_queue,
            disk_queue: engine.disk_queue,
            network_queue: engine.network_queue,
            duplicate_policy: engine.duplicate_policy,
            reload_times: engine.reload_times,
            task_timeout: (engine.task_timeout > 0)
                .then(|| Duration::from_secs(engine.task_timeout)),
            memory_recheck: engine.memory_recheck,
            connect_timeout: Duration::from_millis(config.network.connect_timeout_ms),
            read_timeout: Duration::from_millis(config.network.read_timeout_ms),
        }
    }
}

impl LoaderSettings {
    pub fn with_disk_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.disk_directory = directory.into();
        self
    }

    pub fn with_memory_cache_size(mut self, bytes: usize) -> Self {
        self.memory_cache_size = bytes;
        self
    }

    pub fn with_recycler_size(mut self, bytes: usize) -> Self {
        self.recycler_size = bytes;
        self
    }

    pub fn with_disk_cache_size(mut self, bytes: usize) -> Self {
        self.disk_cache_size = bytes;
        self
    }

    /// Set worker count for one tier.
    pub fn with_threads(mut self, tier: Tier, threads: usize) -> Self {
        match tier {
            Tier::Memory => self.memory_threads = threads,
            Tier::Disk => self.disk_threads = threads,
            Tier::Network => self.network_threads = threads,
        }
        self
    }

    /// Set queue capacity for one tier (0 = unbounded).
    pub fn with_queue_capacity(mut self, tier: Tier, capacity: usize) -> Self {
        match tier {
            Tier::Memory => self.memory_queue = capacity,
            Tier::Disk => self.disk_queue = capacity,
            Tier::Network => self.network_queue = capacity,
        }
        self
    }

    pub fn with_duplicate_policy(mut self, policy: ConflictPolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_reload_times(mut self, reload_times: u32) -> Self {
        self.reload_times = reload_times;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_memory_recheck(mut self, enabled: bool) -> Self {
        self.memory_recheck = enabled;
        self
    }

    pub fn with_app_version(mut self, version: u32, wipe_on_change: bool) -> Self {
        self.app_version = version;
        self.wipe_on_version_change = wipe_on_change;
        self
    }

    pub fn threads(&self, tier: Tier) -> usize {
        match tier {
            Tier::Memory => self.memory_threads,
            Tier::Disk => self.disk_threads,
            Tier::Network => self.network_threads,
        }
    }

    pub fn queue_capacity(&self, tier: Tier) -> usize {
        match tier {
            Tier::Memory => self.memory_queue,
            Tier::Disk => self.disk_queue,
            Tier::Network => self.network_queue,
        }
    }

    /// Reject settings the loader cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for tier in Tier::ALL {
            if self.threads(tier) == 0 {
                return Err(ConfigError::Invalid {
                    name: match tier {
                        Tier::Memory => "memory_threads",
                        Tier::Disk => "disk_threads",
                        Tier::Network => "network_threads",
                    },
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if self.memory_cache_size == 0 {
            return Err(invalid("memory_cache_size", "must be greater than 0"));
        }
        if self.disk_cache_size == 0 {
            return Err(invalid("disk_cache_size", "must be greater than 0"));
        }
        if self.connect_timeout.is_zero() {
            return Err(invalid("connect_timeout", "must be greater than 0"));
        }
        if self.read_timeout.is_zero() {
            return Err(invalid("read_timeout", "must be greater than 0"));
        }
        if self.task_timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("task_timeout", "use None to disable"));
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use crate::config::defaults::*;
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let settings = LoaderSettings::default();
        assert_eq!(settings.threads(Tier::Memory), DEFAULT_MEMORY_THREADS);
        assert_eq!(settings.threads(Tier::Disk), DEFAULT_DISK_THREADS);
        assert_eq!(settings.threads(Tier::Network), DEFAULT_NETWORK_THREADS);
        assert_eq!(settings.queue_capacity(Tier::Network), DEFAULT_QUEUE_CAPACITY);
        assert_eq!(settings.disk_cache_size, DEFAULT_DISK_CACHE_SIZE);
        assert_eq!(settings.connect_timeout, Duration::from_millis(3000));
        assert_eq!(settings.task_timeout, None);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let err = LoaderSettings::default()
            .with_threads(Tier::Disk, 0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "disk_threads", .. }));
    }

    #[test]
    fn test_zero_sizes_and_timeouts_rejected() {
        assert!(LoaderSettings::default()
            .with_memory_cache_size(0)
            .validate()
            .is_err());
        assert!(LoaderSettings::default()
            .with_disk_cache_size(0)
            .validate()
            .is_err());

        let mut settings = LoaderSettings::default();
        settings.read_timeout = Duration::ZERO;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_recycler_is_allowed() {
        assert!(LoaderSettings::default()
            .with_recycler_size(0)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_task_timeout_from_file() {
        let mut file = ConfigFile::default();
        file.engine.task_timeout = 5;
        let settings = LoaderSettings::from(&file);
        assert_eq!(settings.task_timeout, Some(Duration::from_secs(5)));
    }
}
