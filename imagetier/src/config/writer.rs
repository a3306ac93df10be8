//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! Produces the commented representation written to `config.ini`.

use std::path::Path;

use super::settings::ConfigFile;
use super::size::format_size;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let cache = &config.cache;
    let engine = &config.engine;
    let network = &config.network;
    let logging = &config.logging;

    format!(
        r#"[cache]
; Directory of the on-disk image store
directory = {}
; Decoded images kept in memory (e.g. 32MB, 512KB)
memory_size = {}
; Evicted images that may still be on screen wait here until released.
; 0 disables the station and frees evicted images at once
recycler_size = {}
; Encoded images kept on disk
disk_size = {}
; Version stamped on the disk store
app_version = {}
; Wipe the disk store when app_version changes
wipe_on_version_change = {}

[engine]
; Worker count per tier
memory_threads = {}
disk_threads = {}
network_threads = {}
; Pending loads per tier before the oldest is dropped (0 = unbounded)
memory_queue = {}
disk_queue = {}
network_queue = {}
; Repeated loads of the same image:
;   follow - join the load already in flight
;   cancel - cancel it and start over
duplicate_policy = {}
; Network retries before a load fails
reload_times = {}
; Seconds before a stage is force-canceled (0 = never)
task_timeout = {}
; Check the memory cache again on a worker before going to disk
memory_recheck = {}

[network]
; Milliseconds
connect_timeout = {}
read_timeout = {}

[logging]
directory = {}
file = {}
"#,
        path_to_string(&cache.directory),
        format_size(cache.memory_size),
        format_size(cache.recycler_size),
        format_size(cache.disk_size),
        cache.app_version,
        cache.wipe_on_version_change,
        engine.memory_threads,
        engine.disk_threads,
        engine.network_threads,
        engine.memory_queue,
        engine.disk_queue,
        engine.network_queue,
        engine.duplicate_policy,
        engine.reload_times,
        engine.task_timeout,
        engine.memory_recheck,
        network.connect_timeout_ms,
        network.read_timeout_ms,
        path_to_string(&logging.directory),
        logging.file,
    )
}

/// Render a path, collapsing the home directory back to `~`.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(rest) = path.strip_prefix(&home) {
            return format!("~/{}", rest.display());
        }
    }
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ConflictPolicy;
    use tempfile::TempDir;

    #[test]
    fn test_written_config_loads_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.ini");

        let mut config = ConfigFile::default();
        config.cache.directory = temp_dir.path().join("store");
        config.cache.recycler_size = 0;
        config.engine.duplicate_policy = ConflictPolicy::Cancel;
        config.engine.network_queue = 0;
        config.network.read_timeout_ms = 1234;
        config.save_to(&path).unwrap();

        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_output_has_all_sections() {
        let text = to_config_string(&ConfigFile::default());
        for section in ["[cache]", "[engine]", "[network]", "[logging]"] {
            assert!(text.contains(section), "missing {section}");
        }
        assert!(text.contains("duplicate_policy = follow"));
        assert!(text.contains("disk_size = 30MB"));
    }
}
