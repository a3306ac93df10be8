//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use ini::{Ini, Properties};
use std::path::PathBuf;
use std::str::FromStr;

use super::file::ConfigFileError;
use super::settings::ConfigFile;
use super::size::parse_size;
use crate::task::ConflictPolicy;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    if let Some(section) = ini.section(Some("cache")) {
        let s = Section::new("cache", section);
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.cache.directory = expand_tilde(v);
            }
        }
        s.size("memory_size", &mut config.cache.memory_size)?;
        s.size("recycler_size", &mut config.cache.recycler_size)?;
        s.size("disk_size", &mut config.cache.disk_size)?;
        s.value("app_version", "must be a non-negative integer", &mut config.cache.app_version)?;
        s.flag("wipe_on_version_change", &mut config.cache.wipe_on_version_change)?;
    }

    if let Some(section) = ini.section(Some("engine")) {
        let s = Section::new("engine", section);
        let engine = &mut config.engine;
        s.value("memory_threads", "must be a positive integer", &mut engine.memory_threads)?;
        s.value("disk_threads", "must be a positive integer", &mut engine.disk_threads)?;
        s.value("network_threads", "must be a positive integer", &mut engine.network_threads)?;
        s.value("memory_queue", "must be an integer, 0 for unbounded", &mut engine.memory_queue)?;
        s.value("disk_queue", "must be an integer, 0 for unbounded", &mut engine.disk_queue)?;
        s.value("network_queue", "must be an integer, 0 for unbounded", &mut engine.network_queue)?;
        s.value::<ConflictPolicy>(
            "duplicate_policy",
            "must be 'follow' or 'cancel'",
            &mut engine.duplicate_policy,
        )?;
        s.value("reload_times", "must be a non-negative integer", &mut engine.reload_times)?;
        s.value("task_timeout", "must be an integer (seconds), 0 for none", &mut engine.task_timeout)?;
        s.flag("memory_recheck", &mut engine.memory_recheck)?;
    }

    if let Some(section) = ini.section(Some("network")) {
        let s = Section::new("network", section);
        s.value(
            "connect_timeout",
            "must be a positive integer (milliseconds)",
            &mut config.network.connect_timeout_ms,
        )?;
        s.value(
            "read_timeout",
            "must be a positive integer (milliseconds)",
            &mut config.network.read_timeout_ms,
        )?;
    }

    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory").map(str::trim).filter(|v| !v.is_empty()) {
            config.logging.directory = expand_tilde(v);
        }
        if let Some(v) = section.get("file").map(str::trim).filter(|v| !v.is_empty()) {
            config.logging.file = v.to_string();
        }
    }

    Ok(config)
}

/// One INI section plus its name, for error reporting.
struct Section<'a> {
    name: &'static str,
    props: &'a Properties,
}

impl<'a> Section<'a> {
    fn new(name: &'static str, props: &'a Properties) -> Self {
        Self { name, props }
    }

    fn invalid(&self, key: &str, value: &str, reason: &str) -> ConfigFileError {
        ConfigFileError::InvalidValue {
            section: self.name.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    fn value<T: FromStr>(&self, key: &str, reason: &str, out: &mut T) -> Result<(), ConfigFileError> {
        if let Some(v) = self.props.get(key) {
            *out = v.trim().parse().map_err(|_| self.invalid(key, v, reason))?;
        }
        Ok(())
    }

    fn size(&self, key: &str, out: &mut usize) -> Result<(), ConfigFileError> {
        if let Some(v) = self.props.get(key) {
            *out = parse_size(v)
                .map_err(|_| self.invalid(key, v, "expected a size like '30MB', '512KB' or '4096'"))?;
        }
        Ok(())
    }

    fn flag(&self, key: &str, out: &mut bool) -> Result<(), ConfigFileError> {
        if let Some(v) = self.props.get(key) {
            *out = parse_bool(v).ok_or_else(|| self.invalid(key, v, "must be true or false"))?;
        }
        Ok(())
    }
}

/// Accepts true/false, yes/no, on/off and 1/0, case-insensitive.
pub(super) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Expand a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
