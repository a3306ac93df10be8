//! Versioned on-disk store for fetched image bytes.
//!
//! Entries are plain files named after their key. Writes go through a
//! [`DiskEditor`] that streams into `<key>.tmp` and renames on commit, so a
//! reader never sees a half-written file.
//!
//! The store directory carries a `.version` stamp. When the configured app
//! version differs from the stamp and `wipe_on_version_change` is set, every
//! entry is deleted on open.

use crate::cache::types::DiskError;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tracing::{debug, info, warn};

const VERSION_FILE: &str = ".version";
const TMP_SUFFIX: &str = ".tmp";

/// Storage for raw image bytes keyed by URL hash.
pub trait DiskStore: Send + Sync {
    /// Path of the committed file for `key`, if any.
    fn get(&self, key: &str) -> Option<PathBuf>;

    /// Open an editor for `key`.
    ///
    /// # Errors
    ///
    /// [`DiskError::EditInProgress`] if another editor holds the key.
    fn edit(&self, key: &str) -> Result<Box<dyn DiskEditor>, DiskError>;

    /// Delete the entry for `key`. Missing entries are not an error.
    fn remove(&self, key: &str) -> Result<(), DiskError>;
}

/// Pending write of one disk entry.
///
/// Dropping an editor without committing aborts it.
pub trait DiskEditor: Send {
    fn write(&mut self, data: &[u8]) -> Result<(), DiskError>;

    fn commit(self: Box<Self>) -> Result<(), DiskError>;

    fn abort(self: Box<Self>);
}

/// Disk store configuration.
#[derive(Debug, Clone)]
pub struct DiskStoreConfig {
    /// Store directory
    pub directory: PathBuf,
    /// Maximum total size of committed entries
    pub max_size_bytes: usize,
    /// App/schema version written to the stamp file
    pub app_version: u32,
    /// Delete all entries when the stamp does not match `app_version`
    pub wipe_on_version_change: bool,
}

impl DiskStoreConfig {
    pub fn new(directory: impl Into<PathBuf>, max_size_bytes: usize) -> Self {
        Self {
            directory: directory.into(),
            max_size_bytes,
            app_version: 1,
            wipe_on_version_change: false,
        }
    }

    pub fn with_app_version(mut self, version: u32) -> Self {
        self.app_version = version;
        self
    }

    pub fn with_wipe_on_version_change(mut self, wipe: bool) -> Self {
        self.wipe_on_version_change = wipe;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct DiskEntry {
    size: u64,
    last_used: u64,
}

#[derive(Default)]
struct Index {
    entries: HashMap<String, DiskEntry>,
    size_bytes: u64,
    tick: u64,
    editing: HashSet<String>,
}

impl Index {
    fn bump(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

struct StoreInner {
    directory: PathBuf,
    max_size_bytes: u64,
    index: Mutex<Index>,
}

impl StoreInner {
    fn lock(&self) -> MutexGuard<'_, Index> {
        match self.index.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.directory.join(key)
    }

    fn tmp_path(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{}{}", key, TMP_SUFFIX))
    }

    /// Delete least recently used entries down to 90% of the budget.
    fn evict_if_over_limit(&self, index: &mut Index) {
        if index.size_bytes <= self.max_size_bytes {
            return;
        }
        let target = self.max_size_bytes / 10 * 9;

        let mut victims: Vec<(String, DiskEntry)> = index
            .entries
            .iter()
            .filter(|(k, _)| !index.editing.contains(k.as_str()))
            .map(|(k, e)| (k.clone(), *e))
            .collect();
        victims.sort_by_key(|(_, e)| e.last_used);

        let mut evicted = 0usize;
        let mut freed = 0u64;
        for (key, entry) in victims {
            if index.size_bytes <= target {
                break;
            }
            match fs::remove_file(self.entry_path(&key)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to evict disk entry");
                    continue;
                }
            }
            index.entries.remove(&key);
            index.size_bytes = index.size_bytes.saturating_sub(entry.size);
            freed += entry.size;
            evicted += 1;
        }

        debug!(
            evicted,
            freed_bytes = freed,
            size_bytes = index.size_bytes,
            "disk store eviction"
        );
    }
}

/// [`DiskStore`] backed by a plain directory.
#[derive(Clone)]
pub struct FsDiskStore {
    inner: Arc<StoreInner>,
}

impl FsDiskStore {
    /// Open (or create) a store, applying the version stamp and rebuilding
    /// the index from the directory contents.
    pub fn open(config: DiskStoreConfig) -> Result<Self, DiskError> {
        let directory = config.directory.clone();
        fs::create_dir_all(&directory).map_err(|e| DiskError::InvalidDirectory {
            path: directory.display().to_string(),
            reason: e.to_string(),
        })?;

        let stamp_path = directory.join(VERSION_FILE);
        let expected = config.app_version.to_string();
        let current = fs::read_to_string(&stamp_path).ok();
        let stamp_changed = current.as_deref().map(str::trim) != Some(expected.as_str());

        if stamp_changed && current.is_some() && config.wipe_on_version_change {
            info!(
                directory = %directory.display(),
                from = current.as_deref().unwrap_or("").trim(),
                to = %expected,
                "disk store version changed, wiping entries"
            );
            wipe_entries(&directory)?;
        }
        if stamp_changed {
            fs::write(&stamp_path, &expected)?;
        }

        let store = Self {
            inner: Arc::new(StoreInner {
                directory,
                max_size_bytes: config.max_size_bytes as u64,
                index: Mutex::new(Index::default()),
            }),
        };
        store.scan()?;
        Ok(store)
    }

    fn scan(&self) -> Result<(), DiskError> {
        let mut found: Vec<(String, u64, SystemTime)> = Vec::new();
        for dir_entry in fs::read_dir(&self.inner.directory)? {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let path = dir_entry.path();
            if name.ends_with(TMP_SUFFIX) {
                // Leftover from an interrupted write.
                let _ = fs::remove_file(&path);
                continue;
            }
            let metadata = dir_entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((name, metadata.len(), modified));
        }
        found.sort_by_key(|(_, _, modified)| *modified);

        let mut index = self.inner.lock();
        for (key, size, _) in found {
            let last_used = index.bump();
            index.size_bytes += size;
            index.entries.insert(key, DiskEntry { size, last_used });
        }
        self.inner.evict_if_over_limit(&mut index);

        info!(
            directory = %self.inner.directory.display(),
            entries = index.entries.len(),
            size_bytes = index.size_bytes,
            "disk store opened"
        );
        Ok(())
    }

    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn size_bytes(&self) -> u64 {
        self.inner.lock().size_bytes
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.inner.max_size_bytes
    }

    /// Delete every entry. The version stamp is kept.
    pub fn clear(&self) -> Result<(), DiskError> {
        let mut index = self.inner.lock();
        wipe_entries(&self.inner.directory)?;
        index.entries.clear();
        index.size_bytes = 0;
        Ok(())
    }
}

impl DiskStore for FsDiskStore {
    fn get(&self, key: &str) -> Option<PathBuf> {
        let mut index = self.inner.lock();
        if !index.entries.contains_key(key) {
            return None;
        }

        let path = self.inner.entry_path(key);
        if !path.is_file() {
            if let Some(entry) = index.entries.remove(key) {
                index.size_bytes = index.size_bytes.saturating_sub(entry.size);
            }
            return None;
        }

        let tick = index.bump();
        if let Some(entry) = index.entries.get_mut(key) {
            entry.last_used = tick;
        }
        Some(path)
    }

    fn edit(&self, key: &str) -> Result<Box<dyn DiskEditor>, DiskError> {
        {
            let mut index = self.inner.lock();
            if !index.editing.insert(key.to_string()) {
                return Err(DiskError::EditInProgress(key.to_string()));
            }
        }

        let tmp_path = self.inner.tmp_path(key);
        match File::create(&tmp_path) {
            Ok(file) => Ok(Box::new(FsEditor {
                inner: Arc::clone(&self.inner),
                key: key.to_string(),
                tmp_path,
                writer: Some(BufWriter::new(file)),
                written: 0,
            })),
            Err(e) => {
                self.inner.lock().editing.remove(key);
                Err(DiskError::Io(e))
            }
        }
    }

    fn remove(&self, key: &str) -> Result<(), DiskError> {
        let mut index = self.inner.lock();
        if let Some(entry) = index.entries.remove(key) {
            index.size_bytes = index.size_bytes.saturating_sub(entry.size);
        }
        match fs::remove_file(self.inner.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DiskError::Io(e)),
        }
    }
}

struct FsEditor {
    inner: Arc<StoreInner>,
    key: String,
    tmp_path: PathBuf,
    /// `None` once committed or aborted
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl FsEditor {
    fn discard(&mut self) {
        if self.writer.take().is_some() {
            let _ = fs::remove_file(&self.tmp_path);
            self.inner.lock().editing.remove(&self.key);
        }
    }
}

impl DiskEditor for FsEditor {
    fn write(&mut self, data: &[u8]) -> Result<(), DiskError> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            DiskError::Io(std::io::Error::other("editor already finished"))
        })?;
        writer.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), DiskError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };

        let flushed = writer.flush();
        drop(writer);
        let result =
            flushed.and_then(|_| fs::rename(&self.tmp_path, self.inner.entry_path(&self.key)));

        let mut index = self.inner.lock();
        index.editing.remove(&self.key);
        if let Err(e) = result {
            let _ = fs::remove_file(&self.tmp_path);
            return Err(DiskError::Io(e));
        }

        let last_used = index.bump();
        let size = self.written;
        if let Some(old) = index.entries.insert(self.key.clone(), DiskEntry { size, last_used }) {
            index.size_bytes = index.size_bytes.saturating_sub(old.size);
        }
        index.size_bytes += size;
        self.inner.evict_if_over_limit(&mut index);
        Ok(())
    }

    fn abort(mut self: Box<Self>) {
        self.discard();
    }
}

impl Drop for FsEditor {
    fn drop(&mut self) {
        self.discard();
    }
}

fn wipe_entries(directory: &Path) -> Result<(), DiskError> {
    for dir_entry in fs::read_dir(directory)? {
        let dir_entry = dir_entry?;
        if dir_entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if dir_entry.file_type()?.is_file() {
            fs::remove_file(dir_entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(max: usize) -> (FsDiskStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FsDiskStore::open(DiskStoreConfig::new(dir.path(), max)).unwrap();
        (store, dir)
    }

    fn write_entry(store: &FsDiskStore, key: &str, data: &[u8]) {
        let mut editor = store.edit(key).unwrap();
        editor.write(data).unwrap();
        editor.commit().unwrap();
    }

    #[test]
    fn test_commit_then_get() {
        let (store, _dir) = open_store(1024 * 1024);
        write_entry(&store, "abc", b"hello");

        let path = store.get("abc").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"hello");
        assert_eq!(store.size_bytes(), 5);
    }

    #[test]
    fn test_miss() {
        let (store, _dir) = open_store(1024);
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn test_abort_leaves_nothing() {
        let (store, dir) = open_store(1024);
        let mut editor = store.edit("abc").unwrap();
        editor.write(b"partial").unwrap();
        editor.abort();

        assert!(store.get("abc").is_none());
        assert!(!dir.path().join("abc.tmp").exists());
    }

    #[test]
    fn test_dropped_editor_releases_key() {
        let (store, _dir) = open_store(1024);
        {
            let _editor = store.edit("abc").unwrap();
            assert!(matches!(
                store.edit("abc"),
                Err(DiskError::EditInProgress(_))
            ));
        }
        assert!(store.edit("abc").is_ok());
    }

    #[test]
    fn test_remove() {
        let (store, _dir) = open_store(1024);
        write_entry(&store, "abc", b"data");
        store.remove("abc").unwrap();

        assert!(store.get("abc").is_none());
        assert_eq!(store.size_bytes(), 0);
        store.remove("abc").unwrap();
    }

    #[test]
    fn test_eviction_drops_least_recently_used() {
        let (store, _dir) = open_store(100);
        write_entry(&store, "a", &[0u8; 40]);
        write_entry(&store, "b", &[0u8; 40]);
        store.get("a").unwrap();
        write_entry(&store, "c", &[0u8; 40]);

        assert!(store.get("a").is_some());
        assert!(store.get("b").is_none());
        assert!(store.get("c").is_some());
        assert!(store.size_bytes() <= 100);
    }

    #[test]
    fn test_reopen_keeps_entries() {
        let dir = TempDir::new().unwrap();
        {
            let store = FsDiskStore::open(DiskStoreConfig::new(dir.path(), 1024)).unwrap();
            write_entry(&store, "abc", b"persisted");
        }
        let store = FsDiskStore::open(DiskStoreConfig::new(dir.path(), 1024)).unwrap();
        assert_eq!(store.entry_count(), 1);
        assert!(store.get("abc").is_some());
    }

    #[test]
    fn test_version_change_wipes_when_configured() {
        let dir = TempDir::new().unwrap();
        {
            let store = FsDiskStore::open(DiskStoreConfig::new(dir.path(), 1024)).unwrap();
            write_entry(&store, "abc", b"v1 data");
        }

        let config = DiskStoreConfig::new(dir.path(), 1024)
            .with_app_version(2)
            .with_wipe_on_version_change(true);
        let store = FsDiskStore::open(config).unwrap();

        assert_eq!(store.entry_count(), 0);
        assert_eq!(
            fs::read_to_string(dir.path().join(VERSION_FILE)).unwrap(),
            "2"
        );
    }

    #[test]
    fn test_version_change_keeps_entries_by_default() {
        let dir = TempDir::new().unwrap();
        {
            let store = FsDiskStore::open(DiskStoreConfig::new(dir.path(), 1024)).unwrap();
            write_entry(&store, "abc", b"v1 data");
        }

        let config = DiskStoreConfig::new(dir.path(), 1024).with_app_version(2);
        let store = FsDiskStore::open(config).unwrap();
        assert_eq!(store.entry_count(), 1);
    }

    #[test]
    fn test_scan_removes_leftover_tmp_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("abc.tmp"), b"junk").unwrap();

        let store = FsDiskStore::open(DiskStoreConfig::new(dir.path(), 1024)).unwrap();
        assert_eq!(store.entry_count(), 0);
        assert!(!dir.path().join("abc.tmp").exists());
    }
}
