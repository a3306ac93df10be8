//! In-memory resource cache with LRU eviction and a recycle station.
//!
//! ```text
//!            put / get                       trim (LRU victim)
//!   ┌──────────────────────────┐      ┌──────────────────────────────┐
//!   │ active cache (≤ budget)  │ ───► │ unused? ── yes ──► free now  │
//!   └──────────────────────────┘      │    └──── no ───► station     │
//!                                     └──────────────────────────────┘
//!   ┌──────────────────────────┐
//!   │ recycle station          │ ◄── freed on mark_unused / remove / put
//!   │ (≤ station budget)       │     over budget ⇒ RecyclerOverflow
//!   └──────────────────────────┘
//! ```
//!
//! Evicted resources that nobody has declared unused may still be on screen,
//! so they wait in the station until the consumer calls
//! [`ResourceCache::mark_unused`]. A station budget of zero disables the
//! station and every eviction frees immediately.
//!
//! All bookkeeping happens under one lock. Buffers are released after the
//! lock is dropped.

use crate::cache::stats::{CacheReport, CacheStats};
use crate::cache::types::CacheError;
use crate::resource::ImageResource;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, trace};

/// Entry in the active cache.
struct CacheEntry {
    resource: ImageResource,
    size: usize,
    /// Recency tick, also the key into the LRU order map
    tick: u64,
}

/// Everything guarded by the cache lock.
#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// tick → key, oldest first
    lru: BTreeMap<u64, String>,
    next_tick: u64,
    size_bytes: usize,
    station: HashMap<String, ImageResource>,
    station_bytes: usize,
    unused: HashSet<String>,
    stats: CacheStats,
}

impl CacheState {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn take_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(&entry.tick);
        self.size_bytes = self.size_bytes.saturating_sub(entry.size);
        Some(entry)
    }

    fn take_staged(&mut self, key: &str) -> Option<ImageResource> {
        let resource = self.station.remove(key)?;
        self.station_bytes = self.station_bytes.saturating_sub(size_of(&resource));
        Some(resource)
    }
}

/// Bounded cache of decoded images.
///
/// The cache is the only component allowed to free an [`ImageResource`].
pub struct ResourceCache {
    state: Mutex<CacheState>,
    /// Active cache budget in bytes
    max_size_bytes: usize,
    /// Recycle station budget in bytes, 0 = disabled
    station_max_bytes: usize,
}

/// Byte size of a resource, or 0 once it has been freed.
pub fn size_of(resource: &ImageResource) -> usize {
    if resource.is_valid() {
        resource.byte_size()
    } else {
        0
    }
}

impl ResourceCache {
    /// Create a cache.
    ///
    /// # Arguments
    ///
    /// * `max_size_bytes` - Budget of the active cache
    /// * `station_max_bytes` - Budget of the recycle station (0 disables it)
    pub fn new(max_size_bytes: usize, station_max_bytes: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_size_bytes,
            station_max_bytes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Look up a resource in the active cache.
    ///
    /// A hit refreshes recency and clears any unused mark on the key. The
    /// recycle station is never searched.
    pub fn get(&self, key: &str) -> Option<ImageResource> {
        let mut state = self.lock();
        let tick = state.bump();

        let hit = state
            .entries
            .get_mut(key)
            .filter(|entry| entry.resource.is_valid())
            .map(|entry| {
                let old = entry.tick;
                entry.tick = tick;
                (entry.resource.clone(), old)
            });
        let Some((resource, old_tick)) = hit else {
            state.stats.record_miss();
            return None;
        };

        state.lru.remove(&old_tick);
        state.lru.insert(tick, key.to_string());
        state.unused.remove(key);
        state.stats.record_hit();
        Some(resource)
    }

    /// Insert a resource, replacing and freeing anything cached under `key`.
    ///
    /// Trims the active cache back to budget afterwards; see [`trim_to`].
    ///
    /// [`trim_to`]: ResourceCache::trim_to
    pub fn put(&self, key: &str, resource: ImageResource) -> Result<(), CacheError> {
        let mut released = Vec::new();
        let result = {
            let mut state = self.lock();

            if let Some(old) = state.take_entry(key) {
                released.push(old.resource);
            }
            if let Some(old) = state.take_staged(key) {
                released.push(old);
            }
            state.unused.remove(key);

            resource.activate();
            let size = size_of(&resource);
            let tick = state.bump();
            state.lru.insert(tick, key.to_string());
            state.entries.insert(
                key.to_string(),
                CacheEntry {
                    resource: resource.clone(),
                    size,
                    tick,
                },
            );
            state.size_bytes += size;
            state.stats.record_put();

            trace!(key = key, size, total = state.size_bytes, "cache put");
            self.trim_locked(&mut state, self.max_size_bytes, &mut released)
        };

        // Re-putting the same buffer must not free it.
        released.retain(|r| !r.ptr_eq(&resource));
        self.release_all(released);
        result
    }

    /// Declare that no consumer needs the resource under `key` any more.
    ///
    /// A staged resource is freed right away. A cached one is remembered so
    /// that a later eviction frees it instead of staging it. Unknown keys are
    /// ignored.
    pub fn mark_unused(&self, key: &str) {
        let staged = {
            let mut state = self.lock();
            match state.take_staged(key) {
                Some(resource) => Some(resource),
                None => {
                    if state.entries.contains_key(key) {
                        state.unused.insert(key.to_string());
                    }
                    None
                }
            }
        };

        if let Some(resource) = staged {
            debug!(key = key, "freeing staged resource marked unused");
            self.release_all(vec![resource]);
        }
    }

    /// Free whatever is stored under `key`, in the cache or the station.
    pub fn remove(&self, key: &str) {
        let mut released = Vec::new();
        {
            let mut state = self.lock();
            if let Some(entry) = state.take_entry(key) {
                released.push(entry.resource);
            }
            if let Some(resource) = state.take_staged(key) {
                released.push(resource);
            }
            state.unused.remove(key);
        }
        self.release_all(released);
    }

    /// Free every cached and staged resource. Returns how many were freed.
    pub fn remove_all(&self) -> usize {
        let released: Vec<ImageResource> = {
            let mut state = self.lock();
            let entries = std::mem::take(&mut state.entries);
            let station = std::mem::take(&mut state.station);
            state.lru.clear();
            state.unused.clear();
            state.size_bytes = 0;
            state.station_bytes = 0;
            entries
                .into_values()
                .map(|e| e.resource)
                .chain(station.into_values())
                .collect()
        };
        let count = released.len();
        self.release_all(released);
        count
    }

    /// Evict least recently used entries until the active cache fits in
    /// `budget` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::RecyclerOverflow`] if staging pushed the
    /// station past its budget. Entries already moved stay in the station.
    pub fn trim_to(&self, budget: usize) -> Result<(), CacheError> {
        let mut released = Vec::new();
        let result = {
            let mut state = self.lock();
            self.trim_locked(&mut state, budget, &mut released)
        };
        self.release_all(released);
        result
    }

    /// Free every active entry that is currently marked unused.
    ///
    /// Returns the number of bytes released.
    pub fn reduce(&self) -> usize {
        let released: Vec<ImageResource> = {
            let mut state = self.lock();
            let keys: Vec<String> = state
                .unused
                .iter()
                .filter(|k| state.entries.contains_key(k.as_str()))
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|k| {
                    state.unused.remove(k);
                    state.take_entry(k).map(|e| e.resource)
                })
                .collect()
        };

        let bytes = released.iter().map(size_of).sum();
        debug!(count = released.len(), bytes, "reducing unused resources");
        self.release_all(released);
        bytes
    }

    fn trim_locked(
        &self,
        state: &mut CacheState,
        budget: usize,
        released: &mut Vec<ImageResource>,
    ) -> Result<(), CacheError> {
        while state.size_bytes > budget {
            let Some((_, key)) = state.lru.pop_first() else {
                break;
            };
            let Some(entry) = state.entries.remove(&key) else {
                continue;
            };
            state.size_bytes = state.size_bytes.saturating_sub(entry.size);

            let unused = state.unused.remove(&key);
            if unused || self.station_max_bytes == 0 || !entry.resource.is_valid() {
                state.stats.record_eviction(false);
                released.push(entry.resource);
                continue;
            }

            if let Some(previous) = state.take_staged(&key) {
                released.push(previous);
            }
            entry.resource.stage();
            state.station_bytes += size_of(&entry.resource);
            state.station.insert(key, entry.resource);
            state.stats.record_eviction(true);

            if state.station_bytes > self.station_max_bytes {
                error!(
                    staged = state.station_bytes,
                    budget = self.station_max_bytes,
                    "recycle station over budget"
                );
                return Err(CacheError::RecyclerOverflow {
                    staged: state.station_bytes,
                    budget: self.station_max_bytes,
                });
            }
        }
        Ok(())
    }

    fn release_all(&self, resources: Vec<ImageResource>) {
        let freed = resources.iter().filter(|r| r.release()).count();
        if freed > 0 {
            self.lock().stats.record_freed(freed);
        }
    }

    /// Returns `true` if `key` is in the active cache.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Returns `true` if `key` is waiting in the recycle station.
    pub fn is_staged(&self, key: &str) -> bool {
        self.lock().station.contains_key(key)
    }

    /// Returns `true` if `key` carries an unused mark.
    pub fn is_unused(&self, key: &str) -> bool {
        self.lock().unused.contains(key)
    }

    pub fn entry_count(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.lock().size_bytes
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    pub fn station_size_bytes(&self) -> usize {
        self.lock().station_bytes
    }

    pub fn station_max_bytes(&self) -> usize {
        self.station_max_bytes
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats.clone()
    }

    /// Snapshot of sizes, budgets and counters.
    pub fn report(&self) -> CacheReport {
        let state = self.lock();
        CacheReport {
            cache_budget: self.max_size_bytes,
            cache_bytes: state.size_bytes,
            cache_entries: state.entries.len(),
            station_budget: self.station_max_bytes,
            station_bytes: state.station_bytes,
            station_entries: state.station.len(),
            unused_keys: state.unused.len(),
            stats: state.stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceState;

    fn resource(bytes: usize) -> ImageResource {
        ImageResource::new(1, 1, vec![0u8; bytes])
    }

    #[test]
    fn test_put_then_get_returns_same_resource() {
        let cache = ResourceCache::new(1000, 1000);
        let r = resource(10);
        cache.put("k", r.clone()).unwrap();

        let got = cache.get("k").unwrap();
        assert!(got.ptr_eq(&r));
        assert_eq!(cache.size_bytes(), 10);
    }

    #[test]
    fn test_get_miss_does_not_search_station() {
        let cache = ResourceCache::new(100, 1000);
        cache.put("k1", resource(60)).unwrap();
        cache.put("k2", resource(60)).unwrap();

        assert!(cache.is_staged("k1"));
        assert!(cache.get("k1").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_evicted_entry_is_staged_and_still_valid() {
        let cache = ResourceCache::new(100, 1000);
        let r1 = resource(60);
        cache.put("k1", r1.clone()).unwrap();
        cache.put("k2", resource(60)).unwrap();

        assert!(!cache.contains("k1"));
        assert!(cache.is_staged("k1"));
        assert!(r1.is_valid());
        assert_eq!(r1.state(), ResourceState::Staged);
        assert_eq!(cache.size_bytes(), 60);
        assert_eq!(cache.station_size_bytes(), 60);
    }

    #[test]
    fn test_unused_entry_is_freed_on_eviction() {
        let cache = ResourceCache::new(100, 1000);
        let r1 = resource(60);
        cache.put("k1", r1.clone()).unwrap();
        cache.mark_unused("k1");
        cache.put("k2", resource(60)).unwrap();

        assert!(!r1.is_valid());
        assert!(!cache.is_staged("k1"));
        assert_eq!(cache.station_size_bytes(), 0);
    }

    #[test]
    fn test_get_clears_unused_mark() {
        let cache = ResourceCache::new(100, 1000);
        let r1 = resource(60);
        cache.put("k1", r1.clone()).unwrap();
        cache.mark_unused("k1");
        assert!(cache.is_unused("k1"));

        cache.get("k1").unwrap();
        assert!(!cache.is_unused("k1"));

        cache.put("k2", resource(60)).unwrap();
        assert!(r1.is_valid(), "re-read resource must be staged, not freed");
    }

    #[test]
    fn test_mark_unused_ignores_unknown_key() {
        let cache = ResourceCache::new(100, 1000);
        cache.mark_unused("missing");
        assert!(!cache.is_unused("missing"));
        assert_eq!(cache.report().unused_keys, 0);
    }

    #[test]
    fn test_mark_unused_frees_staged_resource() {
        let cache = ResourceCache::new(100, 1000);
        let r1 = resource(60);
        cache.put("k1", r1.clone()).unwrap();
        cache.put("k2", resource(60)).unwrap();
        assert!(r1.is_valid());

        cache.mark_unused("k1");
        assert!(!r1.is_valid());
        assert_eq!(cache.station_size_bytes(), 0);
        assert!(!cache.is_unused("k1"));
    }

    #[test]
    fn test_put_replaces_and_frees_old_entry() {
        let cache = ResourceCache::new(1000, 1000);
        let old = resource(10);
        let new = resource(20);
        cache.put("k", old.clone()).unwrap();
        cache.put("k", new.clone()).unwrap();

        assert!(!old.is_valid());
        assert!(new.is_valid());
        assert_eq!(cache.size_bytes(), 20);
    }

    #[test]
    fn test_put_same_resource_twice_keeps_it_alive() {
        let cache = ResourceCache::new(1000, 1000);
        let r = resource(10);
        cache.put("k", r.clone()).unwrap();
        cache.put("k", r.clone()).unwrap();

        assert!(r.is_valid());
        assert_eq!(cache.size_bytes(), 10);
    }

    #[test]
    fn test_put_staged_buffer_makes_it_active_again() {
        let cache = ResourceCache::new(100, 1000);
        let r1 = resource(60);
        cache.put("k1", r1.clone()).unwrap();
        cache.put("k2", resource(60)).unwrap();
        assert_eq!(r1.state(), ResourceState::Staged);

        cache.put("k1", r1.clone()).unwrap();
        assert!(cache.contains("k1"));
        assert!(!cache.is_staged("k1"));
        assert!(r1.is_valid());
        assert_eq!(r1.state(), ResourceState::Active);
    }

    #[test]
    fn test_put_frees_staged_entry_with_same_key() {
        let cache = ResourceCache::new(100, 1000);
        let staged = resource(60);
        cache.put("k1", staged.clone()).unwrap();
        cache.put("k2", resource(60)).unwrap();
        assert!(cache.is_staged("k1"));

        cache.put("k1", resource(30)).unwrap();
        assert!(!staged.is_valid());
        assert!(!cache.is_staged("k1"));
    }

    #[test]
    fn test_remove_frees_everywhere() {
        let cache = ResourceCache::new(100, 1000);
        let r1 = resource(60);
        let r2 = resource(60);
        cache.put("k1", r1.clone()).unwrap();
        cache.put("k2", r2.clone()).unwrap();

        cache.remove("k1");
        cache.remove("k2");
        assert!(!r1.is_valid());
        assert!(!r2.is_valid());
        assert_eq!(cache.size_bytes(), 0);
        assert_eq!(cache.station_size_bytes(), 0);
    }

    #[test]
    fn test_remove_all_frees_cache_and_station() {
        let cache = ResourceCache::new(100, 1000);
        let resources: Vec<_> = (0..3).map(|_| resource(60)).collect();
        for (i, r) in resources.iter().enumerate() {
            cache.put(&format!("k{}", i), r.clone()).unwrap();
        }

        assert_eq!(cache.remove_all(), 3);
        assert!(resources.iter().all(|r| !r.is_valid()));
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn test_trim_respects_budget() {
        let cache = ResourceCache::new(1000, 10_000);
        for i in 0..10 {
            cache.put(&format!("k{}", i), resource(100)).unwrap();
        }
        assert_eq!(cache.size_bytes(), 1000);

        cache.trim_to(250).unwrap();
        assert!(cache.size_bytes() <= 250);
        assert_eq!(cache.entry_count(), 2);
        // Most recent survive
        assert!(cache.contains("k9"));
        assert!(cache.contains("k8"));
    }

    #[test]
    fn test_recycler_overflow() {
        let cache = ResourceCache::new(100, 50);
        cache.put("k1", resource(60)).unwrap();

        let err = cache.put("k2", resource(60)).unwrap_err();
        assert_eq!(
            err,
            CacheError::RecyclerOverflow {
                staged: 60,
                budget: 50
            }
        );
    }

    #[test]
    fn test_disabled_station_frees_on_eviction() {
        let cache = ResourceCache::new(100, 0);
        let r1 = resource(60);
        cache.put("k1", r1.clone()).unwrap();
        cache.put("k2", resource(60)).unwrap();

        assert!(!r1.is_valid());
        assert!(!cache.is_staged("k1"));
    }

    #[test]
    fn test_reduce_frees_unused_entries_only() {
        let cache = ResourceCache::new(1000, 1000);
        let keep = resource(10);
        let drop = resource(20);
        cache.put("keep", keep.clone()).unwrap();
        cache.put("drop", drop.clone()).unwrap();
        cache.mark_unused("drop");

        assert_eq!(cache.reduce(), 20);
        assert!(keep.is_valid());
        assert!(!drop.is_valid());
        assert_eq!(cache.size_bytes(), 10);
    }

    #[test]
    fn test_size_of_freed_resource_is_zero() {
        let r = resource(10);
        assert_eq!(size_of(&r), 10);
        r.release();
        assert_eq!(size_of(&r), 0);
    }

    #[test]
    fn test_lru_order_follows_reads() {
        let cache = ResourceCache::new(200, 0);
        cache.put("a", resource(100)).unwrap();
        cache.put("b", resource(100)).unwrap();
        cache.get("a").unwrap();
        cache.put("c", resource(100)).unwrap();

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
    }

    #[test]
    fn test_report_counts() {
        let cache = ResourceCache::new(100, 1000);
        cache.put("k1", resource(60)).unwrap();
        cache.put("k2", resource(60)).unwrap();

        let report = cache.report();
        assert_eq!(report.cache_entries, 1);
        assert_eq!(report.station_entries, 1);
        assert_eq!(report.station_bytes, 60);
        assert_eq!(report.stats.evictions, 1);
        assert_eq!(report.stats.staged, 1);
    }
}
