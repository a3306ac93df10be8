//! Cache statistics and the memory report.

use std::fmt;

/// Running counters for the memory cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    /// Entries pushed out of the active cache by `trim`
    pub evictions: u64,
    /// Evicted entries that went into the recycle station
    pub staged: u64,
    /// Resources released by the cache
    pub freed: u64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_put(&mut self) {
        self.puts += 1;
    }

    pub fn record_eviction(&mut self, staged: bool) {
        self.evictions += 1;
        if staged {
            self.staged += 1;
        }
    }

    pub fn record_freed(&mut self, count: usize) {
        self.freed += count as u64;
    }

    /// Hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Point-in-time snapshot of the memory cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheReport {
    pub cache_budget: usize,
    pub cache_bytes: usize,
    pub cache_entries: usize,
    pub station_budget: usize,
    pub station_bytes: usize,
    pub station_entries: usize,
    pub unused_keys: usize,
    pub stats: CacheStats,
}

impl fmt::Display for CacheReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "cache:    {} / {} ({} entries, {} unused)",
            format_bytes(self.cache_bytes),
            format_bytes(self.cache_budget),
            self.cache_entries,
            self.unused_keys
        )?;
        if self.station_budget == 0 {
            writeln!(f, "recycler: disabled")?;
        } else {
            writeln!(
                f,
                "recycler: {} / {} ({} entries)",
                format_bytes(self.station_bytes),
                format_bytes(self.station_budget),
                self.station_entries
            )?;
        }
        write!(
            f,
            "stats:    {} hits, {} misses ({:.1}% hit rate), {} evictions, {} staged, {} freed",
            self.stats.hits,
            self.stats.misses,
            self.stats.hit_rate() * 100.0,
            self.stats.evictions,
            self.stats.staged,
            self.stats.freed
        )
    }
}

fn format_bytes(bytes: usize) -> String {
    crate::config::format_size(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let mut stats = CacheStats::new();
        assert_eq!(stats.hit_rate(), 0.0);

        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_eviction_counts_staged() {
        let mut stats = CacheStats::new();
        stats.record_eviction(true);
        stats.record_eviction(false);

        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.staged, 1);
    }

    #[test]
    fn test_report_display_mentions_disabled_recycler() {
        let report = CacheReport {
            cache_budget: 1024,
            cache_bytes: 512,
            cache_entries: 1,
            station_budget: 0,
            station_bytes: 0,
            station_entries: 0,
            unused_keys: 0,
            stats: CacheStats::new(),
        };

        let text = report.to_string();
        assert!(text.contains("recycler: disabled"));
        assert!(text.contains("1 entries"));
    }
}
