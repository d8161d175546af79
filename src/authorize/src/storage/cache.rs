//! Bounded, TTL-expiring record cache

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::databroker::{Record, RecordKey};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of records held
    pub capacity: usize,

    /// Time-to-live of a cached record
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
struct CachedRecord {
    record: Record,
    cached_at: Instant,
}

impl CachedRecord {
    fn new(record: Record) -> Self {
        Self {
            record,
            cached_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

enum Lookup {
    Hit(Record),
    Expired,
    Miss,
}

struct Inner {
    entries: LruCache<RecordKey, CachedRecord>,

    /// Bumped by every invalidation
    epoch: u64,
}

/// Process-wide record cache keyed by (type, id).
///
/// A cached record only answers reads that require a version at or below
/// its own. Fills carry the epoch observed before the remote read started;
/// a fill from before the latest invalidation is discarded, so a slow read
/// cannot resurrect data a write just replaced.
pub struct RecordCache {
    inner: Mutex<Inner>,
    config: CacheConfig,
    stats: Arc<DashMap<String, usize>>,
}

impl RecordCache {
    /// Create an empty cache
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                epoch: 0,
            }),
            config,
            stats: Arc::new(DashMap::new()),
        }
    }

    /// Cached record for `key`, if it is fresh and at least `min_version`
    pub fn get(&self, key: &RecordKey, min_version: u64) -> Option<Record> {
        let mut inner = self.inner.lock();
        let lookup = match inner.entries.get(key) {
            None => Lookup::Miss,
            Some(entry) if entry.is_expired(self.config.ttl) => Lookup::Expired,
            Some(entry) if entry.record.version < min_version => Lookup::Miss,
            Some(entry) => Lookup::Hit(entry.record.clone()),
        };
        if matches!(lookup, Lookup::Expired) {
            inner.entries.pop(key);
        }
        drop(inner);

        match lookup {
            Lookup::Hit(record) => {
                self.increment_stat("hits");
                Some(record)
            }
            Lookup::Expired => {
                self.increment_stat("expirations");
                self.increment_stat("misses");
                None
            }
            Lookup::Miss => {
                self.increment_stat("misses");
                None
            }
        }
    }

    /// Current invalidation epoch; pass it back to [`RecordCache::insert`]
    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    /// Store a record read at `epoch`.
    ///
    /// Returns false when the record was discarded, either because an
    /// invalidation happened since `epoch` or because a newer version is
    /// already cached.
    pub fn insert(&self, record: Record, epoch: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            return false;
        }

        let key = record.key();
        if let Some(existing) = inner.entries.peek(&key) {
            if existing.record.version > record.version && !existing.is_expired(self.config.ttl) {
                return false;
            }
        }

        inner.entries.put(key, CachedRecord::new(record));
        true
    }

    /// Drop the given keys and fence off in-flight fills
    pub fn invalidate(&self, keys: &[RecordKey]) {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        for key in keys {
            inner.entries.pop(key);
        }
        drop(inner);

        for _ in keys {
            self.increment_stat("invalidations");
        }
    }

    /// Clear the entire cache
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        inner.entries.clear();
        drop(inner);

        self.stats.clear();
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            expirations: self.get_stat("expirations"),
            invalidations: self.get_stat("invalidations"),
            entries: self.inner.lock().entries.len(),
            max_entries: self.config.capacity,
        }
    }

    fn increment_stat(&self, key: &str) {
        self.stats
            .entry(key.to_string())
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    fn get_stat(&self, key: &str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

impl Default for RecordCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub expirations: usize,
    pub invalidations: usize,
    pub entries: usize,
    pub max_entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::databroker::SESSION_TYPE;
    use serde_json::json;

    fn record(id: &str, version: u64) -> Record {
        Record {
            version,
            ..Record::new(SESSION_TYPE, id, json!({"id": id}))
        }
    }

    fn key(id: &str) -> RecordKey {
        RecordKey::new(SESSION_TYPE, id)
    }

    #[test]
    fn test_put_get() {
        let cache = RecordCache::default();

        assert!(cache.get(&key("s1"), 0).is_none());
        assert!(cache.insert(record("s1", 3), cache.epoch()));

        let cached = cache.get(&key("s1"), 0).unwrap();
        assert_eq!(cached.version, 3);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_min_version_is_honoured() {
        let cache = RecordCache::default();
        cache.insert(record("s1", 3), cache.epoch());

        assert!(cache.get(&key("s1"), 3).is_some());
        assert!(cache.get(&key("s1"), 4).is_none());
    }

    #[tokio::test]
    async fn test_ttl() {
        let cache = RecordCache::new(CacheConfig {
            ttl: Duration::from_millis(50),
            ..Default::default()
        });
        cache.insert(record("s1", 1), cache.epoch());
        assert!(cache.get(&key("s1"), 0).is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get(&key("s1"), 0).is_none());
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let cache = RecordCache::new(CacheConfig {
            capacity: 2,
            ..Default::default()
        });
        let epoch = cache.epoch();
        cache.insert(record("a", 1), epoch);
        cache.insert(record("b", 1), epoch);
        cache.get(&key("a"), 0);
        cache.insert(record("c", 1), epoch);

        assert!(cache.get(&key("a"), 0).is_some());
        assert!(cache.get(&key("b"), 0).is_none());
        assert!(cache.get(&key("c"), 0).is_some());
    }

    #[test]
    fn test_fill_after_invalidation_is_discarded() {
        let cache = RecordCache::default();

        let before_write = cache.epoch();
        cache.invalidate(&[key("s1")]);

        assert!(!cache.insert(record("s1", 1), before_write));
        assert!(cache.get(&key("s1"), 0).is_none());
        assert_eq!(cache.stats().invalidations, 1);

        assert!(cache.insert(record("s1", 2), cache.epoch()));
    }

    #[test]
    fn test_older_version_does_not_replace_newer() {
        let cache = RecordCache::default();
        let epoch = cache.epoch();

        cache.insert(record("s1", 5), epoch);
        assert!(!cache.insert(record("s1", 4), epoch));
        assert_eq!(cache.get(&key("s1"), 0).unwrap().version, 5);
    }

    #[test]
    fn test_clear() {
        let cache = RecordCache::default();
        cache.insert(record("s1", 1), cache.epoch());
        assert_eq!(cache.stats().entries, 1);

        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }
}
