//! Fixed-capacity LRU cache with hit/miss statistics.
//!
//! ```ignore
//! let cache = LruCache::new(2);
//! cache.put("a", 1);
//! cache.put("b", 2);
//! cache.get(&"a");     // refreshes "a"
//! cache.put("c", 3);   // evicts "b"
//! ```

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Thread-safe LRU cache.
///
/// `get` refreshes recency; `put` of a new key at capacity evicts exactly the
/// least recently used entry. There is no expiry.
pub struct LruCache<K, V> {
    inner: Mutex<::lru::LruCache<K, V>>,
    capacity: NonZeroUsize,
    stats: CacheStatistics,
}

impl<K: Hash + Eq, V> std::fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats.snapshot(self.inner.lock().len()))
            .finish()
    }
}

impl<K: Hash + Eq, V: Clone> LruCache<K, V> {
    /// Creates a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(::lru::LruCache::new(capacity)),
            capacity,
            stats: CacheStatistics::default(),
        }
    }

    /// Looks up `key`, marking it most recently used on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let value = self.inner.lock().get(key).cloned();
        let counter = if value.is_some() {
            &self.stats.hits
        } else {
            &self.stats.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Inserts or replaces `key`.
    pub fn put(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let evicts = !inner.contains(&key) && inner.len() == self.capacity.get();
        inner.put(key, value);
        drop(inner);

        if evicts {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.insertions.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns `true` if `key` is cached, without touching recency.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().contains(key)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot(self.len())
    }
}

/// Cache statistics counters.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    /// Number of cache hits
    pub hits: AtomicU64,
    /// Number of cache misses
    pub misses: AtomicU64,
    /// Number of evictions
    pub evictions: AtomicU64,
    /// Number of insertions
    pub insertions: AtomicU64,
}

impl CacheStatistics {
    /// Counters together with the cache's current entry count.
    pub fn snapshot(&self, size: usize) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStatsSnapshot {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            size,
            hit_ratio: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

/// A point-in-time snapshot of cache statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub insertions: u64,
    pub size: usize,
    pub hit_ratio: f64,
}
