//! # gcache Eviction Engine
//!
//! Two replacement policies behind one facade: recency-ordered LRU and
//! frequency-ordered LFU. Both share the same contract: an approximate
//! byte budget (`key.len() + value.len()` per entry, 0 = unbounded), a
//! TTL sweep, and an optional eviction callback invoked once per
//! dropped entry.
//!
//! Policy selection is by name through [`Cache::with_policy`]; the
//! variants carry their own state and the facade delegates.

pub mod entry;
pub mod lfu;
pub mod lru;

use std::time::{Duration, SystemTime};

use gcache_common::Measured;

pub use entry::Entry;
pub use lfu::LfuPolicy;
pub use lru::LruPolicy;

/// Callback invoked with the key and final value of every entry dropped
/// by eviction or a TTL sweep. Runs synchronously under the caller's
/// lock; it must be fast and must not re-enter the cache.
pub type EvictionHook<V> = Box<dyn FnMut(String, V) + Send>;

/// A bounded cache with a pluggable replacement policy.
pub enum Cache<V> {
    /// Recency-ordered policy.
    Lru(LruPolicy<V>),
    /// Frequency-ordered policy.
    Lfu(LfuPolicy<V>),
}

impl<V: Measured + Clone> Cache<V> {
    /// Builds a cache for the named policy (`"lru"` or `"lfu"`).
    /// Unknown names return `None`.
    pub fn with_policy(
        name: &str,
        max_bytes: u64,
        on_evicted: Option<EvictionHook<V>>,
    ) -> Option<Self> {
        match name {
            "lru" => Some(Cache::Lru(LruPolicy::new(max_bytes, on_evicted))),
            "lfu" => Some(Cache::Lfu(LfuPolicy::new(max_bytes, on_evicted))),
            _ => None,
        }
    }

    /// Looks up a key, touching the entry on a hit.
    pub fn get(&mut self, key: &str) -> Option<(V, SystemTime)> {
        match self {
            Cache::Lru(policy) => policy.get(key),
            Cache::Lfu(policy) => policy.get(key),
        }
    }

    /// Inserts or replaces a value, evicting down to the byte budget.
    pub fn put(&mut self, key: &str, value: V) {
        match self {
            Cache::Lru(policy) => policy.put(key, value),
            Cache::Lfu(policy) => policy.put(key, value),
        }
    }

    /// Removes expired entries.
    pub fn clean_up(&mut self, ttl: Duration) {
        match self {
            Cache::Lru(policy) => policy.clean_up(ttl),
            Cache::Lfu(policy) => policy.clean_up(ttl),
        }
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        match self {
            Cache::Lru(policy) => policy.len(),
            Cache::Lfu(policy) => policy.len(),
        }
    }

    /// True when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accounted byte usage.
    pub fn bytes_used(&self) -> u64 {
        match self {
            Cache::Lru(policy) => policy.bytes_used(),
            Cache::Lfu(policy) => policy.bytes_used(),
        }
    }
}
