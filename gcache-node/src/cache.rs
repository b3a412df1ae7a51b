//! # Cache Envelope
//!
//! One mutex around one policy instance. The policies assume
//! single-threaded access; every mutation funnels through this lock,
//! and eviction callbacks run synchronously under it.
//!
//! The underlying cache is built lazily on first use through the policy
//! factory, so a group that never sees traffic never allocates.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use gcache_common::ByteView;
use gcache_policy::{Cache, EvictionHook};

struct EnvelopeState {
    cache: Option<Cache<ByteView>>,
    /// Held until lazy construction, then moved into the cache.
    on_evicted: Option<EvictionHook<ByteView>>,
}

/// Concurrency envelope around a single replacement policy.
pub struct CacheEnvelope {
    policy: String,
    max_bytes: u64,
    inner: Mutex<EnvelopeState>,
}

impl CacheEnvelope {
    /// Creates an envelope for the named policy. Unknown names fall
    /// back to `lru` with a warning.
    pub fn new(policy: &str, max_bytes: u64, on_evicted: Option<EvictionHook<ByteView>>) -> Self {
        let policy = if matches!(policy, "lru" | "lfu") {
            policy.to_string()
        } else {
            warn!(%policy, "unknown cache policy, falling back to lru");
            "lru".to_string()
        };
        CacheEnvelope {
            policy,
            max_bytes,
            inner: Mutex::new(EnvelopeState {
                cache: None,
                on_evicted,
            }),
        }
    }

    /// Looks up a key under the lock.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        self.with_cache(|cache| cache.get(key).map(|(value, _)| value))
    }

    /// Inserts or replaces a value under the lock.
    pub fn put(&self, key: &str, value: ByteView) {
        self.with_cache(|cache| cache.put(key, value));
    }

    /// Removes expired entries under the lock.
    pub fn clean_up(&self, ttl: Duration) {
        self.with_cache(|cache| cache.clean_up(ttl));
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.with_cache(|cache| cache.len())
    }

    /// True when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_cache<R>(&self, op: impl FnOnce(&mut Cache<ByteView>) -> R) -> R {
        let mut state = self.inner.lock();
        let EnvelopeState { cache, on_evicted } = &mut *state;
        let cache = cache.get_or_insert_with(|| {
            let hook = on_evicted.take();
            // The name was normalized at construction, so the factory
            // cannot miss; the fallback keeps this path panic-free.
            Cache::with_policy(&self.policy, self.max_bytes, hook)
                .unwrap_or_else(|| Cache::Lru(gcache_policy::LruPolicy::new(self.max_bytes, None)))
        });
        op(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_is_lazy() {
        let envelope = CacheEnvelope::new("lru", 0, None);
        assert!(envelope.inner.lock().cache.is_none());
        envelope.put("key", ByteView::from("value"));
        assert!(envelope.inner.lock().cache.is_some());
    }

    #[test]
    fn round_trips_values() {
        let envelope = CacheEnvelope::new("lru", 0, None);
        envelope.put("key", ByteView::from("value"));
        let view = envelope.get("key").expect("hit");
        assert_eq!(view.as_bytes(), b"value");
        assert!(envelope.get("missing").is_none());
        assert_eq!(envelope.len(), 1);
    }

    #[test]
    fn dispatches_lfu_by_name() {
        let envelope = CacheEnvelope::new("lfu", 0, None);
        envelope.put("key", ByteView::from("value"));
        let state = envelope.inner.lock();
        assert!(matches!(state.cache, Some(Cache::Lfu(_))));
    }

    #[test]
    fn unknown_policy_falls_back_to_lru() {
        let envelope = CacheEnvelope::new("mru", 0, None);
        envelope.put("key", ByteView::from("value"));
        let state = envelope.inner.lock();
        assert!(matches!(state.cache, Some(Cache::Lru(_))));
    }

    #[test]
    fn clean_up_reaches_the_policy() {
        let envelope = CacheEnvelope::new("lru", 0, None);
        envelope.put("key", ByteView::from("value"));
        std::thread::sleep(Duration::from_millis(30));
        envelope.clean_up(Duration::from_millis(10));
        assert!(envelope.is_empty());
    }
}
