//! # Group Statistics
//!
//! Lightweight per-group counters in the accumulator pattern: atomic
//! increments on the request path, a plain snapshot struct for readers.
//! Relaxed ordering is enough; the counters only need eventual
//! consistency, not cross-field ordering.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Point-in-time view of a group's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Local cache hits.
    pub hits: u64,
    /// Local cache misses.
    pub misses: u64,
    /// Values produced by the local loader.
    pub loads: u64,
    /// Values fetched from remote peers.
    pub peer_fetches: u64,
    /// Entries dropped by eviction or TTL sweep.
    pub evictions: u64,
}

/// Per-group counter block.
#[derive(Debug, Default)]
pub struct GroupStats {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    peer_fetches: AtomicU64,
    evictions: Arc<AtomicU64>,
}

impl GroupStats {
    /// Creates a zeroed counter block.
    pub fn new() -> Self {
        GroupStats::default()
    }

    /// Records a local cache hit.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a local cache miss.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a loader invocation that produced a value.
    pub fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful remote fetch.
    pub fn record_peer_fetch(&self) {
        self.peer_fetches.fetch_add(1, Ordering::Relaxed);
    }

    /// Shared eviction counter, handed to the cache's eviction hook.
    pub fn eviction_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.evictions)
    }

    /// Takes a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            peer_fetches: self.peer_fetches.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
