//! Common cache record shared by the replacement policies.

use std::time::{Duration, SystemTime};

/// A single cached record: the key, its value, and the last-access
/// timestamp used for TTL checks and LFU tie-breaking.
#[derive(Debug)]
pub struct Entry<V> {
    /// Cache key.
    pub key: String,
    /// Cached value.
    pub value: V,
    /// Wall clock of the last touch; `None` until the first touch.
    pub update_at: Option<SystemTime>,
}

impl<V> Entry<V> {
    /// Creates an untouched entry.
    pub fn new(key: String, value: V) -> Self {
        Entry {
            key,
            value,
            update_at: None,
        }
    }

    /// Stamps the entry with the current wall clock. Every successful
    /// Get and every Put touches the entry.
    pub fn touch(&mut self) {
        self.update_at = Some(SystemTime::now());
    }

    /// True when the last touch is older than `ttl`. An entry that was
    /// never touched does not expire.
    pub fn expired(&self, ttl: Duration) -> bool {
        match self.update_at {
            Some(at) => at + ttl < SystemTime::now(),
            None => false,
        }
    }
}
