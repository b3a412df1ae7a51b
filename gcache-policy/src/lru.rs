//! # LRU Replacement Policy
//!
//! Recency-ordered eviction: a doubly linked list (front = most
//! recently used) plus a key index. The list is an index-based arena,
//! so links are plain `usize` slots and freed slots are recycled.
//!
//! Byte accounting charges `key.len() + value.len()` per entry; once a
//! Put settles, entries are dropped from the back until usage fits the
//! budget again. A budget of zero means unbounded.

use std::time::{Duration, SystemTime};

use hashbrown::HashMap;
use tracing::debug;

use gcache_common::Measured;

use crate::entry::Entry;
use crate::EvictionHook;

struct Node<V> {
    entry: Entry<V>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Recency-ordered cache bounded by an approximate byte budget.
pub struct LruPolicy<V> {
    max_bytes: u64,
    n_bytes: u64,
    nodes: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    /// Most recently used entry.
    head: Option<usize>,
    /// Least recently used entry.
    tail: Option<usize>,
    lookup: HashMap<String, usize>,
    on_evicted: Option<EvictionHook<V>>,
}

impl<V: Measured + Clone> LruPolicy<V> {
    /// Creates a policy with the given byte budget (0 = unbounded) and
    /// an optional eviction callback.
    pub fn new(max_bytes: u64, on_evicted: Option<EvictionHook<V>>) -> Self {
        LruPolicy {
            max_bytes,
            n_bytes: 0,
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            lookup: HashMap::new(),
            on_evicted,
        }
    }

    /// Looks up a key. A hit moves the entry to the front and touches
    /// it; the returned timestamp is the fresh last-access time. Never
    /// evicts.
    pub fn get(&mut self, key: &str) -> Option<(V, SystemTime)> {
        let idx = *self.lookup.get(key)?;
        self.move_to_front(idx);
        let node = self.nodes[idx].as_mut()?;
        node.entry.touch();
        Some((node.entry.value.clone(), node.entry.update_at?))
    }

    /// Inserts or replaces a value, then evicts from the back until the
    /// byte budget holds.
    pub fn put(&mut self, key: &str, value: V) {
        if let Some(&idx) = self.lookup.get(key) {
            self.move_to_front(idx);
            if let Some(node) = self.nodes[idx].as_mut() {
                let old_len = node.entry.value.len() as u64;
                let new_len = value.len() as u64;
                self.n_bytes = self.n_bytes - old_len + new_len;
                node.entry.value = value;
                node.entry.touch();
            }
        } else {
            let mut entry = Entry::new(key.to_string(), value);
            entry.touch();
            let size = (entry.key.len() + entry.value.len()) as u64;
            let idx = self.alloc(Node {
                entry,
                prev: None,
                next: None,
            });
            self.push_front(idx);
            self.lookup.insert(key.to_string(), idx);
            self.n_bytes += size;
        }

        if self.max_bytes != 0 {
            self.remove_oldest();
        }
    }

    /// Removes every expired entry.
    ///
    /// Walks from the back toward the front and stops at the first live
    /// entry: list order equals descending last-access order (every
    /// touch both moves-to-front and stamps), so the expired entries
    /// form a suffix.
    pub fn clean_up(&mut self, ttl: Duration) {
        while let Some(idx) = self.tail {
            let expired = self.nodes[idx]
                .as_ref()
                .map(|node| node.entry.expired(ttl))
                .unwrap_or(false);
            if !expired {
                break;
            }
            self.evict_slot(idx);
        }
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    /// True when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Accounted byte usage.
    pub fn bytes_used(&self) -> u64 {
        self.n_bytes
    }

    fn remove_oldest(&mut self) {
        while self.max_bytes < self.n_bytes {
            let idx = match self.tail {
                Some(idx) => idx,
                None => break,
            };
            self.evict_slot(idx);
        }
    }

    fn evict_slot(&mut self, idx: usize) {
        self.detach(idx);
        if let Some(node) = self.nodes[idx].take() {
            self.free.push(idx);
            self.lookup.remove(&node.entry.key);
            self.n_bytes -= (node.entry.key.len() + node.entry.value.len()) as u64;
            debug!(key = %node.entry.key, "lru evict");
            if let Some(hook) = self.on_evicted.as_mut() {
                hook(node.entry.key, node.entry.value);
            }
        }
    }

    fn alloc(&mut self, node: Node<V>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    /// Unlinks `idx` from the list, fixing head/tail as needed.
    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.nodes[idx].as_ref() {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = self.nodes[prev_idx].as_mut() {
                    prev_node.next = next;
                }
            }
            None => self.head = next,
        }

        match next {
            Some(next_idx) => {
                if let Some(next_node) = self.nodes[next_idx].as_mut() {
                    next_node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let head = self.head;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = head;
        }
        match head {
            Some(head_idx) => {
                if let Some(head_node) = self.nodes[head_idx].as_mut() {
                    head_node.prev = Some(idx);
                }
            }
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.detach(idx);
        self.push_front(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn front_value(lru: &LruPolicy<String>) -> Option<&str> {
        let idx = lru.head?;
        lru.nodes[idx].as_ref().map(|node| node.entry.value.as_str())
    }

    fn accounted_bytes(lru: &LruPolicy<String>) -> u64 {
        lru.nodes
            .iter()
            .flatten()
            .map(|node| (node.entry.key.len() + node.entry.value.len()) as u64)
            .sum()
    }

    #[test]
    fn get_hit_and_miss() {
        let mut lru = LruPolicy::new(15, None);
        lru.put("key1", "1234".to_string());
        let (value, _) = lru.get("key1").expect("hit");
        assert_eq!(value, "1234");
        assert!(lru.get("key2").is_none());
    }

    #[test]
    fn evicts_in_recency_order() {
        let mut lru = LruPolicy::new(20, None);
        lru.put("11111", "12345".to_string());
        lru.put("22222", "23456".to_string());
        assert_eq!(lru.len(), 2);
        assert_eq!(front_value(&lru), Some("23456"));

        lru.put("33333", "34567".to_string());
        assert_eq!(lru.len(), 2);
        assert_eq!(front_value(&lru), Some("34567"));
        assert!(lru.get("11111").is_none());
    }

    #[test]
    fn eviction_callback_sees_oldest_first() {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&evicted);
        let hook: EvictionHook<String> = Box::new(move |key, _value| {
            sink.lock().unwrap().push(key);
        });

        let mut lru = LruPolicy::new(10, Some(hook));
        lru.put("key1", "123456".to_string());
        lru.put("k2", "k2".to_string());
        lru.put("k3", "k3".to_string());
        lru.put("k4", "k4".to_string());

        assert_eq!(*evicted.lock().unwrap(), vec!["key1".to_string(), "k2".to_string()]);
    }

    #[test]
    fn get_refreshes_recency() {
        let mut lru = LruPolicy::new(12, None);
        lru.put("a", "11111".to_string());
        lru.put("b", "22222".to_string());
        lru.get("a").expect("hit");
        // Over budget by one entry; "b" is now the oldest.
        lru.put("c", "33333".to_string());
        assert!(lru.get("b").is_none());
        assert!(lru.get("a").is_some());
        assert!(lru.get("c").is_some());
    }

    #[test]
    fn replace_is_idempotent_for_accounting() {
        let mut lru = LruPolicy::new(0, None);
        lru.put("key", "value".to_string());
        let after_first = lru.bytes_used();
        lru.put("key", "value".to_string());
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.bytes_used(), after_first);
        assert_eq!(lru.bytes_used(), accounted_bytes(&lru));
    }

    #[test]
    fn replace_applies_signed_delta() {
        let mut lru = LruPolicy::new(0, None);
        lru.put("key", "abcdef".to_string());
        lru.put("key", "ab".to_string());
        assert_eq!(lru.bytes_used(), ("key".len() + "ab".len()) as u64);
        assert_eq!(lru.bytes_used(), accounted_bytes(&lru));

        let (value, _) = lru.get("key").expect("hit");
        assert_eq!(value, "ab");
    }

    #[test]
    fn touch_is_monotonic() {
        let mut lru = LruPolicy::new(0, None);
        lru.put("key", "v".to_string());
        let (_, first) = lru.get("key").expect("hit");
        std::thread::sleep(Duration::from_millis(5));
        let (_, second) = lru.get("key").expect("hit");
        assert!(second > first);
    }

    #[test]
    fn clean_up_drops_expired_suffix() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&evicted);
        let hook: EvictionHook<String> = Box::new(move |key, _value| {
            counter.fetch_add(1, Ordering::SeqCst);
            sink.lock().unwrap().push(key);
        });

        let mut lru = LruPolicy::new(0, Some(hook));
        lru.put("a", "x".to_string());
        std::thread::sleep(Duration::from_millis(100));
        lru.put("b", "y".to_string());
        lru.clean_up(Duration::from_millis(50));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*evicted.lock().unwrap(), vec!["a".to_string()]);
        assert_eq!(lru.len(), 1);
        assert!(lru.get("b").is_some());
        assert!(lru.get("a").is_none());
    }

    #[test]
    fn slots_are_recycled_after_eviction() {
        let mut lru = LruPolicy::new(8, None);
        for round in 0..32 {
            lru.put(&format!("k{round}"), "1234".to_string());
        }
        assert_eq!(lru.len(), 1);
        assert!(lru.nodes.len() <= 2);
        assert_eq!(lru.bytes_used(), accounted_bytes(&lru));
    }
}
