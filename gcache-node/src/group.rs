//! # Groups and Loaders
//!
//! A group is a named cache namespace. Each group owns a locked cache
//! envelope, a loader for the authoritative data source, and a counter
//! block. Groups live in a process-wide registry that is populated at
//! startup and read-only afterwards; the RPC handler resolves groups by
//! name through it.
//!
//! A Get first consults the local cache. On a miss the node asks the
//! ring who owns the key: a remote owner is fetched over RPC, anything
//! else goes to the loader and the loaded value is cached locally. A
//! remote miss is authoritative; a remote transport failure falls back
//! to the loader so one unreachable peer does not take the key down.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, LazyLock, OnceLock, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use gcache_common::{ByteView, GcacheError, GcacheResult};
use gcache_policy::EvictionHook;

use crate::cache::CacheEnvelope;
use crate::server::Server;
use crate::stats::{GroupStats, StatsSnapshot};

static GROUPS: LazyLock<RwLock<HashMap<String, Arc<Group>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Produces values for cache misses from the authoritative source.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Loads the record for `key`, or `NotFound` when the source has no
    /// such record.
    async fn load(&self, key: &str) -> GcacheResult<Vec<u8>>;
}

/// Adapter letting a plain function serve as a [`Loader`].
pub struct LoaderFunc<F>(pub F);

#[async_trait]
impl<F> Loader for LoaderFunc<F>
where
    F: Fn(&str) -> GcacheResult<Vec<u8>> + Send + Sync,
{
    async fn load(&self, key: &str) -> GcacheResult<Vec<u8>> {
        (self.0)(key)
    }
}

/// A named cache namespace.
pub struct Group {
    name: String,
    envelope: CacheEnvelope,
    loader: Box<dyn Loader>,
    peers: OnceLock<Arc<Server>>,
    stats: GroupStats,
    fetch_timeout: Duration,
}

impl Group {
    /// Creates a group and registers it under `name`. Registering the
    /// same name again replaces the previous group.
    pub fn new(name: &str, max_bytes: u64, policy: &str, loader: Box<dyn Loader>) -> Arc<Group> {
        let stats = GroupStats::new();
        let evictions = stats.eviction_counter();
        let hook: EvictionHook<ByteView> = Box::new(move |key, _value| {
            debug!(%key, "entry evicted");
            evictions.fetch_add(1, Ordering::Relaxed);
        });

        let group = Arc::new(Group {
            name: name.to_string(),
            envelope: CacheEnvelope::new(policy, max_bytes, Some(hook)),
            loader,
            peers: OnceLock::new(),
            stats,
            fetch_timeout: gcache_common::config::DEFAULT_FETCH_TIMEOUT,
        });

        let mut groups = GROUPS.write().expect("group registry poisoned");
        if groups.insert(name.to_string(), Arc::clone(&group)).is_some() {
            warn!(group = %name, "replaced an existing group registration");
        }
        info!(group = %name, %policy, max_bytes, "registered group");
        group
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Counter snapshot for this group.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Wires the node's server into this group so misses can be routed
    /// to the owning peer. Effective once; later calls are ignored.
    pub fn register_peers(&self, server: Arc<Server>) {
        if self.peers.set(server).is_err() {
            warn!(group = %self.name, "peer picker already registered");
        }
    }

    /// Fetches a value by key: local cache, then the owning peer, then
    /// the loader.
    pub async fn get(&self, key: &str) -> GcacheResult<ByteView> {
        if key.is_empty() {
            return Err(GcacheError::InvalidArgument("key is required".to_string()));
        }

        if let Some(view) = self.envelope.get(key) {
            debug!(group = %self.name, %key, "cache hit");
            self.stats.record_hit();
            return Ok(view);
        }
        self.stats.record_miss();
        self.load(key).await
    }

    /// Removes entries whose last access is older than `ttl`.
    pub fn clean_up(&self, ttl: Duration) {
        self.envelope.clean_up(ttl);
    }

    async fn load(&self, key: &str) -> GcacheResult<ByteView> {
        if let Some(server) = self.peers.get() {
            if let Some(client) = server.pick(key) {
                match client.fetch(&self.name, key, self.fetch_timeout).await {
                    Ok(bytes) => {
                        debug!(group = %self.name, %key, "fetched from peer");
                        self.stats.record_peer_fetch();
                        return Ok(ByteView::from(bytes));
                    }
                    // The owner is authoritative for its keys: a remote
                    // miss is final.
                    Err(GcacheError::NotFound) => return Err(GcacheError::NotFound),
                    Err(err) => {
                        warn!(group = %self.name, %key, error = %err,
                            "peer fetch failed, falling back to local load");
                    }
                }
            }
        }

        let bytes = self.loader.load(key).await?;
        self.stats.record_load();
        let view = ByteView::from(bytes);
        self.envelope.put(key, view.clone());
        Ok(view)
    }
}

/// Resolves a registered group by name.
pub fn get_group(name: &str) -> Option<Arc<Group>> {
    GROUPS.read().expect("group registry poisoned").get(name).cloned()
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_loader(table: &[(&str, &str)]) -> Box<dyn Loader> {
        let table: HashMap<String, String> = table
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Box::new(LoaderFunc(move |key: &str| {
            table
                .get(key)
                .map(|value| value.clone().into_bytes())
                .ok_or(GcacheError::NotFound)
        }))
    }

    #[tokio::test]
    async fn loads_and_caches_on_miss() {
        let group = Group::new(
            "group-test-load",
            0,
            "lru",
            table_loader(&[("tom", "630")]),
        );

        let view = group.get("tom").await.expect("load");
        assert_eq!(view.as_bytes(), b"630");
        let first = group.stats();
        assert_eq!(first.misses, 1);
        assert_eq!(first.loads, 1);

        let view = group.get("tom").await.expect("cached");
        assert_eq!(view.as_bytes(), b"630");
        let second = group.stats();
        assert_eq!(second.hits, 1);
        // The loader did not run again.
        assert_eq!(second.loads, 1);
    }

    #[tokio::test]
    async fn missing_record_surfaces_not_found() {
        let group = Group::new("group-test-missing", 0, "lru", table_loader(&[]));
        let err = group.get("nobody").await.expect_err("miss");
        assert!(matches!(err, GcacheError::NotFound));
        assert_eq!(err.to_string(), "record not found");
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let group = Group::new("group-test-empty", 0, "lru", table_loader(&[]));
        let err = group.get("").await.expect_err("empty key");
        assert!(matches!(err, GcacheError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn registry_resolves_by_name() {
        let group = Group::new("group-test-registry", 0, "lfu", table_loader(&[]));
        let found = get_group("group-test-registry").expect("registered");
        assert_eq!(found.name(), group.name());
        assert!(get_group("no-such-group").is_none());
    }

    #[tokio::test]
    async fn clean_up_expires_idle_entries() {
        let group = Group::new(
            "group-test-ttl",
            0,
            "lru",
            table_loader(&[("a", "x"), ("b", "y")]),
        );
        group.get("a").await.expect("load a");
        tokio::time::sleep(Duration::from_millis(100)).await;
        group.get("b").await.expect("load b");

        group.clean_up(Duration::from_millis(50));
        assert_eq!(group.stats().evictions, 1);

        // "a" must be reloaded, "b" is still cached.
        group.get("a").await.expect("reload a");
        group.get("b").await.expect("cached b");
        let stats = group.stats();
        assert_eq!(stats.loads, 3);
        assert_eq!(stats.hits, 1);
    }
}
