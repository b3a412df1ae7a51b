//! # Node Configuration
//!
//! Cluster-wide defaults and the per-node configuration block. Values
//! come from the environment (a `.env` file is loaded by the binary at
//! process start) with the defaults below; CLI flags override both.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Listen address used when none is configured.
pub const DEFAULT_ADDR: &str = "127.0.0.1:6324";

/// Discovery backend endpoint used when none is configured.
pub const DEFAULT_ETCD_ENDPOINT: &str = "localhost:2379";

/// Virtual nodes placed on the ring per peer.
pub const DEFAULT_REPLICAS: usize = 50;

/// Logical service name under which every node registers.
pub const SERVICE_NAME: &str = "groupcache";

/// Dial timeout for the discovery backend.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Registration lease TTL in seconds.
pub const LEASE_TTL_SECS: i64 = 5;

/// Deadline applied to a single peer Get.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Endpoint record stored in the discovery backend under
/// `"{service}/{addr}"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Routable `host:port` of the node.
    pub addr: String,
}

/// Per-node runtime configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Listen and ring identity address, `host:port`.
    pub addr: String,
    /// Discovery backend endpoints.
    pub etcd_endpoints: Vec<String>,
    /// Virtual nodes per peer on the hash ring.
    pub replicas: usize,
    /// Replacement policy name, `lru` or `lfu`.
    pub policy: String,
    /// Byte budget per group cache; 0 means unbounded.
    pub max_bytes: u64,
    /// Deadline for a single remote Get.
    pub fetch_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            addr: DEFAULT_ADDR.to_string(),
            etcd_endpoints: vec![DEFAULT_ETCD_ENDPOINT.to_string()],
            replicas: DEFAULT_REPLICAS,
            policy: "lru".to_string(),
            max_bytes: 2 << 20,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl NodeConfig {
    /// Builds a configuration from `GCACHE_*` environment variables,
    /// falling back to the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = NodeConfig::default();
        NodeConfig {
            addr: env_string("GCACHE_ADDR", &defaults.addr),
            etcd_endpoints: env_list("GCACHE_ETCD_ENDPOINTS", &defaults.etcd_endpoints),
            replicas: env_parse("GCACHE_REPLICAS", defaults.replicas),
            policy: env_string("GCACHE_POLICY", &defaults.policy),
            max_bytes: env_parse("GCACHE_MAX_BYTES", defaults.max_bytes),
            fetch_timeout: Duration::from_millis(env_parse(
                "GCACHE_FETCH_TIMEOUT_MS",
                defaults.fetch_timeout.as_millis() as u64,
            )),
        }
    }
}

fn env_string(name: &str, default: &str) -> String {
    match env::var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn env_list(name: &str, default: &[String]) -> Vec<String> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => value
            .split(',')
            .map(|endpoint| endpoint.trim().to_string())
            .filter(|endpoint| !endpoint.is_empty())
            .collect(),
        _ => default.to_vec(),
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(value) => value.parse().unwrap_or(default),
        Err(_) => default,
    }
}
