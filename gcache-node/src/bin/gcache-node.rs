//! Cache node entry point: load configuration, register a demo group
//! backed by an in-process table, join the cluster, and serve until
//! interrupted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gcache_common::net::outbound_ip;
use gcache_common::{GcacheError, GcacheResult, NodeConfig};
use gcache_node::{Group, Loader, Server};

#[derive(Parser, Debug)]
#[command(name = "gcache-node", about = "A peer of the distributed cache cluster")]
struct Args {
    /// Listen address, x.x.x.x:port. Overrides GCACHE_ADDR.
    #[arg(long)]
    addr: Option<String>,

    /// Full peer list (including this node), comma separated.
    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,

    /// Group to serve.
    #[arg(long, default_value = "scores")]
    group: String,

    /// Replacement policy, lru or lfu. Overrides GCACHE_POLICY.
    #[arg(long)]
    policy: Option<String>,

    /// Byte budget for the group cache, 0 for unbounded.
    #[arg(long)]
    max_bytes: Option<u64>,

    /// Interval in seconds between TTL sweeps; 0 disables them.
    #[arg(long, default_value_t = 60)]
    sweep_secs: u64,

    /// Entry age in seconds a sweep treats as expired.
    #[arg(long, default_value_t = 300)]
    sweep_ttl_secs: u64,
}

/// Demo loader over a fixed score table, standing in for the slow
/// authoritative source.
struct TableLoader {
    table: HashMap<String, String>,
}

impl TableLoader {
    fn sample() -> Self {
        let table = [("tom", "630"), ("jack", "589"), ("sam", "567")]
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        TableLoader { table }
    }
}

#[async_trait]
impl Loader for TableLoader {
    async fn load(&self, key: &str) -> GcacheResult<Vec<u8>> {
        info!(%key, "loading from the backing table");
        self.table
            .get(key)
            .map(|value| value.clone().into_bytes())
            .ok_or(GcacheError::NotFound)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = NodeConfig::from_env();
    if let Some(addr) = args.addr {
        config.addr = addr;
    }
    if let Some(policy) = args.policy {
        config.policy = policy;
    }
    if let Some(max_bytes) = args.max_bytes {
        config.max_bytes = max_bytes;
    }

    if let Ok(ip) = outbound_ip() {
        info!(%ip, "local outbound address");
    }

    let server = Arc::new(
        Server::with_config(&config.addr, config.clone()).context("create server")?,
    );

    let mut peers = args.peers;
    if peers.is_empty() {
        peers.push(config.addr.clone());
    } else if !peers.contains(&config.addr) {
        warn!("peer list does not include this node, adding {}", config.addr);
        peers.push(config.addr.clone());
    }
    server.set_peers(&peers).context("configure peers")?;

    let group = Group::new(
        &args.group,
        config.max_bytes,
        &config.policy,
        Box::new(TableLoader::sample()),
    );
    group.register_peers(Arc::clone(&server));

    if args.sweep_secs > 0 {
        let group = Arc::clone(&group);
        let ttl = Duration::from_secs(args.sweep_ttl_secs);
        let mut tick = tokio::time::interval(Duration::from_secs(args.sweep_secs));
        tokio::spawn(async move {
            loop {
                tick.tick().await;
                group.clean_up(ttl);
            }
        });
    }

    let shutdown = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            shutdown.stop();
        }
    });

    server.start().await.context("serve")?;
    Ok(())
}
