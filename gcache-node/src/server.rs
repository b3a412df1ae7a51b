//! # Node Server
//!
//! Purpose: Accept peer connections, parse `Get(group, key)` frames,
//! and answer them from the named group. The server also owns the
//! consistent-hash ring and the per-peer clients, so it is the one
//! place that decides whether a key is served locally or fetched from
//! the peer that owns it.
//!
//! ## Lifecycle
//!
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`. `start`
//! binds the listener, spawns the discovery registration loop, and
//! serves until that loop finishes; `stop` signals the loop, which
//! revokes the lease and unblocks the accept loop. One mutex guards
//! the running flag, the stop channel, the ring, and the client map;
//! it is never held across an await.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use gcache_client::PeerClient;
use gcache_common::config::{NodeConfig, DEFAULT_ADDR, SERVICE_NAME};
use gcache_common::net::valid_peer_addr;
use gcache_common::wire::{encode_error, encode_value, ErrorCode, FrameParser};
use gcache_common::{GcacheError, GcacheResult};

use crate::group::get_group;
use crate::registry;
use crate::ring::HashRing;

struct ServerState {
    running: bool,
    stop_tx: Option<mpsc::Sender<Option<GcacheError>>>,
    ring: Option<HashRing>,
    clients: HashMap<String, Arc<PeerClient>>,
}

/// One cache node: listener, ring, peer clients, and registration.
pub struct Server {
    addr: String,
    config: NodeConfig,
    inner: Mutex<ServerState>,
}

impl Server {
    /// Creates a server for `addr` (`x.x.x.x:port`); an empty address
    /// selects the default. The socket is not bound until `start`.
    pub fn new(addr: &str) -> GcacheResult<Self> {
        Self::with_config(addr, NodeConfig::default())
    }

    /// Creates a server with explicit configuration.
    pub fn with_config(addr: &str, config: NodeConfig) -> GcacheResult<Self> {
        let addr = if addr.is_empty() { DEFAULT_ADDR } else { addr };
        if !valid_peer_addr(addr) {
            return Err(GcacheError::InvalidAddress(addr.to_string()));
        }
        Ok(Server {
            addr: addr.to_string(),
            config,
            inner: Mutex::new(ServerState {
                running: false,
                stop_tx: None,
                ring: None,
                clients: HashMap::new(),
            }),
        })
    }

    /// This node's `host:port`, which is also its ring identity.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Rebuilds the ring and the peer-client map from `peers`. The
    /// list replaces any previous one and should include this node.
    pub fn set_peers<I, S>(&self, peers: I) -> GcacheResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let peers: Vec<String> = peers.into_iter().map(|peer| peer.as_ref().to_string()).collect();
        for peer in &peers {
            if !valid_peer_addr(peer) {
                return Err(GcacheError::InvalidAddress(peer.clone()));
            }
        }

        let mut ring = HashRing::new(self.config.replicas);
        ring.add_nodes(&peers);

        let mut clients = HashMap::with_capacity(peers.len());
        for peer in &peers {
            let service = format!("{SERVICE_NAME}/{peer}");
            clients.insert(
                peer.clone(),
                Arc::new(PeerClient::new(service, self.config.etcd_endpoints.clone())),
            );
        }

        let mut state = self.inner.lock();
        state.ring = Some(ring);
        state.clients = clients;
        info!("[{}] peer set updated, {} peers", self.addr, peers.len());
        Ok(())
    }

    /// Chooses the peer that owns `key`. Returns `None` when this node
    /// owns the key (or no peers are configured) and the caller should
    /// serve it locally.
    pub fn pick(&self, key: &str) -> Option<Arc<PeerClient>> {
        let state = self.inner.lock();
        let owner = state.ring.as_ref()?.locate(key)?;
        if owner == self.addr {
            debug!("[{}] picked myself for key {key}", self.addr);
            return None;
        }
        debug!("[{}] picked remote peer {owner} for key {key}", self.addr);
        state.clients.get(owner).cloned()
    }

    /// Serves peer requests until the node is stopped.
    ///
    /// Binds the listener, spawns the registration loop, and accepts
    /// connections; returns after `stop` once the registration loop has
    /// revoked the lease.
    pub async fn start(&self) -> GcacheResult<()> {
        let stop_rx = {
            let mut state = self.inner.lock();
            if state.running {
                return Err(GcacheError::AlreadyRunning(self.addr.clone()));
            }
            state.running = true;
            let (stop_tx, stop_rx) = mpsc::channel(1);
            state.stop_tx = Some(stop_tx);
            stop_rx
        };

        let port = self.addr.rsplit(':').next().unwrap_or_default();
        let listener = TcpListener::bind(format!("0.0.0.0:{port}"))
            .await
            .map_err(|err| GcacheError::Transport(format!("failed to listen on {}: {err}", self.addr)))?;
        info!("[{}] listening for peers", self.addr);

        let (done_tx, mut done_rx) = oneshot::channel();
        let addr = self.addr.clone();
        let endpoints = self.config.etcd_endpoints.clone();
        tokio::spawn(async move {
            if let Err(err) = registry::register(SERVICE_NAME, &addr, endpoints, stop_rx).await {
                error!(error = %err, "[{addr}] registration loop ended");
            }
            info!("[{addr}] revoked service and closing the listener");
            let _ = done_tx.send(());
        });

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("[{}] connection from {peer}", self.addr);
                        let addr = self.addr.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, &addr).await {
                                debug!(error = %err, "[{addr}] connection closed");
                            }
                        });
                    }
                    Err(err) => warn!(error = %err, "[{}] accept failed", self.addr),
                },
                _ = &mut done_rx => break,
            }
        }

        info!("[{}] server stopped", self.addr);
        Ok(())
    }

    /// Stops the node. A no-op when the node is not running; otherwise
    /// signals the registration loop (which revokes the lease and
    /// unblocks `start`) and drops the ring and client map.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        if !state.running {
            return;
        }
        if let Some(stop_tx) = state.stop_tx.take() {
            let _ = stop_tx.try_send(None);
        }
        state.running = false;
        state.ring = None;
        state.clients.clear();
    }
}

/// Reads request frames off one peer connection and answers each in
/// order.
async fn handle_connection(mut stream: TcpStream, node_addr: &str) -> std::io::Result<()> {
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut parser = FrameParser::new();

    loop {
        let read = stream.read_buf(&mut buffer).await?;
        if read == 0 {
            break;
        }

        loop {
            match parser.parse(&mut buffer) {
                Ok(Some(args)) => {
                    let response = dispatch(&args, node_addr).await;
                    stream.write_all(&response).await?;
                }
                Ok(None) => break,
                Err(_) => {
                    let mut response = Vec::new();
                    encode_error(ErrorCode::BadRequest, "protocol error", &mut response);
                    stream.write_all(&response).await?;
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

/// Handles one `Get` request and encodes the reply.
async fn dispatch(args: &[Vec<u8>], node_addr: &str) -> Vec<u8> {
    if args.len() != 3 || !args[0].eq_ignore_ascii_case(b"GET") {
        return error_frame(ErrorCode::BadRequest, "expected GET <group> <key>");
    }

    let group = match std::str::from_utf8(&args[1]) {
        Ok(group) => group,
        Err(_) => return error_frame(ErrorCode::BadRequest, "group must be utf-8"),
    };
    let key = match std::str::from_utf8(&args[2]) {
        Ok(key) => key,
        Err(_) => return error_frame(ErrorCode::BadRequest, "key must be utf-8"),
    };

    info!("[groupcache server {node_addr}] recv rpc request ({group})/({key})");
    if group.is_empty() || key.is_empty() {
        return error_frame(ErrorCode::BadRequest, "group and key are required");
    }

    let target = match get_group(group) {
        Some(target) => target,
        None => {
            return error_frame(
                ErrorCode::NotFound,
                &GcacheError::GroupNotFound(group.to_string()).to_string(),
            )
        }
    };

    match target.get(key).await {
        Ok(view) => {
            let mut response = Vec::with_capacity(view.len() + 16);
            encode_value(view.as_bytes(), &mut response);
            response
        }
        Err(err) => {
            let code = match err {
                GcacheError::NotFound | GcacheError::GroupNotFound(_) => ErrorCode::NotFound,
                GcacheError::InvalidArgument(_) => ErrorCode::BadRequest,
                _ => ErrorCode::Internal,
            };
            error_frame(code, &err.to_string())
        }
    }
}

fn error_frame(code: ErrorCode, message: &str) -> Vec<u8> {
    let mut response = Vec::with_capacity(message.len() + 16);
    encode_error(code, message, &mut response);
    response
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("addr", &self.addr).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Group;

    #[test]
    fn empty_addr_selects_the_default() {
        let server = Server::new("").expect("default addr");
        assert_eq!(server.addr(), DEFAULT_ADDR);
    }

    #[test]
    fn malformed_addr_is_rejected() {
        assert!(matches!(
            Server::new("localhost:6324"),
            Err(GcacheError::InvalidAddress(_))
        ));
        assert!(matches!(
            Server::new("127.0.0.1"),
            Err(GcacheError::InvalidAddress(_))
        ));
    }

    #[test]
    fn set_peers_rejects_malformed_addresses() {
        let server = Server::new("127.0.0.1:6324").expect("server");
        let err = server
            .set_peers(["127.0.0.1:6324", "not-an-addr"])
            .expect_err("malformed");
        assert!(matches!(err, GcacheError::InvalidAddress(_)));
    }

    #[test]
    fn pick_is_none_without_peers() {
        let server = Server::new("127.0.0.1:6324").expect("server");
        assert!(server.pick("anything").is_none());
    }

    #[test]
    fn pick_matches_ring_ownership() {
        let local = "127.0.0.1:6324";
        let remote = "127.0.0.1:6325";
        let server = Server::new(local).expect("server");
        server.set_peers([local, remote]).expect("peers");

        let mut ring = HashRing::new(NodeConfig::default().replicas);
        ring.add_nodes([local, remote]);

        let mut saw_local = false;
        let mut saw_remote = false;
        for i in 0..64 {
            let key = format!("key-{i}");
            let owner = ring.locate(&key).expect("owner");
            match server.pick(&key) {
                None => {
                    assert_eq!(owner, local, "key {key} should be local");
                    saw_local = true;
                }
                Some(client) => {
                    assert_eq!(owner, remote, "key {key} should be remote");
                    assert_eq!(client.service(), format!("{SERVICE_NAME}/{remote}"));
                    saw_remote = true;
                }
            }
        }
        assert!(saw_local && saw_remote, "keyspace should split across peers");
    }

    #[test]
    fn stop_is_a_noop_when_not_running() {
        let server = Server::new("127.0.0.1:6324").expect("server");
        server.stop();
        assert!(!server.inner.lock().running);
    }

    fn table_loader() -> Box<dyn crate::group::Loader> {
        Box::new(crate::group::LoaderFunc(|key: &str| match key {
            "tom" => Ok(b"630".to_vec()),
            _ => Err(GcacheError::NotFound),
        }))
    }

    fn frame(parts: &[&[u8]]) -> Vec<Vec<u8>> {
        parts.iter().map(|part| part.to_vec()).collect()
    }

    #[tokio::test]
    async fn dispatch_returns_the_value() {
        Group::new("dispatch-scores", 0, "lru", table_loader());
        let response = dispatch(&frame(&[b"GET", b"dispatch-scores", b"tom"]), "test").await;
        assert_eq!(response, b"$3\r\n630\r\n".to_vec());
    }

    #[tokio::test]
    async fn dispatch_preserves_the_not_found_literal() {
        Group::new("dispatch-missing", 0, "lru", table_loader());
        let response = dispatch(&frame(&[b"GET", b"dispatch-missing", b"nobody"]), "test").await;
        assert_eq!(response, b"-NOTFOUND record not found\r\n".to_vec());
    }

    #[tokio::test]
    async fn dispatch_rejects_empty_group_or_key() {
        let response = dispatch(&frame(&[b"GET", b"", b"key"]), "test").await;
        assert_eq!(response, b"-BADREQ group and key are required\r\n".to_vec());

        let response = dispatch(&frame(&[b"GET", b"g", b""]), "test").await;
        assert_eq!(response, b"-BADREQ group and key are required\r\n".to_vec());
    }

    #[tokio::test]
    async fn dispatch_names_an_unknown_group() {
        let response = dispatch(&frame(&[b"GET", b"no-such-group", b"key"]), "test").await;
        assert_eq!(response, b"-NOTFOUND group no-such-group not found\r\n".to_vec());
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_commands() {
        let response = dispatch(&frame(&[b"PUT", b"g", b"k"]), "test").await;
        assert_eq!(response, b"-BADREQ expected GET <group> <key>\r\n".to_vec());
    }
}
