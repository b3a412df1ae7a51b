//! # Peer Fetch Path
//!
//! Purpose: Issue one `Get(group, key)` against the peer that owns a
//! key, resolving the peer's endpoint through the discovery backend.
//!
//! ## Design Principles
//! 1. **Resolve Once**: The endpoint is looked up on first use and
//!    cached; only the logical service name is configured.
//! 2. **Connection Reuse**: One cached TCP connection per peer; a
//!    failed exchange drops the connection instead of reusing it.
//! 3. **Deadline Owned by the Caller**: Every fetch runs under the
//!    caller-supplied timeout and surfaces expiry as a structured
//!    error.

use bytes::BytesMut;
use std::time::Duration;

use etcd_client::{Client as EtcdClient, ConnectOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use gcache_common::config::{Endpoint, DIAL_TIMEOUT};
use gcache_common::wire;
use gcache_common::{GcacheError, GcacheResult};

struct ConnState {
    /// Resolved `host:port`, cached after the first lookup.
    target: Option<String>,
    /// Live connection to the peer, if any.
    stream: Option<TcpStream>,
}

/// Client for a single remote peer, addressed by its logical service
/// name (`"groupcache/{host:port}"`).
pub struct PeerClient {
    service: String,
    endpoints: Vec<String>,
    conn: Mutex<ConnState>,
}

impl PeerClient {
    /// Creates a client that resolves `service` through the discovery
    /// backend at `endpoints`.
    pub fn new(service: impl Into<String>, endpoints: Vec<String>) -> Self {
        PeerClient {
            service: service.into(),
            endpoints,
            conn: Mutex::new(ConnState {
                target: None,
                stream: None,
            }),
        }
    }

    /// Creates a client pinned to a known peer address, skipping
    /// discovery. Used for static clusters and tests.
    pub fn direct(service: impl Into<String>, addr: impl Into<String>) -> Self {
        PeerClient {
            service: service.into(),
            endpoints: Vec::new(),
            conn: Mutex::new(ConnState {
                target: Some(addr.into()),
                stream: None,
            }),
        }
    }

    /// The logical service name this client resolves.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Fetches `key` from `group` on the remote peer.
    ///
    /// Expiry of `timeout` surfaces as `DeadlineExceeded` and drops the
    /// cached connection, since the peer may still write a late reply
    /// into it.
    pub async fn fetch(&self, group: &str, key: &str, timeout: Duration) -> GcacheResult<Vec<u8>> {
        match tokio::time::timeout(timeout, self.exchange(group, key)).await {
            Ok(result) => result,
            Err(_) => {
                self.conn.lock().await.stream = None;
                Err(GcacheError::DeadlineExceeded)
            }
        }
    }

    async fn exchange(&self, group: &str, key: &str) -> GcacheResult<Vec<u8>> {
        let mut state = self.conn.lock().await;

        if state.stream.is_none() {
            let target = match state.target.clone() {
                Some(target) => target,
                None => {
                    let target = self.resolve().await?;
                    debug!(service = %self.service, %target, "resolved peer endpoint");
                    state.target = Some(target.clone());
                    target
                }
            };
            let stream = TcpStream::connect(&target)
                .await
                .map_err(|err| GcacheError::Transport(format!("connect {target}: {err}")))?;
            stream.set_nodelay(true)?;
            state.stream = Some(stream);
        }

        let result = match state.stream.as_mut() {
            Some(stream) => Self::exchange_on(stream, group, key).await,
            None => Err(GcacheError::Transport("no connection".to_string())),
        };

        // Keep the connection only after a clean exchange; a NotFound
        // reply is a clean exchange, a broken stream is not.
        if matches!(
            &result,
            Err(GcacheError::Io(_)) | Err(GcacheError::Transport(_)) | Err(GcacheError::Protocol)
        ) {
            warn!(service = %self.service, "dropping peer connection after failure");
            state.stream = None;
        }
        result
    }

    async fn exchange_on(stream: &mut TcpStream, group: &str, key: &str) -> GcacheResult<Vec<u8>> {
        let mut request = Vec::with_capacity(32 + group.len() + key.len());
        wire::encode_get(group, key, &mut request);
        stream.write_all(&request).await?;

        let mut buffer = BytesMut::with_capacity(4 * 1024);
        loop {
            if let Some(reply) = wire::decode_reply(&mut buffer)? {
                return reply.into_result();
            }
            let read = stream.read_buf(&mut buffer).await?;
            if read == 0 {
                return Err(GcacheError::Transport("peer closed the connection".to_string()));
            }
        }
    }

    /// Resolves the service name to a `host:port` through the discovery
    /// backend.
    async fn resolve(&self) -> GcacheResult<String> {
        let options = ConnectOptions::new().with_connect_timeout(DIAL_TIMEOUT);
        let mut client = EtcdClient::connect(self.endpoints.clone(), Some(options))
            .await
            .map_err(|err| GcacheError::Registry(format!("connect discovery backend: {err}")))?;

        let response = client
            .get(self.service.as_str(), None)
            .await
            .map_err(|err| GcacheError::Registry(format!("lookup {}: {err}", self.service)))?;

        let kv = response
            .kvs()
            .first()
            .ok_or_else(|| GcacheError::Registry(format!("no endpoint registered for {}", self.service)))?;

        let endpoint: Endpoint = serde_json::from_slice(kv.value())
            .map_err(|err| GcacheError::Registry(format!("malformed endpoint record: {err}")))?;
        Ok(endpoint.addr)
    }
}

impl std::fmt::Debug for PeerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerClient")
            .field("service", &self.service)
            .finish()
    }
}
