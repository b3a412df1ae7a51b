//! # Discovery Registration Loop
//!
//! Purpose: Keep the node visible in the discovery backend for as long
//! as it is healthy. The node registers `"{service}/{addr}"` under a
//! short lease and renews it on a keep-alive stream; when the node
//! stops (or the stream dies) the lease is revoked and the endpoint
//! disappears, so peers never resolve a dead node for long.
//!
//! The loop does not return while the node is healthy. Failures before
//! the loop starts are fatal and returned to the caller.

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use etcd_client::{Client as EtcdClient, ConnectOptions, PutOptions};

use gcache_common::config::{Endpoint, DIAL_TIMEOUT, LEASE_TTL_SECS};
use gcache_common::{GcacheError, GcacheResult};

/// Registers `addr` under `service` and renews the lease until `stop`
/// receives a value or the keep-alive stream closes.
///
/// The stop payload carries an optional error: `None` is a clean
/// shutdown and returns `Ok`, `Some` is propagated after the lease is
/// revoked.
pub async fn register(
    service: &str,
    addr: &str,
    endpoints: Vec<String>,
    mut stop: mpsc::Receiver<Option<GcacheError>>,
) -> GcacheResult<()> {
    let options = ConnectOptions::new().with_connect_timeout(DIAL_TIMEOUT);
    let mut client = EtcdClient::connect(endpoints, Some(options))
        .await
        .map_err(|err| GcacheError::Registry(format!("connect discovery backend: {err}")))?;

    let lease = client
        .lease_grant(LEASE_TTL_SECS, None)
        .await
        .map_err(|err| GcacheError::Registry(format!("grant lease: {err}")))?;
    let lease_id = lease.id();

    let record = serde_json::to_vec(&Endpoint {
        addr: addr.to_string(),
    })
    .map_err(|err| GcacheError::Registry(format!("encode endpoint: {err}")))?;
    client
        .put(
            format!("{service}/{addr}"),
            record,
            Some(PutOptions::new().with_lease(lease_id)),
        )
        .await
        .map_err(|err| GcacheError::Registry(format!("register endpoint: {err}")))?;

    let (mut keeper, mut acks) = client
        .lease_keep_alive(lease_id)
        .await
        .map_err(|err| GcacheError::Registry(format!("start keepalive: {err}")))?;
    info!("[{addr}] register service ok");

    // Renew well inside the lease TTL.
    let mut renew = tokio::time::interval(std::time::Duration::from_secs(
        (LEASE_TTL_SECS as u64 / 3).max(1),
    ));

    loop {
        tokio::select! {
            received = stop.recv() => {
                let cause = received.flatten();
                if let Some(err) = &cause {
                    error!(error = %err, "[{addr}] stopping registration");
                }
                let _ = revoke(&mut client, lease_id, addr).await;
                return match cause {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
            }
            _ = renew.tick() => {
                if let Err(err) = keeper.keep_alive().await {
                    warn!(error = %err, "[{addr}] keepalive send failed");
                    let _ = revoke(&mut client, lease_id, addr).await;
                    return Err(GcacheError::Registry(format!("keepalive: {err}")));
                }
            }
            ack = acks.message() => match ack {
                Ok(Some(response)) => {
                    debug!("[{addr}] lease renewed, ttl {}s", response.ttl());
                }
                Ok(None) => {
                    info!("[{addr}] keepalive stream closed");
                    return revoke(&mut client, lease_id, addr).await;
                }
                Err(err) => {
                    warn!(error = %err, "[{addr}] keepalive stream failed");
                    let _ = revoke(&mut client, lease_id, addr).await;
                    return Err(GcacheError::Registry(format!("keepalive stream: {err}")));
                }
            }
        }
    }
}

/// Revokes the lease on the way out. The lease would expire on its own
/// within the TTL, so most callers only log a failure here.
async fn revoke(client: &mut EtcdClient, lease_id: i64, addr: &str) -> GcacheResult<()> {
    match client.lease_revoke(lease_id).await {
        Ok(_) => {
            info!("[{addr}] lease revoked");
            Ok(())
        }
        Err(err) => {
            warn!(error = %err, "[{addr}] lease revoke failed");
            Err(GcacheError::Registry(format!("revoke lease: {err}")))
        }
    }
}
