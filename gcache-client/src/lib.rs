//! # gcache Peer Client
//!
//! Fetches cached values from remote peers: resolve the peer's logical
//! service name through the discovery backend, reuse one TCP connection
//! per peer, and issue `Get(group, key)` under a caller-supplied
//! deadline.

mod client;

pub use client::PeerClient;
