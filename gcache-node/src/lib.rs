//! # gcache Node Runtime
//!
//! Everything one cache node runs: the consistent-hash ring that maps
//! keys to peers, the locked cache envelope, named groups with their
//! loaders, the peer-facing TCP server, and the discovery registration
//! loop that keeps the node's lease alive.

pub mod cache;
pub mod group;
pub mod registry;
pub mod ring;
pub mod server;
pub mod stats;

pub use group::{get_group, Group, Loader, LoaderFunc};
pub use ring::HashRing;
pub use server::Server;
