//! # gcache Shared Types
//!
//! Shared building blocks for the cache cluster: the error taxonomy, the
//! sized-value abstraction, the immutable byte view exchanged between
//! nodes, node configuration, and the peer wire codec.

pub mod byteview;
pub mod config;
pub mod error;
pub mod measured;
pub mod net;
pub mod wire;

pub use byteview::ByteView;
pub use config::NodeConfig;
pub use error::{GcacheError, GcacheResult};
pub use measured::Measured;
