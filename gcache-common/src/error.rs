//! # Error Taxonomy
//!
//! One error type for the whole cluster so the server, the peer client,
//! and the policy callers agree on what a failure means.
//!
//! ## Notes
//!
//! - `NotFound` renders exactly `record not found`; peer clients match on
//!   that literal text, so the message is part of the wire contract.
//! - `Remote` carries a peer-reported message verbatim for the same
//!   reason.

use thiserror::Error;

/// Result alias used across the workspace.
pub type GcacheResult<T> = Result<T, GcacheError>;

/// Errors surfaced by the cache cluster.
#[derive(Debug, Error)]
pub enum GcacheError {
    /// A request argument failed validation (empty group or key).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The loader has no record for the requested key.
    #[error("record not found")]
    NotFound,
    /// No group is registered under the requested name.
    #[error("group {0} not found")]
    GroupNotFound(String),
    /// A peer address does not match `x.x.x.x:port`.
    #[error("invalid peer address {0}, expected x.x.x.x:port")]
    InvalidAddress(String),
    /// `start` was called on a node that is already running.
    #[error("server {0} is already started")]
    AlreadyRunning(String),
    /// The peer stream carried bytes that do not frame correctly.
    #[error("protocol error")]
    Protocol,
    /// Dial or connection failure while talking to a peer.
    #[error("transport error: {0}")]
    Transport(String),
    /// A remote Get did not complete within the caller's deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// The discovery backend rejected or dropped a registry operation.
    #[error("registry error: {0}")]
    Registry(String),
    /// An error string reported by a peer, surfaced verbatim.
    #[error("{0}")]
    Remote(String),
    /// Underlying socket failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_renders_wire_literal() {
        assert_eq!(GcacheError::NotFound.to_string(), "record not found");
    }

    #[test]
    fn group_not_found_names_the_group() {
        let err = GcacheError::GroupNotFound("scores".to_string());
        assert_eq!(err.to_string(), "group scores not found");
    }

    #[test]
    fn remote_is_verbatim() {
        let err = GcacheError::Remote("record not found".to_string());
        assert_eq!(err.to_string(), "record not found");
    }
}
