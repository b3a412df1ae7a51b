//! # ByteView
//!
//! Immutable byte payload shared between the cache, the server, and the
//! peer client. Backed by `Arc<[u8]>` so clones are reference bumps and
//! the same buffer can sit in the cache while a response is in flight.

use std::fmt;
use std::sync::Arc;

use crate::measured::Measured;

/// An immutable view over cached bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct ByteView {
    bytes: Arc<[u8]>,
}

impl ByteView {
    /// Length of the payload in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrows the payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Copies the payload into a fresh vector.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }
}

impl Measured for ByteView {
    fn len(&self) -> usize {
        self.bytes.len()
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(bytes: Vec<u8>) -> Self {
        ByteView {
            bytes: Arc::from(bytes),
        }
    }
}

impl From<&[u8]> for ByteView {
    fn from(bytes: &[u8]) -> Self {
        ByteView {
            bytes: Arc::from(bytes),
        }
    }
}

impl From<&str> for ByteView {
    fn from(text: &str) -> Self {
        ByteView {
            bytes: Arc::from(text.as_bytes()),
        }
    }
}

impl fmt::Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteView({} bytes)", self.bytes.len())
    }
}
