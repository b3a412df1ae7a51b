//! # Consistent Hash Ring
//!
//! Maps keys to peer addresses on a 2^32 circle. Each peer contributes
//! `replicas` virtual nodes named `"{i}{addr}"`, which spreads the
//! keyspace evenly enough that adding or removing a peer only moves the
//! keys adjacent to its positions.
//!
//! The default hash is CRC32-IEEE; tests inject their own function to
//! pin positions.

use std::collections::HashMap;

/// Hash function placing bytes on the circle.
pub type HashFn = Box<dyn Fn(&[u8]) -> u32 + Send + Sync>;

/// Consistent-hash circle with virtual-node replication.
pub struct HashRing {
    replicas: usize,
    hash: HashFn,
    /// Sorted virtual-node positions.
    positions: Vec<u32>,
    /// Position -> owning peer address.
    owners: HashMap<u32, String>,
}

impl HashRing {
    /// Creates an empty ring using CRC32-IEEE.
    pub fn new(replicas: usize) -> Self {
        Self::with_hash(replicas, Box::new(crc32fast::hash))
    }

    /// Creates an empty ring with a caller-supplied hash function.
    pub fn with_hash(replicas: usize, hash: HashFn) -> Self {
        HashRing {
            replicas,
            hash,
            positions: Vec::new(),
            owners: HashMap::new(),
        }
    }

    /// Adds peers to the ring, `replicas` virtual nodes each, and
    /// re-sorts the circle.
    pub fn add_nodes<I, S>(&mut self, addrs: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for addr in addrs {
            let addr = addr.as_ref();
            for replica in 0..self.replicas {
                let position = (self.hash)(format!("{replica}{addr}").as_bytes());
                self.positions.push(position);
                self.owners.insert(position, addr.to_string());
            }
        }
        self.positions.sort_unstable();
    }

    /// Returns the address owning `key`, or `None` on an empty ring.
    ///
    /// The owner is the first virtual node clockwise from the key's
    /// hash, wrapping past zero.
    pub fn locate(&self, key: &str) -> Option<&str> {
        if self.positions.is_empty() {
            return None;
        }
        let hash = (self.hash)(key.as_bytes());
        let idx = self.positions.partition_point(|&position| position < hash);
        let position = self.positions[idx % self.positions.len()];
        self.owners.get(&position).map(String::as_str)
    }

    /// Number of virtual-node positions on the ring.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// True when no peer has been added.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl std::fmt::Debug for HashRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashRing")
            .field("replicas", &self.replicas)
            .field("positions", &self.positions.len())
            .finish()
    }
}
