//! Node abstractions for the consistent hash ring.
//!
//! Nodes represent backend cache servers. They are identified by a compact
//! `NodeId` assigned sequentially by the router at registration time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compact identifier for a backend node.
///
/// Sequential ids are handed out by the router and sent to the backend as the
/// first message on its connection, so the id must serialize.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        NodeId(id)
    }
}

/// Logical node participating in the ring.
///
/// Keep this struct small and cheap to clone; connections and health state
/// live in the cluster registry, not here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    /// Network address, used for logging and identification only. Ring
    /// positions are derived from the id, never from the address.
    pub addr: String,
}

impl Node {
    /// Construct a new node.
    pub fn new(id: NodeId, addr: impl Into<String>) -> Self {
        Self {
            id,
            addr: addr.into(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}@{}", self.id, self.addr)
    }
}
