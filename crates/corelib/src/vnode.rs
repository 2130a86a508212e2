//! Virtual node abstractions.
//!
//! # Virtual Nodes (VNodes) Concept
//!
//! Each physical cache node is placed on the ring several times. Each
//! placement is a virtual node with its own token, derived from hashing the
//! composite key `"{node_id}-{replica}"`. This provides:
//!
//! 1. **Better Load Distribution**: More tokens = smoother distribution of keys
//! 2. **Gradual Rebalancing**: When nodes join/leave, only a fraction of keys move
//! 3. **Fault Tolerance**: Failure of one node spreads its keys over many successors
//!
//! # Performance Characteristics
//!
//! - **Memory**: O(R) per node where R = replicas per node
//! - **Lookup**: O(log n) where n = total vnodes
//! - **Rebalancing**: O(k/N) keys move when a node joins/leaves (k = keys, N = nodes)

use crate::node::NodeId;
use crate::partitioner::Partitioner;
use crate::token::{HashToken, Token};

/// A virtual node on the hash ring.
///
/// Represents a single token position owned by a physical node.
///
/// # Invariants
///
/// - Ordering is `(token, node_id, replica)`. Two nodes whose replicas hash
///   to the same token therefore both keep their position, and the lower
///   node id sorts first, which makes collision resolution deterministic.
/// - `(node_id, replica)` is unique on a ring, so a node with R replicas owns
///   exactly R entries.
///
/// # Memory Layout
///
/// ```text
/// VirtualNode {
///     token: HashToken(u64),  // 8 bytes
///     node_id: NodeId(u64),   // 8 bytes
///     replica: u32,           // 4 bytes (+ padding)
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualNode {
    /// Token position on the ring.
    pub token: HashToken,

    /// The physical node that owns this virtual node.
    pub node_id: NodeId,

    /// Index of this replica within its node, in `[0, R)`.
    pub replica: u32,
}

impl VirtualNode {
    /// Create a new virtual node.
    #[inline]
    pub fn new(token: HashToken, node_id: NodeId, replica: u32) -> Self {
        Self {
            token,
            node_id,
            replica,
        }
    }

    /// Create a virtual node from a node ID and replica index.
    ///
    /// # Algorithm
    ///
    /// 1. Format string: `"node_id-replica"`
    /// 2. Hash the string with the ring's partitioner
    /// 3. Create VirtualNode with token, node_id and replica
    ///
    /// # Example
    /// ```rust
    /// use corelib::{NodeId, VirtualNode};
    /// use corelib::partitioner::Xxh3Partitioner;
    ///
    /// let p = Xxh3Partitioner;
    /// let vnode0 = VirtualNode::from_index(&p, NodeId(1), 0);
    /// let vnode1 = VirtualNode::from_index(&p, NodeId(1), 1);
    /// assert_ne!(vnode0.token, vnode1.token);
    /// ```
    pub fn from_index(partitioner: &dyn Partitioner, node_id: NodeId, replica: u32) -> Self {
        let vnode_key = Self::replica_key(node_id, replica);
        let token = partitioner.partition(vnode_key.as_bytes());
        Self::new(token, node_id, replica)
    }

    /// The composite key hashed to place replica `replica` of `node_id`.
    pub fn replica_key(node_id: NodeId, replica: u32) -> String {
        format!("{}-{}", node_id, replica)
    }

    /// Smallest virtual node that can sit at `token`; used as a range bound
    /// when searching for the successor of a key.
    #[inline]
    pub(crate) fn lower_bound(token: HashToken) -> Self {
        Self::new(token, NodeId(0), 0)
    }

    /// Get the token position.
    #[inline]
    pub fn token(&self) -> HashToken {
        self.token
    }

    /// Get the owning node ID.
    #[inline]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Clockwise distance to another virtual node.
    #[inline]
    pub fn distance_to(&self, other: &Self) -> HashToken {
        self.token.distance_to(&other.token)
    }
}

impl std::fmt::Display for VirtualNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "VNode(token={}, node={}, replica={})",
            self.token, self.node_id, self.replica
        )
    }
}
