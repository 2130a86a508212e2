//! Hash ring data structure.
//!
//! Holds an ordered set of [`VirtualNode`]s and answers "which node owns this
//! key" with a successor search over that set.
//!
//! # Algorithm
//!
//! 1. Hash the key into a token with the ring's partitioner
//! 2. Find the first virtual node whose token is `>=` the key's token
//! 3. If there is none, wrap around to the smallest token (the ring is circular)
//!
//! # Concurrency
//!
//! All methods take `&self`. Membership lives behind a reader-writer lock, so
//! any number of lookups run in parallel while `add_node` / `remove_node`
//! get exclusive access. Lookups never mutate.

use crate::error::{Error, Result};
use crate::node::{Node, NodeId};
use crate::partitioner::{Partitioner, Xxh3Partitioner};
use crate::token::HashToken;
use crate::vnode::VirtualNode;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Replicas per node used by [`RingBuilder`] unless overridden.
pub const DEFAULT_VNODES: u32 = 5;

#[derive(Default)]
struct RingState {
    /// Sorted positions, `(token, node_id, replica)`.
    vnodes: BTreeSet<VirtualNode>,
    /// Member metadata plus the replica count it was inserted with.
    nodes: HashMap<NodeId, (Node, u32)>,
}

impl RingState {
    fn remove(&mut self, node_id: &NodeId) -> Option<Node> {
        let (node, _) = self.nodes.remove(node_id)?;
        self.vnodes.retain(|v| v.node_id != *node_id);
        Some(node)
    }
}

/// Consistent hash ring with virtual replicas.
pub struct HashRing {
    state: RwLock<RingState>,
    partitioner: Box<dyn Partitioner>,
}

impl HashRing {
    /// Create an empty ring using the default XXH3 partitioner.
    pub fn new() -> Self {
        Self::with_partitioner(Xxh3Partitioner)
    }

    /// Create an empty ring with a specific partitioner.
    pub fn with_partitioner(partitioner: impl Partitioner) -> Self {
        Self {
            state: RwLock::new(RingState::default()),
            partitioner: Box::new(partitioner),
        }
    }

    /// Insert `replicas` positions for `node`.
    ///
    /// Adding a node id that is already present replaces its previous
    /// positions, so afterwards the node owns exactly `replicas` positions.
    ///
    /// # Performance
    /// - **Time**: O(R log n) where R = replicas, n = total vnodes
    ///
    /// # Errors
    /// [`Error::InvalidNode`] if `replicas` is zero: a member without positions
    /// could never be routed to.
    pub fn add_node(&self, node: Node, replicas: u32) -> Result<()> {
        if replicas == 0 {
            return Err(Error::InvalidNode(format!(
                "node {} needs at least one virtual replica",
                node.id
            )));
        }

        // Hash outside the lock; only the set insertion needs exclusivity.
        let vnodes: Vec<VirtualNode> = (0..replicas)
            .map(|i| VirtualNode::from_index(self.partitioner.as_ref(), node.id, i))
            .collect();

        let mut state = self.state.write();
        state.remove(&node.id);
        state.vnodes.extend(vnodes);
        state.nodes.insert(node.id, (node, replicas));
        Ok(())
    }

    /// Remove every position owned by `node_id`.
    ///
    /// Returns `false` if the node was never added (or already removed).
    pub fn remove_node(&self, node_id: &NodeId) -> bool {
        self.state.write().remove(node_id).is_some()
    }

    /// Find the node owning `key`.
    ///
    /// Pure function of current membership and the key.
    ///
    /// # Performance
    /// - **Time**: O(log n) successor search
    ///
    /// # Errors
    /// [`Error::EmptyRing`] when no nodes are registered.
    pub fn lookup(&self, key: &[u8]) -> Result<NodeId> {
        let token = self.partitioner.partition(key);
        let state = self.state.read();
        Self::successor(&state.vnodes, token)
            .map(|v| v.node_id)
            .ok_or(Error::EmptyRing)
    }

    /// Like [`lookup`](Self::lookup) but returns the node metadata.
    pub fn lookup_node(&self, key: &[u8]) -> Result<Node> {
        let token = self.partitioner.partition(key);
        let state = self.state.read();
        let vnode = Self::successor(&state.vnodes, token).ok_or(Error::EmptyRing)?;
        state
            .nodes
            .get(&vnode.node_id)
            .map(|(node, _)| node.clone())
            .ok_or(Error::NodeNotFound(vnode.node_id))
    }

    fn successor(vnodes: &BTreeSet<VirtualNode>, token: HashToken) -> Option<&VirtualNode> {
        vnodes
            .range(VirtualNode::lower_bound(token)..)
            .next()
            .or_else(|| vnodes.iter().next())
    }

    /// Metadata for a member, if present.
    pub fn get_node(&self, node_id: &NodeId) -> Option<Node> {
        self.state
            .read()
            .nodes
            .get(node_id)
            .map(|(node, _)| node.clone())
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.state.read().nodes.contains_key(node_id)
    }

    /// Number of physical nodes.
    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    /// Number of virtual node positions.
    pub fn token_count(&self) -> usize {
        self.state.read().vnodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().nodes.is_empty()
    }

    /// Tokens owned by one node, in ring order.
    pub fn tokens_for(&self, node_id: &NodeId) -> Vec<HashToken> {
        self.state
            .read()
            .vnodes
            .iter()
            .filter(|v| v.node_id == *node_id)
            .map(|v| v.token)
            .collect()
    }

    /// All `(token, node)` positions in ring order.
    pub fn tokens(&self) -> Vec<(HashToken, NodeId)> {
        self.state
            .read()
            .vnodes
            .iter()
            .map(|v| (v.token, v.node_id))
            .collect()
    }

    /// All members, sorted by id.
    pub fn nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .state
            .read()
            .nodes
            .values()
            .map(|(node, _)| node.clone())
            .collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    /// Fraction of the token space each node owns, sorted by node id.
    ///
    /// A virtual node owns the arc from its predecessor's token (exclusive)
    /// to its own token (inclusive). Fractions sum to 1.0 on a non-empty ring.
    pub fn ownership(&self) -> Vec<(NodeId, f64)> {
        let state = self.state.read();
        let mut owned: HashMap<NodeId, f64> =
            state.nodes.keys().map(|id| (*id, 0.0)).collect();

        if state.vnodes.len() == 1 {
            if let Some(only) = state.vnodes.iter().next() {
                owned.insert(only.node_id, 1.0);
            }
        } else if let Some(last) = state.vnodes.iter().next_back() {
            let space = u64::MAX as f64 + 1.0;
            let mut prev = *last;
            for vnode in &state.vnodes {
                let arc = prev.distance_to(vnode).0 as f64 / space;
                *owned.entry(vnode.node_id).or_insert(0.0) += arc;
                prev = *vnode;
            }
        }

        let mut result: Vec<(NodeId, f64)> = owned.into_iter().collect();
        result.sort_by_key(|(id, _)| *id);
        result
    }

    /// Name of the partitioner hashing keys and replica keys.
    pub fn partitioner_name(&self) -> &'static str {
        self.partitioner.name()
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HashRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("HashRing")
            .field("partitioner", &self.partitioner.name())
            .field("nodes", &state.nodes.len())
            .field("tokens", &state.vnodes.len())
            .finish()
    }
}

/// Builder for a pre-populated [`HashRing`].
///
/// # Example
///
/// ```rust
/// use corelib::{Node, NodeId, RingBuilder};
///
/// let ring = RingBuilder::new()
///     .with_vnodes(8)
///     .add_node(Node::new(NodeId(0), "10.0.0.1:7000"))
///     .add_node(Node::new(NodeId(1), "10.0.0.2:7000"))
///     .build()
///     .unwrap();
/// assert_eq!(ring.token_count(), 16);
/// ```
pub struct RingBuilder {
    vnodes: u32,
    partitioner: Option<Box<dyn Partitioner>>,
    nodes: Vec<(Node, Option<u32>)>,
}

impl RingBuilder {
    pub fn new() -> Self {
        Self {
            vnodes: DEFAULT_VNODES,
            partitioner: None,
            nodes: Vec::new(),
        }
    }

    /// Replicas per node for nodes added without an explicit count.
    pub fn with_vnodes(mut self, vnodes: u32) -> Self {
        self.vnodes = vnodes;
        self
    }

    pub fn with_partitioner(mut self, partitioner: impl Partitioner) -> Self {
        self.partitioner = Some(Box::new(partitioner));
        self
    }

    pub fn add_node(mut self, node: Node) -> Self {
        self.nodes.push((node, None));
        self
    }

    pub fn add_node_with_vnodes(mut self, node: Node, vnodes: u32) -> Self {
        self.nodes.push((node, Some(vnodes)));
        self
    }

    pub fn build(self) -> Result<HashRing> {
        let ring = HashRing {
            state: RwLock::new(RingState::default()),
            partitioner: self
                .partitioner
                .unwrap_or_else(|| Box::new(Xxh3Partitioner)),
        };
        for (node, vnodes) in self.nodes {
            ring.add_node(node, vnodes.unwrap_or(self.vnodes))?;
        }
        Ok(ring)
    }
}

impl Default for RingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_replicas_rejected() {
        let ring = HashRing::new();
        let err = ring.add_node(Node::new(NodeId(1), "a"), 0).unwrap_err();
        assert!(matches!(err, Error::InvalidNode(_)));
        assert!(ring.is_empty());
    }

    #[test]
    fn test_wraps_to_smallest_token() {
        let ring = HashRing::new();
        ring.add_node(Node::new(NodeId(1), "a"), 3).unwrap();
        let smallest = ring.tokens()[0];

        // Any token past the largest position must wrap to the smallest one.
        let state = ring.state.read();
        let owner = HashRing::successor(&state.vnodes, HashToken(u64::MAX)).unwrap();
        let largest = state.vnodes.iter().next_back().unwrap();
        if largest.token != HashToken(u64::MAX) {
            assert_eq!((owner.token, owner.node_id), smallest);
        }
    }

    #[test]
    fn test_ownership_sums_to_one() {
        let ring = RingBuilder::new()
            .with_vnodes(16)
            .add_node(Node::new(NodeId(0), "a"))
            .add_node(Node::new(NodeId(1), "b"))
            .add_node(Node::new(NodeId(2), "c"))
            .build()
            .unwrap();
        let total: f64 = ring.ownership().iter().map(|(_, f)| f).sum();
        assert!((total - 1.0).abs() < 1e-9, "total = {}", total);
    }

    #[test]
    fn test_single_vnode_owns_everything() {
        let ring = HashRing::new();
        ring.add_node(Node::new(NodeId(9), "solo"), 1).unwrap();
        assert_eq!(ring.ownership(), vec![(NodeId(9), 1.0)]);
    }
}
