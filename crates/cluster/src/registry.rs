//! Node registry: live backend connections and their health.
//!
//! Shared by the routing path (read: which connection serves node N) and by
//! registration / eviction (write). `DashMap` shards the locking so lookups for
//! different nodes do not contend.

use corelib::NodeId;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};
use wire::Connection;

/// A node's connection, locked for the duration of one request/response so
/// concurrent routes to the same node never interleave their replies.
pub type SharedConnection<S> = Arc<Mutex<Connection<S>>>;

/// Health as last reported by the heartbeat monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeHealth {
    Healthy,
    Unhealthy,
}

impl fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeHealth::Healthy => write!(f, "healthy"),
            NodeHealth::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Snapshot of one registered node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeEntry {
    pub id: NodeId,
    pub addr: String,
    pub health: NodeHealth,
}

struct Slot<S> {
    entry: NodeEntry,
    connection: SharedConnection<S>,
}

pub struct NodeRegistry<S = TcpStream> {
    nodes: DashMap<NodeId, Slot<S>>,
    next_id: AtomicU64,
}

impl<S> NodeRegistry<S> {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Hand out the next sequential node id. Ids are never reused.
    pub fn next_id(&self) -> NodeId {
        NodeId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn insert(&self, id: NodeId, addr: impl Into<String>, connection: Connection<S>) {
        let entry = NodeEntry {
            id,
            addr: addr.into(),
            health: NodeHealth::Healthy,
        };
        info!("Registering node {} at {}", id, entry.addr);
        self.nodes.insert(
            id,
            Slot {
                entry,
                connection: Arc::new(Mutex::new(connection)),
            },
        );
    }

    /// Drop a node and its connection. `None` if it was not registered.
    pub fn remove(&self, id: &NodeId) -> Option<NodeEntry> {
        let (_, slot) = self.nodes.remove(id)?;
        info!("Removed node {} ({}) from registry", id, slot.entry.addr);
        Some(slot.entry)
    }

    pub fn connection(&self, id: &NodeId) -> Option<SharedConnection<S>> {
        self.nodes.get(id).map(|slot| Arc::clone(&slot.connection))
    }

    /// Update a node's health, returning the previous value.
    pub fn set_health(&self, id: &NodeId, health: NodeHealth) -> Option<NodeHealth> {
        let mut slot = self.nodes.get_mut(id)?;
        let previous = slot.entry.health;
        if previous != health {
            debug!("Node {} is now {}", id, health);
        }
        slot.entry.health = health;
        Some(previous)
    }

    pub fn get(&self, id: &NodeId) -> Option<NodeEntry> {
        self.nodes.get(id).map(|slot| slot.entry.clone())
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// All nodes, sorted by id.
    pub fn entries(&self) -> Vec<NodeEntry> {
        let mut entries: Vec<NodeEntry> =
            self.nodes.iter().map(|slot| slot.entry.clone()).collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    /// Healthy node ids, sorted.
    pub fn active(&self) -> Vec<NodeId> {
        self.ids_with(NodeHealth::Healthy)
    }

    /// Unhealthy (quarantined) node ids, sorted.
    pub fn quarantined(&self) -> Vec<NodeId> {
        self.ids_with(NodeHealth::Unhealthy)
    }

    fn ids_with(&self, health: NodeHealth) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|slot| slot.entry.health == health)
            .map(|slot| slot.entry.id)
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<S> Default for NodeRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};
    use wire::FrameCodec;

    fn conn() -> Connection<DuplexStream> {
        let (a, _b) = duplex(64);
        Connection::new(a, FrameCodec::default())
    }

    #[test]
    fn test_sequential_ids() {
        let registry: NodeRegistry<DuplexStream> = NodeRegistry::new();
        assert_eq!(registry.next_id(), NodeId(0));
        assert_eq!(registry.next_id(), NodeId(1));
        assert_eq!(registry.next_id(), NodeId(2));
    }

    #[test]
    fn test_health_views() {
        let registry = NodeRegistry::new();
        registry.insert(NodeId(0), "a", conn());
        registry.insert(NodeId(1), "b", conn());
        registry.insert(NodeId(2), "c", conn());

        assert_eq!(
            registry.set_health(&NodeId(1), NodeHealth::Unhealthy),
            Some(NodeHealth::Healthy)
        );
        assert_eq!(registry.active(), vec![NodeId(0), NodeId(2)]);
        assert_eq!(registry.quarantined(), vec![NodeId(1)]);
        assert_eq!(registry.set_health(&NodeId(9), NodeHealth::Unhealthy), None);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = NodeRegistry::new();
        registry.insert(NodeId(4), "a", conn());
        assert_eq!(registry.remove(&NodeId(4)).map(|e| e.addr), Some("a".to_string()));
        assert!(registry.remove(&NodeId(4)).is_none());
        assert!(registry.connection(&NodeId(4)).is_none());
        assert!(registry.is_empty());
    }
}
