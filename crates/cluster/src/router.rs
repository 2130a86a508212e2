//! Cache router.
//!
//! Owns the hash ring and the node registry. Every routed command is sent to
//! the node owning its key over that node's connection, which is locked for
//! one request/response so concurrent routes never interleave replies.

use crate::config::ClusterConfig;
use crate::error::{ClusterError, Result};
use crate::heartbeat::DeadNodeEvent;
use crate::oplog::{NullOpLog, OpLog};
use crate::registry::{NodeEntry, NodeHealth, NodeRegistry};
use crate::report::ReportSink;
use crate::stats::{CacheStats, Stats};
use async_trait::async_trait;
use corelib::{HashRing, Node, NodeId};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wire::{Command, Connection, Reply, Value, WireError};

pub struct Router<S = TcpStream> {
    config: ClusterConfig,
    ring: HashRing,
    registry: NodeRegistry<S>,
    stats: CacheStats,
    oplog: Arc<dyn OpLog>,
}

impl<S> Router<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(config: ClusterConfig) -> Result<Self> {
        Self::with_oplog(config, Arc::new(NullOpLog))
    }

    pub fn with_oplog(config: ClusterConfig, oplog: Arc<dyn OpLog>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ring: HashRing::new(),
            registry: NodeRegistry::new(),
            stats: CacheStats::new(),
            oplog,
        })
    }

    /// Register a freshly connected backend.
    ///
    /// The node is told its id first; only once that handshake went through
    /// is it added to the registry and the ring.
    pub async fn register_node(&self, stream: S, addr: impl Into<String>) -> Result<NodeId> {
        let addr = addr.into();
        let node_id = self.registry.next_id();
        let mut conn = Connection::new(stream, self.config.codec());

        let limit = self.config.request_timeout();
        let handshake = tokio::time::timeout(limit, conn.send_node_id(node_id)).await;
        match handshake {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                return Err(ClusterError::NodeUnreachable { node: node_id, source });
            }
            Err(_) => {
                return Err(ClusterError::NodeUnreachable {
                    node: node_id,
                    source: WireError::Timeout(limit),
                });
            }
        }

        self.registry.insert(node_id, addr.clone(), conn);
        if let Err(e) = self
            .ring
            .add_node(Node::new(node_id, addr.clone()), self.config.virtual_replicas)
        {
            self.registry.remove(&node_id);
            return Err(e.into());
        }
        info!(
            "Node {} at {} joined the ring ({} nodes, {} positions)",
            node_id,
            addr,
            self.ring.node_count(),
            self.ring.token_count()
        );
        Ok(node_id)
    }

    /// Send `cmd` to the node owning its key and return the reply.
    ///
    /// One attempt, bounded by the request timeout. Every get that found an
    /// owner counts as a query, failed or not, and only a value is a hit. A
    /// timeout leaves the node in the ring; a connection that can no longer
    /// carry traffic takes the node out of it.
    pub async fn route(&self, cmd: Command) -> Result<Reply> {
        cmd.validate()?;
        let node_id = self.ring.lookup(cmd.key().as_bytes())?;
        self.oplog.record(&cmd);

        let outcome = self.dispatch(node_id, &cmd).await;
        if cmd.is_read() {
            self.stats.record_get(matches!(&outcome, Ok(reply) if reply.is_hit()));
        }
        match &outcome {
            Ok(reply) => debug!(node = %node_id, "{} -> {}", cmd, reply),
            Err(e) => debug!(node = %node_id, "{} failed: {}", cmd, e),
        }
        outcome
    }

    async fn dispatch(&self, node_id: NodeId, cmd: &Command) -> Result<Reply> {
        let failed = |source| ClusterError::NodeUnreachable {
            node: node_id,
            source,
        };
        let conn = self
            .registry
            .connection(&node_id)
            .ok_or_else(|| failed(WireError::Closed))?;

        let limit = self.config.request_timeout();
        let mut guard = tokio::time::timeout(limit, conn.lock())
            .await
            .map_err(|_| failed(WireError::Timeout(limit)))?;
        match guard.round_trip(cmd, limit).await {
            Ok(reply) => Ok(reply),
            Err(source) => {
                let broken = guard.is_broken();
                drop(guard);
                if broken {
                    warn!("Connection to node {} lost: {}", node_id, source);
                    self.quarantine(node_id);
                }
                Err(failed(source))
            }
        }
    }

    pub async fn get(&self, key: impl Into<String>) -> Result<Option<Value>> {
        let cmd = Command::get(key)?;
        match self.route(cmd.clone()).await? {
            Reply::Value(value) => Ok(Some(value)),
            Reply::Miss => Ok(None),
            other => unexpected(&cmd, other),
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let cmd = Command::set(key, value)?;
        match self.route(cmd.clone()).await? {
            Reply::Stored => Ok(()),
            other => unexpected(&cmd, other),
        }
    }

    /// Returns whether the key existed.
    pub async fn delete(&self, key: impl Into<String>) -> Result<bool> {
        let cmd = Command::delete(key)?;
        match self.route(cmd.clone()).await? {
            Reply::Deleted(existed) => Ok(existed),
            other => unexpected(&cmd, other),
        }
    }

    /// Add `delta` to an integer value, returning the new value.
    pub async fn add(&self, key: impl Into<String>, delta: i64) -> Result<i64> {
        let cmd = Command::add(key, delta)?;
        match self.route(cmd.clone()).await? {
            Reply::Counter(n) => Ok(n),
            other => unexpected(&cmd, other),
        }
    }

    pub async fn increment(&self, key: impl Into<String>) -> Result<i64> {
        self.add(key, 1).await
    }

    pub async fn decrement(&self, key: impl Into<String>) -> Result<i64> {
        self.add(key, -1).await
    }

    /// Remove a node from the ring and the registry. Returns `false` if it
    /// was already gone, so repeated reports of the same node are harmless.
    pub fn evict_node(&self, node_id: NodeId) -> bool {
        let in_ring = self.ring.remove_node(&node_id);
        let in_registry = self.registry.remove(&node_id).is_some();
        if in_ring || in_registry {
            info!("Evicted node {} ({} nodes left)", node_id, self.ring.node_count());
        }
        in_ring || in_registry
    }

    /// Take a dead node out of the ring but keep it listed as unhealthy
    /// until it is evicted.
    pub fn quarantine(&self, node_id: NodeId) -> bool {
        let in_ring = self.ring.remove_node(&node_id);
        let previous = self.registry.set_health(&node_id, NodeHealth::Unhealthy);
        if previous == Some(NodeHealth::Healthy) {
            warn!("Node {} quarantined; routing around it", node_id);
        }
        in_ring || previous.is_some()
    }

    /// Quarantine every node the health monitor declares dead.
    pub fn consume_dead_nodes(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<DeadNodeEvent>,
    ) -> JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                debug!(
                    "Dead-node event for {} at {} after {} missed probes",
                    event.node_id, event.addr, event.missed_probes
                );
                router.quarantine(event.node_id);
            }
        })
    }

    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }

    pub fn nodes(&self) -> Vec<NodeEntry> {
        self.registry.entries()
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    pub fn registry(&self) -> &NodeRegistry<S> {
        &self.registry
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }
}

impl Router<TcpStream> {
    /// Accept backend connections until the listener fails hard.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("Router listening at {}", listener.local_addr()?);
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept node connection: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
            }

            let router = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = router.register_node(stream, addr.to_string()).await {
                    warn!("Registration of node at {} failed: {}", addr, e);
                }
            });
        }
    }
}

#[async_trait]
impl<S> ReportSink for Router<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn deliver(&self, dead: &[NodeId]) -> Result<bool> {
        for node_id in dead {
            self.evict_node(*node_id);
        }
        Ok(true)
    }
}

fn unexpected<T>(cmd: &Command, reply: Reply) -> Result<T> {
    match reply {
        Reply::Error(message) => Err(ClusterError::Rejected(message)),
        other => Err(ClusterError::UnexpectedReply {
            command: cmd.to_string(),
            reply: other.to_string(),
        }),
    }
}
