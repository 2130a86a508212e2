//! Backend cache node.
//!
//! Holds values in memory and answers commands from the router. A node keeps
//! two connections: the router connection carrying commands and the health
//! connection carrying heartbeat probes. Both are served by the same loop,
//! which echoes the heartbeat token and applies everything else to the store.

use crate::config::ClusterConfig;
use crate::error::{ClusterError, Result};
use corelib::NodeId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wire::{Command, Connection, Reply, Request, Value, WireError};

/// In-memory key/value store.
#[derive(Debug, Default)]
pub struct Store {
    values: Mutex<HashMap<String, Value>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, cmd: &Command) -> Reply {
        let mut values = self.values.lock();
        match cmd {
            Command::Get { key } => match values.get(key) {
                Some(value) => Reply::Value(value.clone()),
                None => Reply::Miss,
            },
            Command::Set { key, value } => {
                values.insert(key.clone(), value.clone());
                Reply::Stored
            }
            Command::Delete { key } => Reply::Deleted(values.remove(key).is_some()),
            Command::Add { key, delta } => {
                let current = match values.get(key) {
                    None => 0,
                    Some(Value::Int(n)) => *n,
                    Some(_) => return Reply::Error(format!("value of {} is not an integer", key)),
                };
                match current.checked_add(*delta) {
                    Some(next) => {
                        values.insert(key.clone(), Value::Int(next));
                        Reply::Counter(next)
                    }
                    None => Reply::Error(format!("adding {} to {} overflows", delta, key)),
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

/// Answer requests on `conn` until the peer goes away.
///
/// Heartbeats are only echoed while `heartbeats` is set. A frame that does not
/// decode to a valid command gets an error reply; transport failures end the
/// loop.
pub async fn serve_connection<S>(
    mut conn: Connection<S>,
    store: Arc<Store>,
    heartbeats: Arc<AtomicBool>,
) -> wire::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let request = match conn.read_request().await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(e @ (WireError::Codec(_) | WireError::InvalidCommand(_))) => {
                warn!("Rejecting malformed request: {}", e);
                conn.write_reply(&Reply::Error(e.to_string())).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        match request {
            Request::Heartbeat => {
                if heartbeats.load(Ordering::SeqCst) {
                    conn.write_heartbeat().await?;
                }
            }
            Request::Command(cmd) => {
                let reply = store.apply(&cmd);
                debug!("{} -> {}", cmd, reply);
                conn.write_reply(&reply).await?;
            }
        }
    }
}

/// A running backend node joined to a router (and optionally a health
/// monitor). Dropping it closes both connections.
pub struct CacheNode {
    id: NodeId,
    store: Arc<Store>,
    heartbeats: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl CacheNode {
    /// Join the router and the health monitor at the configured addresses.
    pub async fn connect(config: &ClusterConfig) -> Result<Self> {
        Self::join(config, true).await
    }

    /// Join the router only; the node is never probed.
    pub async fn connect_without_health(config: &ClusterConfig) -> Result<Self> {
        Self::join(config, false).await
    }

    async fn join(config: &ClusterConfig, with_health: bool) -> Result<Self> {
        let store = Arc::new(Store::new());
        let heartbeats = Arc::new(AtomicBool::new(true));
        let limit = config.request_timeout();

        let stream = TcpStream::connect(config.router_addr).await?;
        stream.set_nodelay(true)?;
        let mut router_conn = Connection::new(stream, config.codec());
        let id = tokio::time::timeout(limit, router_conn.receive_node_id())
            .await
            .map_err(|_| ClusterError::Wire(WireError::Timeout(limit)))??;
        info!("Joined router at {} as node {}", config.router_addr, id);

        let mut tasks = vec![spawn_serve(
            router_conn,
            Arc::clone(&store),
            Arc::clone(&heartbeats),
            id,
        )];

        if with_health {
            let stream = TcpStream::connect(config.health_addr).await?;
            stream.set_nodelay(true)?;
            let mut health_conn = Connection::new(stream, config.codec());
            tokio::time::timeout(limit, health_conn.send_node_id(id))
                .await
                .map_err(|_| ClusterError::Wire(WireError::Timeout(limit)))??;
            debug!("Node {} reporting to health monitor at {}", id, config.health_addr);
            tasks.push(spawn_serve(health_conn, Arc::clone(&store), Arc::clone(&heartbeats), id));
        }

        Ok(Self {
            id,
            store,
            heartbeats,
            tasks,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Stop answering heartbeat probes while still serving commands.
    pub fn pause_heartbeats(&self) {
        self.heartbeats.store(false, Ordering::SeqCst);
    }

    pub fn resume_heartbeats(&self) {
        self.heartbeats.store(true, Ordering::SeqCst);
    }

    /// Wait until both connections have been closed by their peers.
    pub async fn wait(mut self) {
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl Drop for CacheNode {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn spawn_serve(
    conn: Connection<TcpStream>,
    store: Arc<Store>,
    heartbeats: Arc<AtomicBool>,
    id: NodeId,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match serve_connection(conn, store, heartbeats).await {
            Ok(()) => info!("Node {}: peer closed the connection", id),
            Err(e) => warn!("Node {}: connection failed: {}", id, e),
        }
    })
}
