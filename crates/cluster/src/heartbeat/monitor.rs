//! Health monitor service.
//!
//! One probing task per connected backend, one summary task, one accept loop.
//! Dead nodes are moved from the active map to the unhealthy list and
//! announced on the dead-node channel; the unhealthy list is handed upstream
//! through a [`ReportSink`].

use super::session::{HeartbeatSession, ProbeOutcome, SessionState};
use crate::config::ClusterConfig;
use crate::error::{ClusterError, Result};
use crate::report::ReportSink;
use corelib::NodeId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wire::{Connection, WireError};

/// Emitted once per node when its misses reach the dead threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadNodeEvent {
    pub node_id: NodeId,
    pub addr: String,
    pub missed_probes: u32,
}

struct Watched {
    addr: String,
    /// Distinguishes a reconnected node from its previous, dying session.
    session: u64,
}

pub struct HealthMonitor {
    probe_interval: Duration,
    probe_timeout: Duration,
    dead_threshold: u32,
    summary_interval: Duration,
    codec: wire::FrameCodec,
    active: DashMap<NodeId, Watched>,
    unhealthy: Mutex<Vec<NodeId>>,
    sessions: AtomicU64,
    events: mpsc::UnboundedSender<DeadNodeEvent>,
}

impl HealthMonitor {
    /// Build a monitor and the receiving end of its dead-node channel.
    pub fn new(
        config: &ClusterConfig,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<DeadNodeEvent>)> {
        config.validate()?;
        let (events, rx) = mpsc::unbounded_channel();
        let monitor = Arc::new(Self {
            probe_interval: config.probe_interval(),
            probe_timeout: config.probe_timeout(),
            dead_threshold: config.dead_threshold,
            summary_interval: config.summary_interval(),
            codec: config.codec(),
            active: DashMap::new(),
            unhealthy: Mutex::new(Vec::new()),
            sessions: AtomicU64::new(0),
            events,
        });
        Ok((monitor, rx))
    }

    /// Accept backend heartbeat connections forever.
    ///
    /// Each backend first sends the node id the router assigned to it; the
    /// connection is then probed until the node is declared dead.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("Health monitor listening at {}", listener.local_addr()?);
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept heartbeat connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let monitor = Arc::clone(&self);
            tokio::spawn(async move {
                let mut conn = Connection::new(stream, monitor.codec);
                let handshake =
                    tokio::time::timeout(monitor.probe_timeout, conn.receive_node_id()).await;
                match handshake {
                    Ok(Ok(node_id)) => {
                        monitor.probe_node(node_id, addr.to_string(), conn).await;
                    }
                    Ok(Err(e)) => warn!("Heartbeat handshake from {} failed: {}", addr, e),
                    Err(_) => warn!("Heartbeat handshake from {} timed out", addr),
                }
            });
        }
    }

    /// Start probing `conn` on its own task.
    pub fn watch<S>(
        self: &Arc<Self>,
        node_id: NodeId,
        addr: impl Into<String>,
        conn: Connection<S>,
    ) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let monitor = Arc::clone(self);
        let addr = addr.into();
        tokio::spawn(async move { monitor.probe_node(node_id, addr, conn).await })
    }

    /// Probe one node until it is declared dead.
    pub async fn probe_node<S>(&self, node_id: NodeId, addr: String, mut conn: Connection<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let session_id = self.sessions.fetch_add(1, Ordering::SeqCst);
        info!("Registered a new client {} at {}", node_id, addr);
        self.active.insert(
            node_id,
            Watched {
                addr: addr.clone(),
                session: session_id,
            },
        );

        let mut session = HeartbeatSession::new(self.dead_threshold);
        loop {
            tokio::time::sleep(self.probe_interval).await;
            let outcome = self.probe_once(&mut conn).await;
            if !outcome.is_ack() {
                debug!(
                    node = %node_id,
                    misses = session.consecutive_misses() + 1,
                    "Heartbeat missed: {}",
                    outcome
                );
            }
            if session.record(outcome) == SessionState::Dead {
                break;
            }
        }

        warn!(
            "The client {} at {} is dead. No beat detected in the last {} attempts.",
            node_id,
            addr,
            session.consecutive_misses()
        );
        self.declare_dead(node_id, addr, session_id, session.consecutive_misses());
    }

    async fn probe_once<S>(&self, conn: &mut Connection<S>) -> ProbeOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if conn.send_heartbeat(self.probe_timeout).await.is_err() {
            return ProbeOutcome::SendFailed;
        }
        match conn.receive_heartbeat(self.probe_timeout).await {
            Ok(true) => ProbeOutcome::Acked,
            Ok(false) => ProbeOutcome::Garbled,
            Err(WireError::Timeout(_)) => ProbeOutcome::TimedOut,
            Err(_) => ProbeOutcome::ReceiveFailed,
        }
    }

    fn declare_dead(&self, node_id: NodeId, addr: String, session_id: u64, missed_probes: u32) {
        self.active
            .remove_if(&node_id, |_, watched| watched.session == session_id);
        {
            let mut unhealthy = self.unhealthy.lock();
            if !unhealthy.contains(&node_id) {
                unhealthy.push(node_id);
            }
        }
        let event = DeadNodeEvent {
            node_id,
            addr,
            missed_probes,
        };
        if self.events.send(event).is_err() {
            debug!("No listener for dead-node events; {} stays on the unhealthy list", node_id);
        }
    }

    /// Push the unhealthy list to `sink`.
    ///
    /// Entries are removed only after a positive acknowledgement, and only
    /// those that were delivered; nodes that died during the handoff stay
    /// for the next round. An empty list is not sent.
    pub async fn report_health(&self, sink: &dyn ReportSink) -> Result<bool> {
        let batch = self.unhealthy_nodes();
        if batch.is_empty() {
            return Ok(true);
        }

        match sink.deliver(&batch).await {
            Ok(true) => {
                info!("Reported {} dead node(s) upstream", batch.len());
                self.unhealthy.lock().retain(|id| !batch.contains(id));
                Ok(true)
            }
            Ok(false) => {
                warn!("Health report of {} node(s) was not acknowledged", batch.len());
                Ok(false)
            }
            Err(e) => {
                warn!("Health report failed: {}", e);
                Err(ClusterError::ReportDelivery(e.to_string()))
            }
        }
    }

    /// Periodically hand the unhealthy list to `sink`.
    pub fn spawn_reporter(
        self: &Arc<Self>,
        sink: Arc<dyn ReportSink>,
        every: Duration,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                // Failures are logged in report_health and retried next tick.
                let _ = monitor.report_health(sink.as_ref()).await;
            }
        })
    }

    /// Log the number of healthy nodes at a fixed interval.
    pub fn spawn_summary(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.summary_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                monitor.summarize();
            }
        })
    }

    pub fn summarize(&self) -> usize {
        let active = self.active.len();
        metrics::gauge!("active_nodes").set(active as f64);
        info!("Active healthy clients: {}", active);
        active
    }

    /// Nodes currently being probed, sorted.
    pub fn active_nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.active.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Dead nodes not yet acknowledged upstream, in detection order.
    pub fn unhealthy_nodes(&self) -> Vec<NodeId> {
        self.unhealthy.lock().clone()
    }

    pub fn address_of(&self, node_id: &NodeId) -> Option<String> {
        self.active.get(node_id).map(|w| w.addr.clone())
    }
}
