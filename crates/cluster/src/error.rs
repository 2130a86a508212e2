//! Error types for the cluster crate.

use corelib::NodeId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// No nodes registered; nothing to route to.
    #[error("no cache nodes available: the ring is empty")]
    EmptyRing,

    /// Send/receive failure or timeout while talking to the owning node.
    /// Not retried and does not evict the node.
    #[error("node {node} unreachable: {source}")]
    NodeUnreachable {
        node: NodeId,
        #[source]
        source: wire::WireError,
    },

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// The node answered with `Reply::Error`.
    #[error("node rejected command: {0}")]
    Rejected(String),

    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },

    /// The unhealthy list could not be handed upstream; it is kept for the
    /// next attempt.
    #[error("health report not delivered: {0}")]
    ReportDelivery(String),

    #[error(transparent)]
    Wire(#[from] wire::WireError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Ring(corelib::Error),
}

impl From<corelib::Error> for ClusterError {
    fn from(e: corelib::Error) -> Self {
        match e {
            corelib::Error::EmptyRing => ClusterError::EmptyRing,
            other => ClusterError::Ring(other),
        }
    }
}
