//! Error types for the core library.

use crate::node::NodeId;
use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Lookup on a ring with no registered nodes.
    #[error("hash ring is empty: no nodes registered")]
    EmptyRing,
    /// Invalid node configuration
    #[error("invalid node: {0}")]
    InvalidNode(String),
    /// Node is not a member of the ring
    #[error("node {0} is not on the ring")]
    NodeNotFound(NodeId),
}
