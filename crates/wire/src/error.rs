//! Wire protocol errors.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WireError>;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("payload codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Header did not contain a decimal length.
    #[error("malformed frame header {0:?}")]
    BadHeader(String),

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// Peer closed the connection (or a previous failure left it unusable).
    #[error("connection closed")]
    Closed,

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("unexpected message: {0}")]
    Unexpected(String),
}

impl WireError {
    /// True when the failure came from the transport rather than from a
    /// malformed message.
    pub fn is_transport(&self) -> bool {
        matches!(self, WireError::Io(_) | WireError::Closed | WireError::Timeout(_))
    }
}
