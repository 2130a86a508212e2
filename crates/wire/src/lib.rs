//! Wire protocol between the router, the health monitor and backend nodes.
//!
//! This crate provides:
//! - Length-prefixed framing with exact-length reads
//! - The command / reply model exchanged with cache nodes
//! - The heartbeat token and the node-id registration handshake
//! - `send_command` / `receive_reply`, the two primitives the router uses

pub mod codec;
pub mod connection;
pub mod error;
pub mod protocol;

pub use codec::{FrameCodec, DEFAULT_HEADER_LEN, DEFAULT_MAX_FRAME_LEN};
pub use connection::{receive_reply, send_command, Connection};
pub use error::{Result, WireError};
pub use protocol::{Command, Reply, Request, Value, HEARTBEAT_TOKEN};
