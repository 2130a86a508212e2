//! Messages exchanged with cache nodes.
//!
//! Frame payloads are either the 3-byte heartbeat token or a bincode-encoded
//! [`Command`] / [`Reply`]. Every encoded command is longer than three bytes
//! (a 4-byte variant tag plus the key), so the two never overlap.

use crate::error::{Result, WireError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Heartbeat probe payload. The node echoes it back unchanged.
pub const HEARTBEAT_TOKEN: &[u8; 3] = b"ACK";

/// A cached value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

/// A cache operation. Increment and decrement are `Add` with delta ±1.
///
/// Constructed through the checked constructors so that every command on the
/// wire has a non-empty key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: Value },
    Delete { key: String },
    Add { key: String, delta: i64 },
}

impl Command {
    pub fn get(key: impl Into<String>) -> Result<Self> {
        Self::checked(Command::Get { key: key.into() })
    }

    pub fn set(key: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        Self::checked(Command::Set {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn delete(key: impl Into<String>) -> Result<Self> {
        Self::checked(Command::Delete { key: key.into() })
    }

    pub fn add(key: impl Into<String>, delta: i64) -> Result<Self> {
        Self::checked(Command::Add {
            key: key.into(),
            delta,
        })
    }

    fn checked(cmd: Self) -> Result<Self> {
        cmd.validate()?;
        Ok(cmd)
    }

    /// Reject commands that could not have come from the constructors.
    pub fn validate(&self) -> Result<()> {
        if self.key().is_empty() {
            return Err(WireError::InvalidCommand(format!(
                "{} with empty key",
                self.kind()
            )));
        }
        Ok(())
    }

    pub fn key(&self) -> &str {
        match self {
            Command::Get { key }
            | Command::Set { key, .. }
            | Command::Delete { key }
            | Command::Add { key, .. } => key,
        }
    }

    /// Short operation name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Get { .. } => "get",
            Command::Set { .. } => "set",
            Command::Delete { .. } => "del",
            Command::Add { .. } => "add",
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Command::Get { .. })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Get { key } | Command::Delete { key } => write!(f, "{} {}", self.kind(), key),
            Command::Set { key, value } => write!(f, "set {} {}", key, value),
            Command::Add { key, delta } => write!(f, "add {} {}", key, delta),
        }
    }
}

/// A node's answer to a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    /// `Get` found the key.
    Value(Value),
    /// `Get` did not find the key.
    Miss,
    /// `Set` succeeded.
    Stored,
    /// `Delete` result: whether the key existed.
    Deleted(bool),
    /// `Add` result: the new counter value.
    Counter(i64),
    /// The node understood the command but could not apply it.
    Error(String),
}

impl Reply {
    /// A `get` hit: the reply carries a present value.
    pub fn is_hit(&self) -> bool {
        matches!(self, Reply::Value(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Reply::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Value(v) => write!(f, "{}", v),
            Reply::Miss => write!(f, "(miss)"),
            Reply::Stored => write!(f, "OK"),
            Reply::Deleted(true) => write!(f, "deleted"),
            Reply::Deleted(false) => write!(f, "not found"),
            Reply::Counter(n) => write!(f, "{}", n),
            Reply::Error(e) => write!(f, "error: {}", e),
        }
    }
}

/// What a cache node can receive on one of its connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Heartbeat,
    Command(Command),
}

impl Request {
    /// Classify a frame payload received by a node.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload == HEARTBEAT_TOKEN {
            return Ok(Request::Heartbeat);
        }
        let cmd: Command = bincode::deserialize(payload)?;
        cmd.validate()?;
        Ok(Request::Command(cmd))
    }
}
