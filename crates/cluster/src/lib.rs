//! Sharded cache cluster: routing, node registry and failure detection.
//!
//! - [`Router`] accepts backend connections, places them on the hash ring and
//!   routes `get/set/delete/add` to the owning node.
//! - [`HealthMonitor`] probes every backend with heartbeats and reports the
//!   ones that stop answering.
//! - [`ReportSink`] is the handoff from the monitor to whoever evicts nodes.
//! - [`CacheNode`] is the backend side, used by the CLI and the tests.

pub mod backend;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod oplog;
pub mod registry;
pub mod report;
pub mod router;
pub mod stats;

pub use backend::{CacheNode, Store};
pub use config::ClusterConfig;
pub use error::{ClusterError, Result};
pub use heartbeat::{DeadNodeEvent, HealthMonitor, HeartbeatSession, ProbeOutcome, SessionState};
pub use oplog::{FileOpLog, NullOpLog, OpLog, OpRecord};
pub use registry::{NodeEntry, NodeHealth, NodeRegistry};
pub use report::ReportSink;
pub use router::Router;
pub use stats::{CacheStats, Stats};
