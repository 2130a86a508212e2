//! Heartbeat failure detection.
//!
//! Every backend keeps a dedicated connection to the health monitor. The
//! monitor probes it on a fixed interval and counts consecutive misses; once
//! the count reaches the dead threshold the node is reported dead exactly once
//! and its probing task ends.

pub mod monitor;
pub mod session;

pub use monitor::{DeadNodeEvent, HealthMonitor};
pub use session::{HeartbeatSession, ProbeOutcome, SessionState};
