//! Cluster configuration.
//!
//! One explicit struct handed to every component constructor. Loaded from a
//! JSON file when one is given; every field has a default so a partial file
//! (or none at all) works.

use crate::error::{ClusterError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wire::FrameCodec;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Where the router accepts backend node connections.
    pub router_addr: SocketAddr,
    /// Where the health monitor accepts backend heartbeat connections.
    pub health_addr: SocketAddr,
    /// Width of the ASCII length header of every frame.
    pub header_len: usize,
    /// Largest payload accepted in one frame.
    pub max_frame_len: usize,
    /// Ring positions per backend node.
    pub virtual_replicas: u32,
    /// Time between two heartbeat probes to the same node.
    pub probe_interval_ms: u64,
    /// How long a probe waits for its acknowledgement.
    pub probe_timeout_ms: u64,
    /// Consecutive missed probes after which a node is declared dead.
    pub dead_threshold: u32,
    /// Bound on one routed command (send + reply).
    pub request_timeout_ms: u64,
    /// Interval of the active-node summary log line.
    pub summary_interval_ms: u64,
    /// Interval of the unhealthy-list handoff to the router.
    pub report_interval_ms: u64,
    /// Key expiry in seconds; recorded in the command log header only.
    pub expire_secs: u64,
    /// Append-only command log. Disabled when unset.
    pub log_path: Option<PathBuf>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            router_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            health_addr: SocketAddr::from(([127, 0, 0, 1], 5001)),
            header_len: wire::DEFAULT_HEADER_LEN,
            max_frame_len: wire::DEFAULT_MAX_FRAME_LEN,
            virtual_replicas: corelib::ring::DEFAULT_VNODES,
            probe_interval_ms: 1_000,
            probe_timeout_ms: 5_000,
            dead_threshold: 3,
            request_timeout_ms: 5_000,
            summary_interval_ms: 5_000,
            report_interval_ms: 5_000,
            expire_secs: 0,
            log_path: None,
        }
    }
}

impl ClusterConfig {
    /// Load and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| ClusterError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.header_len == 0, "header_len must be at least 1"),
            (self.max_frame_len == 0, "max_frame_len must be at least 1"),
            (self.virtual_replicas == 0, "virtual_replicas must be at least 1"),
            (self.dead_threshold == 0, "dead_threshold must be at least 1"),
            (self.probe_interval_ms == 0, "probe_interval_ms must be positive"),
            (self.probe_timeout_ms == 0, "probe_timeout_ms must be positive"),
            (self.request_timeout_ms == 0, "request_timeout_ms must be positive"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, msg)) => Err(ClusterError::Config(msg.to_string())),
            None => Ok(()),
        }
    }

    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.header_len, self.max_frame_len)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_millis(self.summary_interval_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}
