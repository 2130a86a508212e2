//! Append-only command log.
//!
//! The router records every routed command here for audit and later replay.
//! Recording is fire-and-forget: records go through an unbounded channel to a
//! writer task, and a failed write is logged and dropped. It never blocks or
//! fails the cache operation that produced it.

use crate::error::Result;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use wire::Command;

/// One line of the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpRecord {
    pub ts_ms: u64,
    pub command: Command,
}

impl OpRecord {
    pub fn now(command: Command) -> Self {
        let ts_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self { ts_ms, command }
    }
}

/// First line of a log file: the settings the log was written under.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LogHeader {
    pub virtual_replicas: u32,
    pub expire_secs: u64,
}

/// Write-only sink for routed commands.
pub trait OpLog: Send + Sync {
    fn record(&self, command: &Command);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOpLog;

impl OpLog for NullOpLog {
    fn record(&self, _command: &Command) {}
}

/// JSON-lines file log with a background writer task.
pub struct FileOpLog {
    tx: mpsc::UnboundedSender<OpRecord>,
    writer: JoinHandle<()>,
}

impl FileOpLog {
    /// Create (truncating) the log at `path` and start its writer task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(path: impl AsRef<Path>, header: LogHeader) -> Result<Self> {
        let path = path.as_ref();
        let mut file = std::fs::File::create(path)?;
        let line = serde_json::to_string(&header)
            .map_err(|e| crate::ClusterError::Config(e.to_string()))?;
        writeln!(file, "{}", line)?;
        debug!("Command log opened at {}", path.display());

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_records(tokio::fs::File::from_std(file), rx));
        Ok(Self { tx, writer })
    }

    /// Stop accepting records and wait until everything queued is written.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.writer.await {
            warn!("Command log writer ended abnormally: {}", e);
        }
    }
}

impl OpLog for FileOpLog {
    fn record(&self, command: &Command) {
        if self.tx.send(OpRecord::now(command.clone())).is_err() {
            warn!("Command log writer is gone; dropping record for {}", command);
        }
    }
}

async fn write_records(mut file: tokio::fs::File, mut rx: mpsc::UnboundedReceiver<OpRecord>) {
    while let Some(record) = rx.recv().await {
        let mut line = match serde_json::to_vec(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!("Could not encode command log record: {}", e);
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = file.write_all(&line).await {
            warn!("Command log write failed: {}", e);
        }
    }
    if let Err(e) = file.flush().await {
        warn!("Command log flush failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_are_appended_after_header() {
        let name = format!("shardcache-oplog-{}.jsonl", std::process::id());
        let path = std::env::temp_dir().join(name);
        let log = FileOpLog::open(
            &path,
            LogHeader {
                virtual_replicas: 5,
                expire_secs: 0,
            },
        )
        .unwrap();

        log.record(&Command::set("x", 1i64).unwrap());
        log.record(&Command::get("x").unwrap());
        log.close().await;

        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("\"virtual_replicas\":5"));
        assert!(lines[1].contains("\"Set\""));
        assert!(lines[2].contains("\"Get\""));
    }

    #[test]
    fn test_null_log_accepts_anything() {
        NullOpLog.record(&Command::delete("k").unwrap());
    }
}
