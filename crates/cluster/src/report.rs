//! Handoff of dead-node reports from the health monitor to an aggregator.
//!
//! Delivery is at-least-once: the monitor keeps a node on its unhealthy list
//! until a sink acknowledges it, and may deliver the same id again after a
//! failed attempt. Sinks must therefore treat a repeated id as a no-op.

use crate::error::{ClusterError, Result};
use async_trait::async_trait;
use corelib::NodeId;
use std::sync::Arc;
use tokio::sync::mpsc;

#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Hand over a batch of dead nodes.
    ///
    /// `Ok(true)` acknowledges the whole batch. `Ok(false)` and `Err` both
    /// leave it with the sender for the next attempt.
    async fn deliver(&self, dead: &[NodeId]) -> Result<bool>;
}

#[async_trait]
impl ReportSink for mpsc::Sender<Vec<NodeId>> {
    async fn deliver(&self, dead: &[NodeId]) -> Result<bool> {
        self.send(dead.to_vec())
            .await
            .map(|_| true)
            .map_err(|_| ClusterError::ReportDelivery("report receiver dropped".to_string()))
    }
}

#[async_trait]
impl<T: ReportSink + ?Sized> ReportSink for Arc<T> {
    async fn deliver(&self, dead: &[NodeId]) -> Result<bool> {
        (**self).deliver(dead).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_acknowledges() {
        let (tx, mut rx) = mpsc::channel(4);
        assert!(tx.deliver(&[NodeId(1), NodeId(2)]).await.unwrap());
        assert_eq!(rx.recv().await, Some(vec![NodeId(1), NodeId(2)]));
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel::<Vec<NodeId>>(1);
        drop(rx);
        assert!(matches!(
            tx.deliver(&[NodeId(1)]).await,
            Err(ClusterError::ReportDelivery(_))
        ));
    }
}
