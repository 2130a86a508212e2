//! Framed connection over any byte stream.
//!
//! Request/response only: a caller writes one frame and reads one frame
//! back. Frames are read through [`Framed`], so abandoning a read on timeout
//! never loses bytes already received.
//!
//! A command whose reply did not arrive in time still owes that reply. The
//! connection counts owed replies and discards them before the next command
//! is sent, so a late reply is never handed to a later caller. Only transport
//! failures, corrupt frames or a write abandoned half way leave it broken.

use crate::codec::FrameCodec;
use crate::error::{Result, WireError};
use crate::protocol::{Command, Reply, Request, HEARTBEAT_TOKEN};
use bytes::Bytes;
use corelib::NodeId;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::codec::Framed;
use tracing::{debug, trace};

pub struct Connection<S = TcpStream> {
    framed: Framed<S, FrameCodec>,
    /// Replies owed by the peer for commands that timed out.
    pending: usize,
    broken: bool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, codec: FrameCodec) -> Self {
        Self {
            framed: Framed::new(stream, codec),
            pending: 0,
            broken: false,
        }
    }

    /// True once a transport failure or a corrupt frame has made the stream
    /// unusable.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Replies still expected for commands that timed out.
    pub fn pending_replies(&self) -> usize {
        self.pending
    }

    pub fn get_ref(&self) -> &S {
        self.framed.get_ref()
    }

    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.ensure_usable()?;
        let sent = self.framed.send(Bytes::copy_from_slice(payload)).await;
        self.track(sent)?;
        trace!(len = payload.len(), "frame written");
        Ok(())
    }

    /// Read one complete frame. Cancel safe.
    pub async fn read_frame(&mut self) -> Result<Bytes> {
        self.ensure_usable()?;
        // EOF, either cleanly between frames or in the middle of one.
        let frame = self.framed.next().await.unwrap_or(Err(WireError::Closed));
        let frame = self.track(frame)?;
        trace!(len = frame.len(), "frame read");
        Ok(frame)
    }

    pub async fn send_command(&mut self, cmd: &Command) -> Result<()> {
        let payload = bincode::serialize(cmd)?;
        self.write_frame(&payload).await
    }

    pub async fn receive_reply(&mut self) -> Result<Reply> {
        let frame = self.read_frame().await?;
        Ok(bincode::deserialize(&frame)?)
    }

    /// Send `cmd` and wait at most `limit` for its reply.
    ///
    /// Replies still owed for earlier timed-out commands are drained first,
    /// within the same `limit`. Timing out while waiting leaves the
    /// connection usable; timing out in the middle of a write does not.
    pub async fn round_trip(&mut self, cmd: &Command, limit: Duration) -> Result<Reply> {
        self.ensure_usable()?;
        let deadline = Instant::now() + limit;

        while self.pending > 0 {
            match timeout_at(deadline, self.read_frame()).await {
                Ok(frame) => {
                    frame?;
                    self.pending -= 1;
                    debug!(owed = self.pending, "discarded late reply");
                }
                Err(_) => return Err(WireError::Timeout(limit)),
            }
        }

        match timeout_at(deadline, self.send_command(cmd)).await {
            Ok(sent) => sent?,
            Err(_) => {
                self.broken = true;
                return Err(WireError::Timeout(limit));
            }
        }

        self.pending += 1;
        match timeout_at(deadline, self.receive_reply()).await {
            Ok(reply) => {
                self.pending -= 1;
                reply
            }
            Err(_) => Err(WireError::Timeout(limit)),
        }
    }

    /// Registration handshake: tell a backend which id it was assigned, or
    /// tell the health monitor which id this backend carries.
    pub async fn send_node_id(&mut self, id: NodeId) -> Result<()> {
        let payload = bincode::serialize(&id)?;
        self.write_frame(&payload).await
    }

    pub async fn receive_node_id(&mut self) -> Result<NodeId> {
        let frame = self.read_frame().await?;
        Ok(bincode::deserialize(&frame)?)
    }

    /// Write the heartbeat token, giving up after `limit`. A write abandoned
    /// half way leaves the stream unusable.
    pub async fn send_heartbeat(&mut self, limit: Duration) -> Result<()> {
        let outcome = timeout(limit, self.write_frame(HEARTBEAT_TOKEN)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                self.broken = true;
                Err(WireError::Timeout(limit))
            }
        }
    }

    /// Wait at most `limit` for one frame and report whether it is exactly
    /// the heartbeat token.
    ///
    /// A timeout does not break the connection: a late acknowledgement is
    /// indistinguishable from the next one and is consumed by the next probe.
    pub async fn receive_heartbeat(&mut self, limit: Duration) -> Result<bool> {
        let outcome = timeout(limit, self.read_frame()).await;
        match outcome {
            Ok(frame) => Ok(frame?.as_ref() == HEARTBEAT_TOKEN),
            Err(_) => Err(WireError::Timeout(limit)),
        }
    }

    /// Node side: next request, or `None` once the peer has gone away.
    pub async fn read_request(&mut self) -> Result<Option<Request>> {
        match self.read_frame().await {
            Ok(frame) => Request::from_payload(&frame).map(Some),
            Err(WireError::Closed) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn write_reply(&mut self, reply: &Reply) -> Result<()> {
        let payload = bincode::serialize(reply)?;
        self.write_frame(&payload).await
    }

    /// Node side: answer a heartbeat probe.
    pub async fn write_heartbeat(&mut self) -> Result<()> {
        self.write_frame(HEARTBEAT_TOKEN).await
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.broken {
            Err(WireError::Closed)
        } else {
            Ok(())
        }
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_transport()
                || matches!(e, WireError::BadHeader(_) | WireError::FrameTooLarge { .. })
            {
                self.broken = true;
            }
        }
        result
    }
}

/// Send one command over `conn`.
pub async fn send_command<S>(conn: &mut Connection<S>, cmd: &Command) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.send_command(cmd).await
}

/// Receive the reply to the last command sent over `conn`.
pub async fn receive_reply<S>(conn: &mut Connection<S>) -> Result<Reply>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.receive_reply().await
}
