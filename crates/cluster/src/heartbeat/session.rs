//! Per-node probing state machine.

use std::fmt;

/// Result of one probe round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The node echoed the heartbeat token.
    Acked,
    /// The node answered with something other than the token.
    Garbled,
    /// No answer within the probe timeout.
    TimedOut,
    /// The probe could not be written (connection closed).
    SendFailed,
    /// Reading the answer failed for a reason other than the timeout.
    ReceiveFailed,
}

impl ProbeOutcome {
    pub fn is_ack(self) -> bool {
        matches!(self, ProbeOutcome::Acked)
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProbeOutcome::Acked => "acknowledged",
            ProbeOutcome::Garbled => "garbled acknowledgement",
            ProbeOutcome::TimedOut => "timed out",
            ProbeOutcome::SendFailed => "send failed",
            ProbeOutcome::ReceiveFailed => "receive failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Probing,
    /// Terminal.
    Dead,
}

/// Consecutive-miss counter with a dead threshold.
#[derive(Debug, Clone)]
pub struct HeartbeatSession {
    misses: u32,
    threshold: u32,
    state: SessionState,
}

impl HeartbeatSession {
    pub fn new(threshold: u32) -> Self {
        Self {
            misses: 0,
            threshold: threshold.max(1),
            state: SessionState::Probing,
        }
    }

    /// Fold one probe result into the session.
    ///
    /// An acknowledgement resets the counter; anything else increments it.
    /// Once dead, further outcomes are ignored.
    pub fn record(&mut self, outcome: ProbeOutcome) -> SessionState {
        if self.state == SessionState::Dead {
            return self.state;
        }
        if outcome.is_ack() {
            self.misses = 0;
        } else {
            self.misses += 1;
            if self.misses >= self.threshold {
                self.state = SessionState::Dead;
            }
        }
        self.state
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.misses
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_dead(&self) -> bool {
        self.state == SessionState::Dead
    }
}
