//! Connection lifecycle.
//!
//! DISCONNECTED → CONNECTING → HANDSHAKING → STREAMING → {CLOSED | FAILED}.
//! Any step may fail. A terminal state only leads back to DISCONNECTED when
//! reconnect is enabled.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Streaming,
    /// Ended locally (shutdown).
    Closed,
    /// Transport or handshake failure.
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn allows(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (_, Failed) | (_, Closed) => !self.is_terminal(),
            (Disconnected, Connecting) => true,
            (Connecting, Handshaking) => true,
            (Handshaking, Streaming) => true,
            (Closed | Failed, Disconnected) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Handshaking => "HANDSHAKING",
            ConnectionState::Streaming => "STREAMING",
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state plus transition logging.
#[derive(Debug)]
pub struct StateTracker {
    current: ConnectionState,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            current: ConnectionState::Disconnected,
        }
    }

    pub fn current(&self) -> ConnectionState {
        self.current
    }

    pub fn advance(&mut self, next: ConnectionState) {
        if !self.current.allows(next) {
            tracing::warn!(from = %self.current, to = %next, "unexpected session state transition");
        }
        match next {
            ConnectionState::Failed => {
                tracing::warn!(from = %self.current, "session state -> FAILED")
            }
            _ => tracing::info!(from = %self.current, to = %next, "session state"),
        }
        self.current = next;
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
