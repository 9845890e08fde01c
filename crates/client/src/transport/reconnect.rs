// Connection lifecycle of one room session.
//
// idle -> connecting -> open-unsynced -> synced -> closed -> backoff -> connecting
//
// Any state may jump to closed on teardown. The current state is published
// on a watch channel so callers can observe it continuously.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use crate::config::DEFAULT_RECONNECT_BACKOFF_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    /// Transport open, handshake not finished.
    OpenUnsynced,
    Synced,
    Closed,
    Backoff,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::OpenUnsynced => "open-unsynced",
            Self::Synced => "synced",
            Self::Closed => "closed",
            Self::Backoff => "backoff",
        }
    }

    fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, OpenUnsynced)
                | (OpenUnsynced, Synced)
                | (Closed, Backoff)
                | (Backoff, Connecting)
                | (Idle | Connecting | OpenUnsynced | Synced | Backoff, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid connection transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Reconnection parameters. The interval is fixed; attempts never stop while
/// the room is open locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { interval: Duration::from_millis(DEFAULT_RECONNECT_BACKOFF_MS) }
    }
}

impl ReconnectPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self { interval }
    }
}

#[derive(Debug)]
pub struct ConnectionMachine {
    state: watch::Sender<ConnectionState>,
    attempts: u64,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMachine {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self { state, attempts: 0 }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Number of times `connecting` has been entered.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn transition(&mut self, next: ConnectionState) -> Result<(), InvalidTransition> {
        let current = self.state();
        if !current.can_transition_to(next) {
            return Err(InvalidTransition { from: current, to: next });
        }
        if next == ConnectionState::Connecting {
            self.attempts += 1;
        }
        debug!(from = %current, to = %next, "connection state");
        self.state.send_replace(next);
        Ok(())
    }

    /// Move to `closed` from wherever the machine is. No-op when already closed.
    pub fn close(&mut self) {
        if self.state() != ConnectionState::Closed {
            debug!(from = %self.state(), "connection closed");
            self.state.send_replace(ConnectionState::Closed);
        }
    }
}
