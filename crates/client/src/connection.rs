//! Connection state and lock-free observation.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle of the single stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No credential, or explicitly torn down. Nothing pending.
    Idle,
    /// Streaming request issued, not yet confirmed by the server.
    Connecting,
    /// Server sent the confirmation marker.
    Open,
    /// Waiting on the single retry timer.
    ReconnectPending,
}

impl ConnectionState {
    /// Convert to u8 for atomic storage.
    pub fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Idle => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Open => 2,
            ConnectionState::ReconnectPending => 3,
        }
    }

    /// Convert from u8 (atomic storage).
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Open,
            3 => ConnectionState::ReconnectPending,
            _ => ConnectionState::Idle,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::ReconnectPending => "reconnect_pending",
        };
        f.write_str(name)
    }
}

/// Observable connection state for UI binding.
///
/// Reads the state the transport manager publishes without taking its lock.
/// Multiple observers can share the same underlying state.
#[derive(Clone)]
pub struct ConnectionStateObserver {
    state: Arc<AtomicU8>,
}

impl ConnectionStateObserver {
    pub fn new(state: Arc<AtomicU8>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }
}

impl fmt::Debug for ConnectionStateObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStateObserver")
            .field("state", &self.state())
            .finish()
    }
}

/// Publish a new state to observers.
pub(crate) fn publish_state(state_ref: &AtomicU8, new_state: ConnectionState) {
    state_ref.store(new_state.to_u8(), Ordering::SeqCst);
}
