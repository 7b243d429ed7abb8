//! Connection state types.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// State of the gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected, and not trying to be.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, waiting for the identify to be acknowledged.
    Identifying,
    /// Session established.
    Connected,
    /// Resume sent, waiting for it to be acknowledged.
    Resuming,
    /// Connection lost with a session; about to reopen and resume.
    Reconnecting,
    /// Reconnect attempts exhausted. Terminal until an explicit connect.
    FatallyDisconnected,
}

impl ConnectionState {
    const ALL: [Self; 7] = [
        Self::Disconnected,
        Self::Connecting,
        Self::Identifying,
        Self::Connected,
        Self::Resuming,
        Self::Reconnecting,
        Self::FatallyDisconnected,
    ];

    /// Lower-case name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Identifying => "identifying",
            Self::Connected => "connected",
            Self::Resuming => "resuming",
            Self::Reconnecting => "reconnecting",
            Self::FatallyDisconnected => "fatally_disconnected",
        }
    }

    /// Whether the controller is working towards a session.
    #[must_use]
    pub const fn is_establishing(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Identifying | Self::Resuming | Self::Reconnecting
        )
    }

    /// Whether a run loop can be started from this state.
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Disconnected | Self::FatallyDisconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic wrapper for connection state.
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU32);

impl AtomicConnectionState {
    /// Create a new atomic state.
    #[must_use]
    pub const fn new(state: ConnectionState) -> Self {
        Self(AtomicU32::new(state as u32))
    }

    /// Load the current state.
    #[must_use]
    pub fn load(&self) -> ConnectionState {
        let raw = self.0.load(Ordering::SeqCst) as usize;
        ConnectionState::ALL
            .get(raw)
            .copied()
            .unwrap_or(ConnectionState::FatallyDisconnected)
    }

    /// Store a new state, returning the previous one.
    pub fn swap(&self, state: ConnectionState) -> ConnectionState {
        let raw = self.0.swap(state as u32, Ordering::SeqCst) as usize;
        ConnectionState::ALL
            .get(raw)
            .copied()
            .unwrap_or(ConnectionState::FatallyDisconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminants_match_table() {
        for (i, state) in ConnectionState::ALL.iter().enumerate() {
            assert_eq!(*state as usize, i);
        }
    }

    #[test]
    fn test_atomic_connection_state() {
        let state = AtomicConnectionState::new(ConnectionState::Disconnected);
        assert_eq!(state.load(), ConnectionState::Disconnected);

        assert_eq!(
            state.swap(ConnectionState::Connecting),
            ConnectionState::Disconnected
        );
        assert_eq!(state.load(), ConnectionState::Connecting);

        state.swap(ConnectionState::Resuming);
        assert_eq!(state.load(), ConnectionState::Resuming);
    }

    #[test]
    fn test_state_classification() {
        assert!(ConnectionState::Disconnected.is_idle());
        assert!(ConnectionState::FatallyDisconnected.is_idle());
        assert!(!ConnectionState::Connected.is_idle());
        assert!(ConnectionState::Reconnecting.is_establishing());
        assert!(!ConnectionState::Connected.is_establishing());
        assert_eq!(
            ConnectionState::FatallyDisconnected.to_string(),
            "fatally_disconnected"
        );
    }
}
