//! Gateway event types.

use std::time::Duration;

use serde_json::Value;

/// Events published by the connection controller, in receipt order.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// A new session was established.
    Ready {
        /// Session id.
        session_id: String,
    },
    /// A dropped session was resumed.
    Resumed,
    /// The connection was lost and is being re-established.
    Reconnecting {
        /// Why the previous connection ended.
        reason: String,
        /// Delay before the next attempt.
        delay: Duration,
        /// Whether the session will be resumed.
        resume: bool,
    },
    /// A server event.
    Dispatch {
        /// Event name.
        name: String,
        /// Sequence number.
        seq: Option<u64>,
        /// Event payload.
        data: Value,
    },
    /// The connection was closed on request.
    Disconnected,
    /// Reconnect attempts were exhausted.
    FatallyDisconnected {
        /// Attempts inside the window when the policy refused.
        attempts: usize,
        /// The policy window.
        window: Duration,
    },
}

impl GatewayEvent {
    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Resumed => "resumed",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Dispatch { name, .. } => name,
            Self::Disconnected => "disconnected",
            Self::FatallyDisconnected { .. } => "fatally_disconnected",
        }
    }

    /// Whether the client will not reconnect by itself after this event.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::FatallyDisconnected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind() {
        let dispatch = GatewayEvent::Dispatch {
            name: "MESSAGE_CREATE".to_string(),
            seq: Some(3),
            data: Value::Null,
        };
        assert_eq!(dispatch.kind(), "MESSAGE_CREATE");
        assert_eq!(GatewayEvent::Resumed.kind(), "resumed");
    }

    #[test]
    fn test_terminal_events() {
        assert!(GatewayEvent::Disconnected.is_terminal());
        assert!(
            GatewayEvent::FatallyDisconnected {
                attempts: 6,
                window: Duration::from_secs(300),
            }
            .is_terminal()
        );
        assert!(
            !GatewayEvent::Reconnecting {
                reason: "heartbeat missed".to_string(),
                delay: Duration::ZERO,
                resume: true,
            }
            .is_terminal()
        );
    }
}
