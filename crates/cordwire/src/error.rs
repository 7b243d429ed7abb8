//! Error types for cordwire.

use std::time::Duration;

use thiserror::Error;

use crate::entity::ChannelKind;

/// Errors surfaced to callers of the client.
///
/// Over-limit responses never appear here: the ratelimit scheduler retries
/// them transparently.
#[derive(Debug, Error)]
pub enum CordError {
    /// The command transport failed (connection reset, malformed response).
    #[error("transport failed: {0}")]
    Transport(String),

    /// The remote API answered with a non-success status.
    #[error("request failed with status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The request was canceled before it was dispatched.
    #[error("request canceled")]
    Canceled,

    /// The caller stopped waiting for a completion.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The gateway session misbehaved (bad frame, unexpected opcode).
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Reconnect attempts were exhausted.
    #[error("gave up reconnecting: {attempts} attempts within {window:?}")]
    FatalDisconnect {
        /// Attempts recorded inside the window when the policy refused.
        attempts: usize,
        /// The configured window.
        window: Duration,
    },

    /// An operation needed a live gateway session.
    #[error("not connected to the gateway")]
    NotConnected,

    /// A channel was addressed through an accessor for a different kind.
    #[error("channel {id} is a {actual} channel, expected {expected}")]
    ChannelKind {
        /// The channel id.
        id: u64,
        /// The kind the caller asked for.
        expected: ChannelKind,
        /// The kind the channel actually has.
        actual: ChannelKind,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to encode or decode a payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cordwire operations.
pub type CordResult<T> = Result<T, CordError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = CordError::Transport("connection reset".to_string());
        assert_eq!(err.to_string(), "transport failed: connection reset");
    }

    #[test]
    fn test_status_error_display() {
        let err = CordError::Status {
            status: 403,
            message: "Missing Access".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "request failed with status 403: Missing Access"
        );
    }

    #[test]
    fn test_fatal_disconnect_display() {
        let err = CordError::FatalDisconnect {
            attempts: 6,
            window: Duration::from_secs(300),
        };
        assert_eq!(
            err.to_string(),
            "gave up reconnecting: 6 attempts within 300s"
        );
    }

    #[test]
    fn test_channel_kind_display() {
        let err = CordError::ChannelKind {
            id: 42,
            expected: ChannelKind::ServerVoice,
            actual: ChannelKind::Private,
        };
        assert_eq!(
            err.to_string(),
            "channel 42 is a private channel, expected server voice"
        );
    }

    #[test]
    fn test_serialization_from() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: CordError = json_err.into();
        assert!(matches!(err, CordError::Serialization(_)));
    }
}
