//! Gateway wire frames.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{CordError, CordResult};
use crate::presence::Presence;

/// Opcodes of the gateway protocol.
pub mod op {
    /// Server event (`t` names it).
    pub const DISPATCH: u8 = 0;
    /// Keepalive, both directions.
    pub const HEARTBEAT: u8 = 1;
    /// Start a new session.
    pub const IDENTIFY: u8 = 2;
    /// Change the bot's presence.
    pub const PRESENCE_UPDATE: u8 = 3;
    /// Continue a dropped session.
    pub const RESUME: u8 = 6;
    /// Server asks the client to reconnect.
    pub const RECONNECT: u8 = 7;
    /// The session is invalid.
    pub const INVALID_SESSION: u8 = 9;
    /// First frame after the transport opens; carries the heartbeat interval.
    pub const HELLO: u8 = 10;
    /// Acknowledges a heartbeat.
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Dispatch acknowledging an identify.
pub const EVENT_READY: &str = "READY";

/// Dispatch acknowledging a resume.
pub const EVENT_RESUMED: &str = "RESUMED";

/// One frame on the gateway socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayFrame {
    /// Opcode.
    pub op: u8,
    /// Payload.
    #[serde(default)]
    pub d: Value,
    /// Sequence number, on dispatches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    /// Event name, on dispatches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayFrame {
    /// A frame with no sequence or event name.
    #[must_use]
    pub const fn new(op: u8, d: Value) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }

    /// A dispatch frame.
    #[must_use]
    pub fn dispatch(event: impl Into<String>, seq: u64, d: Value) -> Self {
        Self {
            op: op::DISPATCH,
            d,
            s: Some(seq),
            t: Some(event.into()),
        }
    }

    /// Heartbeat carrying the last sequence seen.
    #[must_use]
    pub fn heartbeat(seq: Option<u64>) -> Self {
        Self::new(op::HEARTBEAT, seq.map_or(Value::Null, Value::from))
    }

    /// Identify for a fresh session.
    #[must_use]
    pub fn identify(token: &str, intents: u64, presence: &Presence) -> Self {
        Self::new(
            op::IDENTIFY,
            json!({
                "token": token,
                "intents": intents,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "cordwire",
                    "device": "cordwire",
                },
                "presence": presence.to_payload(),
            }),
        )
    }

    /// Resume of an existing session.
    #[must_use]
    pub fn resume(token: &str, session_id: &str, seq: Option<u64>) -> Self {
        Self::new(
            op::RESUME,
            json!({
                "token": token,
                "session_id": session_id,
                "seq": seq,
            }),
        )
    }

    /// Presence update.
    #[must_use]
    pub fn presence_update(presence: &Presence) -> Self {
        Self::new(op::PRESENCE_UPDATE, presence.to_payload())
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`CordError::Serialization`] for malformed JSON.
    pub fn from_json(text: &str) -> CordResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`CordError::Serialization`] if the payload cannot be encoded.
    pub fn to_json(&self) -> CordResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The heartbeat interval announced by a hello frame.
    ///
    /// # Errors
    ///
    /// Returns [`CordError::Gateway`] if this is not a hello or the interval
    /// is missing or zero.
    pub fn heartbeat_interval(&self) -> CordResult<Duration> {
        if self.op != op::HELLO {
            return Err(CordError::Gateway(format!(
                "expected hello, got op {}",
                self.op
            )));
        }
        self.d
            .get("heartbeat_interval")
            .and_then(Value::as_u64)
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
            .ok_or_else(|| CordError::Gateway("hello without heartbeat interval".to_string()))
    }

    /// Whether this is the named dispatch.
    #[must_use]
    pub fn is_event(&self, name: &str) -> bool {
        self.op == op::DISPATCH && self.t.as_deref() == Some(name)
    }
}
