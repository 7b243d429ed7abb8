//! The command transport seam.

use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

use crate::route::{Command, RouteKey};

/// Longest wait honored from a rate-limit report; larger values are clamped.
pub const MAX_RATELIMIT_DELAY: Duration = Duration::from_secs(60 * 60);

/// Rate-limit information reported alongside a response.
///
/// Every field is optional: routes the remote service does not limit carry
/// no headers, and the bucket then stays in its "unknown" state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RatelimitHeaders {
    /// Requests left in the current window.
    pub remaining: Option<u32>,
    /// Size of the window.
    pub limit: Option<u32>,
    /// When the window resets.
    pub reset_at: Option<Instant>,
    /// The limit reported is the service-wide one.
    pub global: bool,
}

impl RatelimitHeaders {
    /// Headers for a bucket with `remaining` of `limit` left until `reset_at`.
    #[must_use]
    pub const fn new(remaining: u32, limit: u32, reset_at: Instant) -> Self {
        Self {
            remaining: Some(remaining),
            limit: Some(limit),
            reset_at: Some(reset_at),
            global: false,
        }
    }
}

/// A completed exchange with the remote API.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    /// HTTP-style status code.
    pub status: u16,
    /// Decoded body, if any.
    pub body: Option<Value>,
    /// Rate-limit state reported by the server.
    pub ratelimit: RatelimitHeaders,
}

impl CommandResponse {
    /// A 200 response with no body and no rate-limit information.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            status: 200,
            body: None,
            ratelimit: RatelimitHeaders {
                remaining: None,
                limit: None,
                reset_at: None,
                global: false,
            },
        }
    }

    /// Attach rate-limit headers.
    #[must_use]
    pub const fn with_ratelimit(mut self, ratelimit: RatelimitHeaders) -> Self {
        self.ratelimit = ratelimit;
        self
    }

    /// Attach a body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// A short description of a failed response, for error reporting.
    #[must_use]
    pub fn failure_message(&self) -> String {
        match &self.body {
            Some(Value::Object(map)) => map
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| Value::Object(map.clone()).to_string(), str::to_string),
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

/// Ways a transport exchange can fail.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The server refused the request for exceeding a limit.
    #[error("too many requests, retry after {retry_after:?} (global: {global})")]
    TooManyRequests {
        /// How long to wait before retrying.
        retry_after: Duration,
        /// Whether the service-wide limit was hit.
        global: bool,
    },

    /// Any other failure: connection reset, malformed response, ...
    #[error("transport failed: {0}")]
    Failed(String),
}

/// Performs the network call for one command.
///
/// Implementations must report over-limit responses as
/// [`TransportError::TooManyRequests`], never as a generic failure.
pub trait CommandTransport: Send + Sync {
    /// Send `command`, which counts against `route`.
    fn send<'a>(
        &'a self,
        route: &'a RouteKey,
        command: &'a Command,
    ) -> BoxFuture<'a, Result<CommandResponse, TransportError>>;
}
