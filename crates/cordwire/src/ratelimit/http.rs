//! HTTP command transport for the REST API.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::header::{AUTHORIZATION, HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::time::Instant;
use tracing::trace;
use url::Url;

use crate::error::{CordError, CordResult};
use crate::ratelimit::transport::{
    CommandResponse, CommandTransport, MAX_RATELIMIT_DELAY, RatelimitHeaders, TransportError,
};
use crate::route::{Command, Method, RestCommand, RouteKey};

/// Requests left in the bucket.
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
/// Bucket size.
pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
/// Seconds until the bucket resets, possibly fractional.
pub const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";
/// Present and `true` when the service-wide limit applies.
pub const HEADER_GLOBAL: &str = "x-ratelimit-global";

/// Used when an over-limit response carries no usable delay.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Sends REST commands with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base: Url,
    authorization: String,
}

impl HttpTransport {
    /// Create a transport for the API at `base_url`, authenticating with the
    /// `Bot`-prefixed `authorization` value.
    ///
    /// # Errors
    ///
    /// Returns [`CordError::Config`] for an invalid base URL and
    /// [`CordError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        authorization: impl Into<String>,
        timeout: Duration,
    ) -> CordResult<Self> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)
            .map_err(|e| CordError::Config(format!("invalid api base url {base_url}: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CordError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base,
            authorization: authorization.into(),
        })
    }

    /// Absolute URL for a path relative to the API base.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be joined onto the base URL.
    pub fn url_for(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base.join(path.trim_start_matches('/'))
    }

    async fn execute(&self, rest: &RestCommand) -> Result<CommandResponse, TransportError> {
        let url = self
            .url_for(&rest.path)
            .map_err(|e| TransportError::Failed(format!("bad path {}: {e}", rest.path)))?;

        let mut request = self
            .client
            .request(to_reqwest(rest.method), url)
            .header(AUTHORIZATION, &self.authorization);
        if let Some(body) = &rest.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))?;
        let now = Instant::now();

        trace!(status = status.as_u16(), path = %rest.path, "response received");

        // Error pages from proxies are not JSON; keep them as text.
        let body = (!bytes.is_empty()).then(|| {
            serde_json::from_slice::<Value>(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        });

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(too_many_requests(&headers, body.as_ref()));
        }

        Ok(CommandResponse {
            status: status.as_u16(),
            body,
            ratelimit: parse_ratelimit_headers(&headers, now),
        })
    }
}

impl CommandTransport for HttpTransport {
    fn send<'a>(
        &'a self,
        _route: &'a RouteKey,
        command: &'a Command,
    ) -> BoxFuture<'a, Result<CommandResponse, TransportError>> {
        Box::pin(async move {
            match command {
                Command::Rest(rest) => self.execute(rest).await,
                Command::Gateway(gateway) => Err(TransportError::Failed(format!(
                    "gateway op {} cannot be sent over http",
                    gateway.op
                ))),
            }
        })
    }
}

const fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// A non-negative number of seconds, clamped to [`MAX_RATELIMIT_DELAY`].
fn seconds(value: f64) -> Option<Duration> {
    if value.is_nan() || value < 0.0 {
        return None;
    }
    Some(Duration::try_from_secs_f64(value).map_or(MAX_RATELIMIT_DELAY, |delay| {
        delay.min(MAX_RATELIMIT_DELAY)
    }))
}

/// Read the rate-limit headers of a response received at `now`.
///
/// Missing or unparsable headers leave the matching field unknown.
#[must_use]
pub fn parse_ratelimit_headers(headers: &HeaderMap, now: Instant) -> RatelimitHeaders {
    RatelimitHeaders {
        remaining: header_str(headers, HEADER_REMAINING).and_then(|v| v.parse().ok()),
        limit: header_str(headers, HEADER_LIMIT).and_then(|v| v.parse().ok()),
        reset_at: header_str(headers, HEADER_RESET_AFTER)
            .and_then(|v| v.parse::<f64>().ok())
            .and_then(seconds)
            .and_then(|after| now.checked_add(after)),
        global: header_str(headers, HEADER_GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true")),
    }
}

/// Build the over-limit error for a 429 response.
///
/// The body's `retry_after` (seconds) wins over the `Retry-After` header.
#[must_use]
pub fn too_many_requests(headers: &HeaderMap, body: Option<&Value>) -> TransportError {
    let from_body = body
        .and_then(|b| b.get("retry_after"))
        .and_then(Value::as_f64)
        .and_then(seconds);
    let from_header = header_str(headers, RETRY_AFTER.as_str())
        .and_then(|v| v.parse::<f64>().ok())
        .and_then(seconds);

    let global = header_str(headers, HEADER_GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true"))
        || body
            .and_then(|b| b.get("global"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

    TransportError::TooManyRequests {
        retry_after: from_body.or(from_header).unwrap_or(DEFAULT_RETRY_AFTER),
        global,
    }
}
