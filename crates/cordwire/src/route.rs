//! Route keys and the commands addressed through them.
//!
//! A route key names the rate-limit bucket a command counts against. REST
//! paths are normalized so that requests differing only in minor parameters
//! (message ids, emoji) share a bucket, while major parameters (channel,
//! guild and webhook ids) keep their own bucket, matching how the remote
//! service partitions its limits.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder for a minor id segment.
const ID_PLACEHOLDER: &str = ":id";

/// Placeholder for a reaction emoji segment.
const EMOJI_PLACEHOLDER: &str = ":emoji";

/// Resources whose id is a major parameter.
const MAJOR_RESOURCES: &[&str] = &["channels", "guilds", "webhooks"];

/// HTTP method of a REST command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET.
    Get,
    /// POST.
    Post,
    /// PUT.
    Put,
    /// PATCH.
    Patch,
    /// DELETE.
    Delete,
}

impl Method {
    /// Uppercase method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a rate-limit bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteKey {
    /// A REST route: method plus normalized path pattern.
    Rest {
        /// HTTP method.
        method: Method,
        /// Normalized path pattern.
        pattern: String,
    },
    /// A command sent over the gateway session, keyed by opcode.
    Gateway {
        /// Gateway opcode.
        op: u8,
    },
}

impl RouteKey {
    /// Build the key for a REST request, normalizing its path.
    #[must_use]
    pub fn rest(method: Method, path: &str) -> Self {
        Self::Rest {
            method,
            pattern: normalize_path(path),
        }
    }

    /// Build the key for a gateway command.
    #[must_use]
    pub const fn gateway(op: u8) -> Self {
        Self::Gateway { op }
    }

    /// Whether this route is served by the gateway session.
    #[must_use]
    pub const fn is_gateway(&self) -> bool {
        matches!(self, Self::Gateway { .. })
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rest { method, pattern } => write!(f, "{method} {pattern}"),
            Self::Gateway { op } => write!(f, "gateway op {op}"),
        }
    }
}

/// Normalize a request path into a bucket pattern.
///
/// Query strings are dropped, ids following a major resource are kept,
/// other numeric segments become `:id` and reaction emoji become `:emoji`.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let mut out = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        let previous = i.checked_sub(1).map(|p| segments[p]);
        let normalized = match previous {
            Some(resource) if MAJOR_RESOURCES.contains(&resource) => (*segment).to_string(),
            Some("reactions") => EMOJI_PLACEHOLDER.to_string(),
            _ if is_id(segment) => ID_PLACEHOLDER.to_string(),
            _ => (*segment).to_string(),
        };
        out.push(normalized);
    }

    format!("/{}", out.join("/"))
}

fn is_id(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// A REST request.
#[derive(Debug, Clone, PartialEq)]
pub struct RestCommand {
    /// HTTP method.
    pub method: Method,
    /// Concrete path, relative to the API base URL.
    pub path: String,
    /// Optional JSON body.
    pub body: Option<Value>,
}

/// A command sent over the gateway session.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayCommand {
    /// Gateway opcode.
    pub op: u8,
    /// Command payload (`d` field).
    pub data: Value,
}

/// An outbound command, the payload of a pending request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// REST request.
    Rest(RestCommand),
    /// Gateway command.
    Gateway(GatewayCommand),
}

impl Command {
    /// A REST request without a body.
    #[must_use]
    pub fn rest(method: Method, path: impl Into<String>) -> Self {
        Self::Rest(RestCommand {
            method,
            path: path.into(),
            body: None,
        })
    }

    /// A REST request with a JSON body.
    #[must_use]
    pub fn rest_json(method: Method, path: impl Into<String>, body: Value) -> Self {
        Self::Rest(RestCommand {
            method,
            path: path.into(),
            body: Some(body),
        })
    }

    /// A gateway command.
    #[must_use]
    pub const fn gateway(op: u8, data: Value) -> Self {
        Self::Gateway(GatewayCommand { op, data })
    }

    /// The bucket this command counts against.
    #[must_use]
    pub fn route(&self) -> RouteKey {
        match self {
            Self::Rest(rest) => RouteKey::rest(rest.method, &rest.path),
            Self::Gateway(gateway) => RouteKey::gateway(gateway.op),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("/channels/111/messages", "/channels/111/messages" ; "major channel id kept")]
    #[test_case("/channels/111/messages/222", "/channels/111/messages/:id" ; "minor message id replaced")]
    #[test_case("/guilds/333/members/444", "/guilds/333/members/:id" ; "guild member")]
    #[test_case("/webhooks/555/sometoken", "/webhooks/555/sometoken" ; "webhook id kept")]
    #[test_case("/channels/1/messages/2/reactions/%F0%9F%91%8D/@me", "/channels/1/messages/:id/reactions/:emoji/@me" ; "reaction emoji")]
    #[test_case("/users/@me", "/users/@me" ; "no ids")]
    #[test_case("gateway/bot", "/gateway/bot" ; "leading slash added")]
    #[test_case("/channels/111/messages?limit=50", "/channels/111/messages" ; "query dropped")]
    fn test_normalize_path(input: &str, expected: &str) {
        assert_eq!(normalize_path(input), expected);
    }

    #[test]
    fn test_same_bucket_for_different_messages() {
        let a = Command::rest(Method::Patch, "/channels/1/messages/10").route();
        let b = Command::rest(Method::Patch, "/channels/1/messages/20").route();
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_bucket_for_different_channels() {
        let a = Command::rest(Method::Post, "/channels/1/messages").route();
        let b = Command::rest(Method::Post, "/channels/2/messages").route();
        assert_ne!(a, b);
    }

    #[test]
    fn test_method_is_part_of_key() {
        let get = RouteKey::rest(Method::Get, "/channels/1/messages");
        let post = RouteKey::rest(Method::Post, "/channels/1/messages");
        assert_ne!(get, post);
    }

    #[test]
    fn test_gateway_route() {
        let cmd = Command::gateway(3, serde_json::json!({"status": "online"}));
        let route = cmd.route();
        assert!(route.is_gateway());
        assert_eq!(route.to_string(), "gateway op 3");
    }

    #[test]
    fn test_rest_route_display() {
        let route = RouteKey::rest(Method::Delete, "/channels/9/messages/8");
        assert_eq!(route.to_string(), "DELETE /channels/9/messages/:id");
    }
}
