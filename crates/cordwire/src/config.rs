//! Client configuration.
//!
//! Loaded from a JSON file; every section but the token has defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CordError, CordResult};
use crate::gateway::{
    DEFAULT_COMMAND_WINDOW, DEFAULT_COMMANDS_PER_WINDOW, DEFAULT_INITIAL_BACKOFF,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF, DEFAULT_WINDOW, ReconnectPolicy,
};
use crate::scheduler::DEFAULT_LANE_IDLE;

/// Default gateway endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// Default REST endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://discord.com/api/v6";

/// Reconnect ceiling and backoff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Attempts allowed per window. Opening a connection and identifying
    /// on it each count as one.
    pub max_attempts: usize,
    /// Window length in seconds.
    pub window_secs: u64,
    /// Delay before the second attempt in a window, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound for the delay, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            window_secs: DEFAULT_WINDOW.as_secs(),
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF.as_millis() as u64,
            max_backoff_ms: DEFAULT_MAX_BACKOFF.as_millis() as u64,
        }
    }
}

impl ReconnectConfig {
    /// Build the policy described by this section.
    #[must_use]
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(self.max_attempts, Duration::from_secs(self.window_secs)).with_backoff(
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

/// Budget for gateway commands such as presence updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PresenceLimitConfig {
    /// Commands per window.
    pub per_window: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl Default for PresenceLimitConfig {
    fn default() -> Self {
        Self {
            per_window: DEFAULT_COMMANDS_PER_WINDOW,
            window_secs: DEFAULT_COMMAND_WINDOW.as_secs(),
        }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bot token, without the `Bot ` prefix.
    pub token: String,
    /// Gateway websocket URL.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// REST API base URL.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Gateway intents bitfield.
    #[serde(default)]
    pub intents: u64,
    /// Reconnect ceiling.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Gateway command budget.
    #[serde(default)]
    pub presence_limit: PresenceLimitConfig,
    /// REST request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Idle time in seconds after which unused buckets are released.
    #[serde(default = "default_bucket_idle_secs")]
    pub bucket_idle_secs: u64,
    /// Idle time in seconds after which a serial task lane is released.
    #[serde(default = "default_lane_idle_secs")]
    pub lane_idle_secs: u64,
}

fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_bucket_idle_secs() -> u64 {
    300
}

const fn default_lane_idle_secs() -> u64 {
    DEFAULT_LANE_IDLE.as_secs()
}

impl ClientConfig {
    /// Configuration with defaults for everything but the token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            gateway_url: default_gateway_url(),
            api_base_url: default_api_base_url(),
            intents: 0,
            reconnect: ReconnectConfig::default(),
            presence_limit: PresenceLimitConfig::default(),
            request_timeout_secs: default_request_timeout_secs(),
            bucket_idle_secs: default_bucket_idle_secs(),
            lane_idle_secs: default_lane_idle_secs(),
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> CordResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CordError::Config(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> CordResult<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| CordError::Config(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as pretty JSON, e.g. to write a sample file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> CordResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> CordResult<()> {
        if self.token.trim().is_empty() {
            return Err(CordError::Config("token cannot be empty".to_string()));
        }

        if self.token.starts_with("Bot ") {
            return Err(CordError::Config(
                "token must not include the 'Bot ' prefix".to_string(),
            ));
        }

        if !self.gateway_url.starts_with("ws://") && !self.gateway_url.starts_with("wss://") {
            return Err(CordError::Config(
                "gateway_url must start with ws:// or wss://".to_string(),
            ));
        }

        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(CordError::Config(
                "api_base_url must start with http:// or https://".to_string(),
            ));
        }

        if self.reconnect.max_attempts == 0 {
            return Err(CordError::Config(
                "reconnect.max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.reconnect.window_secs == 0 {
            return Err(CordError::Config(
                "reconnect.window_secs must be greater than 0".to_string(),
            ));
        }

        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            return Err(CordError::Config(
                "reconnect.initial_backoff_ms cannot exceed reconnect.max_backoff_ms".to_string(),
            ));
        }

        if self.presence_limit.per_window == 0 || self.presence_limit.window_secs == 0 {
            return Err(CordError::Config(
                "presence_limit values must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(CordError::Config(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.bucket_idle_secs == 0 {
            return Err(CordError::Config(
                "bucket_idle_secs must be greater than 0".to_string(),
            ));
        }

        if self.lane_idle_secs == 0 {
            return Err(CordError::Config(
                "lane_idle_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// REST request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Idle time before unused buckets are released.
    #[must_use]
    pub const fn bucket_idle(&self) -> Duration {
        Duration::from_secs(self.bucket_idle_secs)
    }

    /// Idle time before a serial task lane is released.
    #[must_use]
    pub const fn lane_idle(&self) -> Duration {
        Duration::from_secs(self.lane_idle_secs)
    }

    /// Gateway command window.
    #[must_use]
    pub const fn presence_window(&self) -> Duration {
        Duration::from_secs(self.presence_limit.window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("failed to write temp file");
        file
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = ClientConfig::from_json(r#"{"token": "abc.def"}"#).unwrap();
        assert_eq!(config.token, "abc.def");
        assert_eq!(config.gateway_url, DEFAULT_GATEWAY_URL);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.window_secs, 300);
        assert_eq!(config.presence_limit.per_window, 5);
        assert_eq!(config.presence_limit.window_secs, 60);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.bucket_idle(), Duration::from_secs(300));
        assert_eq!(config.lane_idle(), DEFAULT_LANE_IDLE);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "token": "abc",
            "gateway_url": "ws://localhost:9000",
            "api_base_url": "http://localhost:9001/api",
            "intents": 513,
            "reconnect": {"max_attempts": 3, "window_secs": 60},
            "presence_limit": {"per_window": 2, "window_secs": 20},
            "request_timeout_secs": 10,
            "bucket_idle_secs": 120,
            "lane_idle_secs": 15
        }"#;
        let config = ClientConfig::from_json(json).unwrap();
        assert_eq!(config.intents, 513);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.initial_backoff_ms, 1000);
        assert_eq!(config.presence_window(), Duration::from_secs(20));
        assert_eq!(config.bucket_idle(), Duration::from_secs(120));
        assert_eq!(config.lane_idle(), Duration::from_secs(15));

        let policy = config.reconnect.policy();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.window(), Duration::from_secs(60));
    }

    #[test]
    fn test_from_file() {
        let file = create_temp_config(r#"{"token": "from-file"}"#);
        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.token, "from-file");
    }

    #[test]
    fn test_missing_file() {
        let err = ClientConfig::from_file("/nonexistent/cordwire.json").unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            ClientConfig::from_json("{"),
            Err(CordError::Config(_))
        ));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = ClientConfig::new("abc");
        assert!(config.validate().is_ok());

        config.token = "Bot abc".to_string();
        assert!(config.validate().is_err());

        let mut config = ClientConfig::new("abc");
        config.gateway_url = "https://gateway".to_string();
        assert!(config.validate().is_err());

        let mut config = ClientConfig::new("abc");
        config.reconnect.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::new("abc");
        config.reconnect.initial_backoff_ms = 60_000;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::new("abc");
        config.lane_idle_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::new("");
        config.token = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_round_trips() {
        let config = ClientConfig::new("sample-token");
        let json = config.to_json_pretty().unwrap();
        assert_eq!(ClientConfig::from_json(&json).unwrap(), config);
    }
}
