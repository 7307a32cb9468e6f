//! Client configuration.
//!
//! Settings deserialize from TOML; every field but `app_id` and `peer_id`
//! has a default. [`ClientConfig::validate`] runs when a client is built.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ClientError;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Application id sent on every frame.
    #[serde(default)]
    pub app_id: String,

    /// This peer's id.
    #[serde(default)]
    pub peer_id: String,

    /// Ask the resolver for a TLS endpoint.
    #[serde(default = "default_true")]
    pub secure: bool,

    /// Peers to watch when the session opens.
    #[serde(default)]
    pub watching_peer_ids: Vec<String>,

    /// Per-peer signature setting forwarded to the authenticator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sp: Option<bool>,

    /// Fixed endpoint; used instead of a resolver when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointConfig>,

    /// Timer settings.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// A fixed endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Transport address, e.g. `wss://push.example.com/ws`.
    pub address: String,

    /// Lease length in seconds.
    #[serde(default = "default_endpoint_ttl")]
    pub ttl_secs: u64,
}

/// Timer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Reply, probe and handshake window in milliseconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    /// Idle period before a keepalive probe, in milliseconds.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_endpoint_ttl() -> u64 {
    3_600 // 1 hour
}

fn default_command_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_keepalive_interval() -> u64 {
    60_000 // 60 seconds
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            peer_id: String::new(),
            secure: true,
            watching_peer_ids: Vec::new(),
            sp: None,
            endpoint: None,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout(),
            keepalive_interval_ms: default_keepalive_interval(),
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    #[must_use]
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

impl EndpointConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl ClientConfig {
    /// Configuration for `peer_id` in `app_id` with defaults elsewhere.
    #[must_use]
    pub fn new(app_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            peer_id: peer_id.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the document does not parse.
    pub fn from_toml_str(contents: &str) -> Result<Self, ClientError> {
        toml::from_str(contents).map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Check required settings.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] naming the first invalid setting.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.app_id.trim().is_empty() {
            return Err(ClientError::Config("app_id is required".into()));
        }
        if self.peer_id.trim().is_empty() {
            return Err(ClientError::Config("peer_id is required".into()));
        }
        if self.timeouts.command_timeout_ms == 0 {
            return Err(ClientError::Config(
                "timeouts.command_timeout_ms must be positive".into(),
            ));
        }
        if self.timeouts.keepalive_interval_ms == 0 {
            return Err(ClientError::Config(
                "timeouts.keepalive_interval_ms must be positive".into(),
            ));
        }
        if let Some(endpoint) = &self.endpoint {
            if endpoint.address.trim().is_empty() {
                return Err(ClientError::Config("endpoint.address is empty".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert!(config.secure);
        assert_eq!(config.timeouts.command_timeout(), Duration::from_secs(10));
        assert_eq!(config.timeouts.keepalive_interval(), Duration::from_secs(60));
        assert!(config.endpoint.is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            app_id = "app-1"
            peer_id = "alice"
            watching_peer_ids = ["bob", "carol"]
            sp = true

            [endpoint]
            address = "ws://127.0.0.1:9000/ws"

            [timeouts]
            command_timeout_ms = 2500
        "#;

        let config = ClientConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.app_id, "app-1");
        assert_eq!(config.watching_peer_ids, vec!["bob", "carol"]);
        assert_eq!(config.sp, Some(true));
        assert_eq!(config.timeouts.command_timeout_ms, 2500);
        assert_eq!(config.timeouts.keepalive_interval_ms, 60_000);

        let endpoint = config.endpoint.unwrap();
        assert_eq!(endpoint.ttl(), Duration::from_secs(3600));
        assert!(config.secure);
    }

    #[test]
    fn test_validate() {
        assert!(ClientConfig::new("app", "alice").validate().is_ok());

        let err = ClientConfig::new("", "alice").validate().unwrap_err();
        assert!(matches!(err, ClientError::Config(ref m) if m.contains("app_id")));

        let err = ClientConfig::new("app", " ").validate().unwrap_err();
        assert!(matches!(err, ClientError::Config(ref m) if m.contains("peer_id")));

        let mut config = ClientConfig::new("app", "alice");
        config.timeouts.command_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            ClientConfig::from_toml_str("peer_id = 5"),
            Err(ClientError::Config(_))
        ));
    }
}
