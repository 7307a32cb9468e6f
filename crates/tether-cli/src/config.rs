//! CLI configuration.
//!
//! Configuration can be loaded from:
//! - A TOML file (`--config`, `TETHER_CONFIG`, or the default search path)
//! - Environment variables (`TETHER_*`, nested keys separated by `__`)
//!
//! Environment variables override the file, e.g.
//! `TETHER_CLIENT__PEER_ID=alice` or `TETHER_METRICS__ENABLED=true`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tether_client::ClientConfig;

/// Default config file locations, searched in order.
const CONFIG_PATHS: [&str; 3] = [
    "tether.toml",
    "~/.config/tether/tether.toml",
    "/etc/tether/tether.toml",
];

/// CLI configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Session settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

/// First existing file on the default search path.
fn find_config_file() -> Option<PathBuf> {
    CONFIG_PATHS
        .iter()
        .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
        .find(|path| path.exists())
}

impl Config {
    /// Load configuration from `path` (or the default search path) layered
    /// with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file is missing or any source cannot
    /// be parsed.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                let expanded = PathBuf::from(shellexpand::tilde(path).as_ref());
                if !expanded.exists() {
                    anyhow::bail!("Config file not found: {}", expanded.display());
                }
                Some(expanded)
            }
            None => find_config_file(),
        };

        let mut builder = config::Config::builder();
        if let Some(file) = &file {
            tracing::debug!(path = %file.display(), "Loading config file");
            builder = builder.add_source(
                config::File::from(file.as_path()).format(config::FileFormat::Toml),
            );
        }

        Self::from_builder(builder, file.as_deref())
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
        file: Option<&Path>,
    ) -> Result<Self> {
        let origin = file.map_or_else(|| "environment".to_string(), |f| f.display().to_string());

        let settings = builder
            .add_source(
                config::Environment::with_prefix("TETHER")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("client.watching_peer_ids")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config from {}", origin))?;

        settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse config from {}", origin))
    }

    /// Parse a TOML document without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not parse.
    #[cfg(test)]
    fn from_toml_str(contents: &str) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
            .context("Failed to parse config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.port, 9090);
        assert!(config.client.app_id.is_empty());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [client]
            app_id = "app-1"
            peer_id = "alice"
            watching_peer_ids = ["bob"]

            [client.endpoint]
            address = "ws://127.0.0.1:9000/ws"
            ttl_secs = 60

            [metrics]
            enabled = true
        "#;

        let config = Config::from_toml_str(toml_str).unwrap();
        assert_eq!(config.client.peer_id, "alice");
        assert_eq!(config.client.watching_peer_ids, vec!["bob"]);
        assert_eq!(config.client.endpoint.unwrap().ttl_secs, 60);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9090);
        assert_eq!(config.client.timeouts.command_timeout_ms, 10_000);
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::load(Some("/nonexistent/tether.toml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_client_section_matches_library_toml() {
        // The [client] table is the library's own format.
        let toml_str = r#"
            app_id = "app-1"
            peer_id = "alice"
        "#;
        let direct: ClientConfig = toml::from_str(toml_str).unwrap();
        let layered = Config::from_toml_str(&format!("[client]\n{}", toml_str)).unwrap();
        assert_eq!(direct, layered.client);
    }
}
