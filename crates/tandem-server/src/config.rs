//! Server configuration.
//!
//! Values are layered, later sources winning:
//! - Built-in defaults
//! - TOML file (`TANDEM_CONFIG`, or the first of the default paths that exists)
//! - Environment variables (`TANDEM_*`, `__` between section and key,
//!   e.g. `TANDEM_MATCHMAKING__GRACE_MS=1500`)

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;
use tandem_core::LobbyConfig;

/// Environment variable naming an explicit config file.
const CONFIG_PATH_VAR: &str = "TANDEM_CONFIG";

/// Searched in order when `TANDEM_CONFIG` is unset.
const DEFAULT_PATHS: [&str; 3] = [
    "tandem.toml",
    "/etc/tandem/tandem.toml",
    "~/.config/tandem/tandem.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Matchmaking behaviour.
    #[serde(default)]
    pub matchmaking: MatchmakingConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum chat message length in characters.
    #[serde(default = "default_max_chat_length")]
    pub max_chat_length: usize,
}

/// Matchmaking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakingConfig {
    /// Delay before a partner left behind re-enters matchmaking.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,

    /// Pending invite lifetime. 0 disables expiry.
    #[serde(default = "default_request_ttl_ms")]
    pub request_ttl_ms: u64,

    /// Session manager command channel capacity.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval advertised to clients in the `connected` event.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_chat_length() -> usize {
    2000
}

fn default_grace_ms() -> u64 {
    1000
}

fn default_request_ttl_ms() -> u64 {
    60_000
}

fn default_command_buffer() -> usize {
    1024
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            matchmaking: MatchmakingConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            max_chat_length: default_max_chat_length(),
        }
    }
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            grace_ms: default_grace_ms(),
            request_ttl_ms: default_request_ttl_ms(),
            command_buffer: default_command_buffer(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file or variable cannot be parsed.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = Self::find_file() {
            tracing::info!("Loading config from {}", path.display());
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        Self::build(builder.add_source(Self::environment()))
    }

    fn find_file() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
            return Some(PathBuf::from(shellexpand::tilde(&path).as_ref()));
        }
        DEFAULT_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    fn environment() -> Environment {
        Environment::with_prefix("TANDEM")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` does not resolve.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))?
            .next()
            .with_context(|| format!("No address for {}:{}", self.host, self.port))
    }

    /// Settings for the session manager.
    #[must_use]
    pub fn lobby_config(&self) -> LobbyConfig {
        let ttl = self.matchmaking.request_ttl_ms;
        LobbyConfig {
            grace_period: Duration::from_millis(self.matchmaking.grace_ms),
            request_ttl: (ttl > 0).then(|| Duration::from_millis(ttl)),
            max_chat_length: self.limits.max_chat_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_toml(toml: &str) -> Config {
        Config::build(config::Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 3001);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.matchmaking.grace_ms, 1000);
        assert_eq!(config.limits.max_chat_length, 2000);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 3001);

        let bad = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let config = from_toml(
            r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_connections = 50000

            [matchmaking]
            grace_ms = 250
            request_ttl_ms = 0
        "#,
        );
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_connections, 50000);
        assert_eq!(config.limits.max_message_size, 64 * 1024);

        let lobby = config.lobby_config();
        assert_eq!(lobby.grace_period, Duration::from_millis(250));
        assert_eq!(lobby.request_ttl, None);
    }

    #[test]
    fn test_environment_overrides_file() {
        let env: HashMap<String, String> = [
            ("TANDEM_PORT", "4000"),
            ("TANDEM_MATCHMAKING__GRACE_MS", "1500"),
            ("TANDEM_METRICS__ENABLED", "false"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let builder = config::Config::builder()
            .add_source(File::from_str("port = 9000", FileFormat::Toml))
            .add_source(Config::environment().source(Some(env)));
        let config = Config::build(builder).unwrap();

        assert_eq!(config.port, 4000);
        assert_eq!(config.matchmaking.grace_ms, 1500);
        assert!(!config.metrics.enabled);
    }
}
