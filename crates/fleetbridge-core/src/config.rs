//! Bridge configuration.
//!
//! All sections deserialize from TOML and fall back to defaults, with
//! environment variable overrides applied last (see [`env_vars`]).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Environment variable names and typed getter helpers.
pub mod env_vars {
    pub const MQTT_BROKER: &str = "FLEETBRIDGE_MQTT_BROKER";
    pub const MQTT_PORT: &str = "FLEETBRIDGE_MQTT_PORT";
    pub const MQTT_USERNAME: &str = "FLEETBRIDGE_MQTT_USERNAME";
    pub const MQTT_PASSWORD: &str = "FLEETBRIDGE_MQTT_PASSWORD";
    pub const HTTP_HOST: &str = "FLEETBRIDGE_HTTP_HOST";
    pub const HTTP_PORT: &str = "FLEETBRIDGE_HTTP_PORT";
    pub const LOG_JSON: &str = "FLEETBRIDGE_LOG_JSON";

    /// Whether JSON log output was requested (for container environments).
    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false)
    }
}

/// MQTT broker connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker address
    pub broker: String,

    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Client ID (auto-generated if not provided)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Username for authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password for authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Topic prefix under which devices live (e.g. "fleet")
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

fn default_mqtt_port() -> u16 {
    1883
}
fn default_keep_alive() -> u64 {
    60
}
fn default_topic_prefix() -> String {
    "fleet".to_string()
}

impl MqttConfig {
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            port: default_mqtt_port(),
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            topic_prefix: default_topic_prefix(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    /// Full broker address as host:port.
    pub fn full_broker_addr(&self) -> String {
        format!("{}:{}", self.broker, self.port)
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self::new("localhost")
    }
}

/// Correlation engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default command timeout when the caller does not supply one (ms)
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Minimum command timeout a caller may request (ms)
    #[serde(default = "default_min_timeout_ms")]
    pub min_timeout_ms: u64,

    /// Maximum command timeout a caller may request (ms)
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,

    /// Maximum retry attempts after the initial publish
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Interval between supervisor sweeps (ms)
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Silence after which an online device becomes stale (ms)
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,

    /// Silence after which a stale device becomes offline (ms)
    #[serde(default = "default_offline_after_ms")]
    pub offline_after_ms: u64,

    /// Number of terminal commands kept in the in-memory history
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_timeout_ms() -> u64 {
    30_000
}
fn default_min_timeout_ms() -> u64 {
    1_000
}
fn default_max_timeout_ms() -> u64 {
    300_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_sweep_interval_ms() -> u64 {
    500
}
fn default_stale_after_ms() -> u64 {
    30_000
}
fn default_offline_after_ms() -> u64 {
    120_000
}
fn default_history_limit() -> usize {
    1_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            min_timeout_ms: default_min_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            max_retries: default_max_retries(),
            sweep_interval_ms: default_sweep_interval_ms(),
            stale_after_ms: default_stale_after_ms(),
            offline_after_ms: default_offline_after_ms(),
            history_limit: default_history_limit(),
        }
    }
}

impl EngineConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn min_timeout(&self) -> Duration {
        Duration::from_millis(self.min_timeout_ms)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn offline_after(&self) -> Duration {
        Duration::from_millis(self.offline_after_ms)
    }

    /// Validate cross-field constraints.
    ///
    /// The sweep must run at least twice within the minimum timeout, and
    /// the stale window must precede the offline window so silence walks
    /// through both liveness steps.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.min_timeout_ms == 0 {
            return Err(BridgeError::InvalidRequest(
                "min_timeout_ms must be positive".into(),
            ));
        }
        if self.min_timeout_ms > self.max_timeout_ms {
            return Err(BridgeError::InvalidRequest(format!(
                "min_timeout_ms ({}) exceeds max_timeout_ms ({})",
                self.min_timeout_ms, self.max_timeout_ms
            )));
        }
        if self.sweep_interval_ms > self.min_timeout_ms / 2 {
            return Err(BridgeError::InvalidRequest(format!(
                "sweep_interval_ms ({}) must be at most half of min_timeout_ms ({})",
                self.sweep_interval_ms, self.min_timeout_ms
            )));
        }
        if self.stale_after_ms >= self.offline_after_ms {
            return Err(BridgeError::InvalidRequest(format!(
                "stale_after_ms ({}) must be below offline_after_ms ({})",
                self.stale_after_ms, self.offline_after_ms
            )));
        }
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Host to bind to
    #[serde(default = "default_http_host")]
    pub host: String,

    /// Port to bind to
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_http_host() -> String {
    "127.0.0.1".to_string()
}
fn default_http_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
        }
    }
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub mqtt: MqttConfig,
    pub engine: EngineConfig,
    pub http: HttpConfig,
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> BridgeResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            BridgeError::InvalidRequest(format!(
                "Failed to read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: BridgeConfig = toml::from_str(&raw)
            .map_err(|e| BridgeError::InvalidRequest(format!("Invalid config: {}", e)))?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides on top of file/default values.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(broker) = std::env::var(env_vars::MQTT_BROKER) {
            self.mqtt.broker = broker;
        }
        if let Some(port) = std::env::var(env_vars::MQTT_PORT)
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.mqtt.port = port;
        }
        if let Ok(username) = std::env::var(env_vars::MQTT_USERNAME) {
            self.mqtt.username = Some(username);
        }
        if let Ok(password) = std::env::var(env_vars::MQTT_PASSWORD) {
            self.mqtt.password = Some(password);
        }
        if let Ok(host) = std::env::var(env_vars::HTTP_HOST) {
            self.http.host = host;
        }
        if let Some(port) = std::env::var(env_vars::HTTP_PORT)
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.http.port = port;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        assert!(config.engine.validate().is_ok());
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.topic_prefix, "fleet");
    }

    #[test]
    fn test_sweep_interval_bound() {
        let engine = EngineConfig {
            min_timeout_ms: 1_000,
            sweep_interval_ms: 800,
            ..Default::default()
        };
        assert!(engine.validate().is_err());
    }

    #[test]
    fn test_liveness_window_ordering() {
        let engine = EngineConfig {
            stale_after_ms: 120_000,
            offline_after_ms: 30_000,
            ..Default::default()
        };
        assert!(engine.validate().is_err());
    }

    #[test]
    fn test_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(
            &path,
            r#"
[mqtt]
broker = "broker.example"
port = 8883
topic_prefix = "farm"

[engine]
max_retries = 5

[http]
port = 9090
"#,
        )
        .unwrap();

        let config = BridgeConfig::from_file(&path).unwrap();
        assert_eq!(config.mqtt.broker, "broker.example");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.topic_prefix, "farm");
        assert_eq!(config.engine.max_retries, 5);
        assert_eq!(config.http.port, 9090);
    }

    #[test]
    fn test_mqtt_builder() {
        let mqtt = MqttConfig::new("broker.local")
            .with_port(8883)
            .with_auth("user", "pass");
        assert_eq!(mqtt.full_broker_addr(), "broker.local:8883");
        assert_eq!(mqtt.username.as_deref(), Some("user"));
    }
}
