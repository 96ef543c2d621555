// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Parley messaging core.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::Display;

/// Top-level Parley configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ParleyConfig {
    /// HTTP/WebSocket listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Connection identity settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Per-connection liveness and back-pressure settings.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Fan-out broker settings.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Content interceptor settings.
    #[serde(default)]
    pub interceptor: InterceptorConfig,

    /// Message id generator settings.
    #[serde(default)]
    pub ids: IdsConfig,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP/WebSocket listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Origins allowed to upgrade. Empty accepts any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Deadline for resolving the caller's identity while answering an
    /// upgrade request, in seconds. The protocol switch after the response
    /// is left to the HTTP server.
    #[serde(default = "default_auth_timeout_secs", alias = "handshake_timeout_secs")]
    pub auth_timeout_secs: u64,

    /// WebSocket read buffer size in bytes.
    #[serde(default = "default_buffer_size")]
    pub read_buffer_size: usize,

    /// WebSocket write buffer size in bytes.
    #[serde(default = "default_buffer_size")]
    pub write_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
            auth_timeout_secs: default_auth_timeout_secs(),
            read_buffer_size: default_buffer_size(),
            write_buffer_size: default_buffer_size(),
        }
    }
}

impl ServerConfig {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_auth_timeout_secs() -> u64 {
    10
}

fn default_buffer_size() -> usize {
    10_000
}

/// Connection identity configuration.
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Secret used to verify connection tokens. `None` rejects every upgrade.
    #[serde(default)]
    pub token_secret: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field(
                "token_secret",
                &self.token_secret.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("parley").join("parley.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("parley.db"))
        .display()
        .to_string()
}

fn default_wal_mode() -> bool {
    true
}

/// What to do when a connection's outbound buffer is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Terminate the connection; the client reconnects and re-consumes.
    #[default]
    Close,
    /// Evict the oldest buffered frame to make room.
    DropOldest,
}

/// Per-connection liveness and buffering configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// How long to wait for a pong before the connection is considered dead.
    #[serde(default = "default_pong_wait_secs")]
    pub pong_wait_secs: u64,

    /// Interval between server pings. Defaults to 90% of `pong_wait_secs`.
    #[serde(default)]
    pub ping_period_secs: Option<u64>,

    /// Capacity of the outbound buffer, in frames.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// Behaviour when the outbound buffer is full.
    #[serde(default)]
    pub backpressure: BackpressurePolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pong_wait_secs: default_pong_wait_secs(),
            ping_period_secs: None,
            outbound_capacity: default_outbound_capacity(),
            backpressure: BackpressurePolicy::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    /// Explicit ping period, or `0.9 × pong_wait`.
    pub fn ping_period(&self) -> Duration {
        match self.ping_period_secs {
            Some(secs) => Duration::from_secs(secs),
            None => Duration::from_millis(self.pong_wait_secs.saturating_mul(900)),
        }
    }
}

fn default_pong_wait_secs() -> u64 {
    60
}

fn default_outbound_capacity() -> usize {
    100
}

/// Fan-out broker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// Device classes; each gets its own durable queue per user.
    #[serde(default = "default_device_classes")]
    pub device_classes: Vec<String>,

    /// Class used when a connection does not name one.
    #[serde(default = "default_device_class")]
    pub default_device_class: String,

    /// Fallback poll interval for idle consumers, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            device_classes: default_device_classes(),
            default_device_class: default_device_class(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl BrokerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_device_classes() -> Vec<String> {
    vec![default_device_class()]
}

fn default_device_class() -> String {
    "computer".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Content interceptor configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InterceptorConfig {
    /// Reject messages longer than this many code points (and empty ones).
    /// `None` accepts everything.
    #[serde(default)]
    pub max_content_runes: Option<usize>,
}

/// Message id generator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IdsConfig {
    /// Node id embedded in generated ids (0..=1023).
    #[serde(default = "default_node_id")]
    pub node_id: u16,
}

impl Default for IdsConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
        }
    }
}

fn default_node_id() -> u16 {
    1
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Log output configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error). `RUST_LOG` wins if set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = ParleyConfig::default();
        assert_eq!(config.server.auth_timeout(), Duration::from_secs(10));
        assert_eq!(config.server.read_buffer_size, 10_000);
        assert_eq!(config.server.write_buffer_size, 10_000);
        assert_eq!(config.connection.pong_wait(), Duration::from_secs(60));
        assert_eq!(config.connection.ping_period(), Duration::from_secs(54));
        assert_eq!(config.connection.outbound_capacity, 100);
        assert_eq!(config.connection.backpressure, BackpressurePolicy::Close);
        assert_eq!(config.broker.device_classes, vec!["computer"]);
        assert!(config.interceptor.max_content_runes.is_none());
    }

    #[test]
    fn explicit_ping_period_wins() {
        let config = ConnectionConfig {
            ping_period_secs: Some(20),
            ..ConnectionConfig::default()
        };
        assert_eq!(config.ping_period(), Duration::from_secs(20));
    }

    #[test]
    fn auth_debug_redacts_secret() {
        let auth = AuthConfig {
            token_secret: Some("hunter2".to_string()),
        };
        let debug = format!("{auth:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[redacted]"));
    }

    #[test]
    fn backpressure_policy_display() {
        assert_eq!(BackpressurePolicy::DropOldest.to_string(), "drop_oldest");
        assert_eq!(BackpressurePolicy::Close.to_string(), "close");
    }
}
