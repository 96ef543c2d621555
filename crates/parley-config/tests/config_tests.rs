// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Parley configuration system.

use std::time::Duration;

use parley_config::diagnostic::ConfigError;
use parley_config::model::{BackpressurePolicy, LogFormat};
use parley_config::{load_and_validate_str, load_config_from_str};

/// Valid TOML with all known fields deserializes successfully.
#[test]
fn valid_toml_deserializes_into_parley_config() {
    let toml = r#"
[server]
host = "0.0.0.0"
port = 9443
allowed_origins = ["https://forum.example"]
auth_timeout_secs = 5

[auth]
token_secret = "s3cret"

[storage]
database_path = "/tmp/parley-test.db"
wal_mode = false

[connection]
pong_wait_secs = 30
ping_period_secs = 25
outbound_capacity = 16
backpressure = "drop_oldest"

[broker]
device_classes = ["computer", "mobile"]
default_device_class = "mobile"
poll_interval_ms = 250

[interceptor]
max_content_runes = 2000

[ids]
node_id = 12

[logging]
level = "debug"
format = "json"
"#;

    let config = load_and_validate_str(toml).expect("valid TOML should load");
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 9443);
    assert_eq!(config.server.allowed_origins, vec!["https://forum.example"]);
    assert_eq!(config.server.auth_timeout(), Duration::from_secs(5));
    assert_eq!(config.auth.token_secret.as_deref(), Some("s3cret"));
    assert_eq!(config.storage.database_path, "/tmp/parley-test.db");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.connection.ping_period(), Duration::from_secs(25));
    assert_eq!(config.connection.outbound_capacity, 16);
    assert_eq!(config.connection.backpressure, BackpressurePolicy::DropOldest);
    assert_eq!(config.broker.device_classes, vec!["computer", "mobile"]);
    assert_eq!(config.broker.default_device_class, "mobile");
    assert_eq!(config.broker.poll_interval(), Duration::from_millis(250));
    assert_eq!(config.interceptor.max_content_runes, Some(2000));
    assert_eq!(config.ids.node_id, 12);
    assert_eq!(config.logging.format, LogFormat::Json);
}

/// Empty TOML produces the compiled defaults.
#[test]
fn empty_toml_uses_defaults() {
    let config = load_config_from_str("").expect("empty config should load");
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.connection.pong_wait_secs, 60);
    assert_eq!(config.connection.backpressure, BackpressurePolicy::Close);
    assert!(config.auth.token_secret.is_none());
}

/// Unknown keys become diagnostics with a suggestion.
#[test]
fn unknown_key_produces_suggestion() {
    let toml = r#"
[connection]
pong_wiat_secs = 30
"#;

    let errors = load_and_validate_str(toml).expect_err("should reject unknown key");
    let unknown = errors.iter().find_map(|e| match e {
        ConfigError::UnknownKey {
            key, suggestion, ..
        } => Some((key.clone(), suggestion.clone())),
        _ => None,
    });
    let (key, suggestion) = unknown.expect("expected an UnknownKey diagnostic");
    assert_eq!(key, "pong_wiat_secs");
    assert_eq!(suggestion.as_deref(), Some("pong_wait_secs"));
}

/// Unknown backpressure policy is a type error, not a silent default.
#[test]
fn unknown_backpressure_policy_is_rejected() {
    let toml = r#"
[connection]
backpressure = "block"
"#;
    assert!(load_and_validate_str(toml).is_err());
}

/// Semantic violations are reported after deserialization.
#[test]
fn validation_errors_are_reported() {
    let toml = r#"
[connection]
pong_wait_secs = 10
ping_period_secs = 15
outbound_capacity = 0
"#;

    let errors = load_and_validate_str(toml).expect_err("should fail validation");
    assert_eq!(errors.len(), 2, "got {errors:?}");
    assert!(errors
        .iter()
        .all(|e| matches!(e, ConfigError::Validation { .. })));
}

/// Files written before the rename still set the identity deadline.
#[test]
fn handshake_timeout_key_is_accepted_as_auth_timeout() {
    let toml = r#"
[server]
handshake_timeout_secs = 7
"#;
    let config = load_and_validate_str(toml).expect("legacy key should load");
    assert_eq!(config.server.auth_timeout(), Duration::from_secs(7));
}
