// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as valid bind addresses, ping/pong ordering, and device class names.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::ParleyConfig;

/// Largest node id the snowflake layout can carry.
const MAX_NODE_ID: u16 = 1023;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &ParleyConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let host = config.server.host.trim();
    if host.is_empty() {
        errors.push(ConfigError::Validation {
            message: "server.host must not be empty".to_string(),
        });
    } else {
        let is_valid_ip = host.parse::<std::net::IpAddr>().is_ok();
        let is_valid_hostname = host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == ':');
        if !is_valid_ip && !is_valid_hostname {
            errors.push(ConfigError::Validation {
                message: format!("server.host `{host}` is not a valid IP address or hostname"),
            });
        }
    }

    if config.server.auth_timeout_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "server.auth_timeout_secs must be at least 1".to_string(),
        });
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.database_path must not be empty".to_string(),
        });
    }

    if config.connection.pong_wait_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "connection.pong_wait_secs must be at least 1".to_string(),
        });
    }

    if config.connection.ping_period().is_zero()
        || config.connection.ping_period() >= config.connection.pong_wait()
    {
        errors.push(ConfigError::Validation {
            message: format!(
                "connection.ping_period_secs must be positive and shorter than pong_wait_secs ({}s), got {:?}",
                config.connection.pong_wait_secs,
                config.connection.ping_period()
            ),
        });
    }

    if config.connection.outbound_capacity == 0 {
        errors.push(ConfigError::Validation {
            message: "connection.outbound_capacity must be at least 1".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for class in &config.broker.device_classes {
        if !is_valid_device_class(class) {
            errors.push(ConfigError::Validation {
                message: format!(
                    "broker.device_classes entry `{class}` must match [a-z0-9_-]+"
                ),
            });
        }
        if !seen.insert(class.as_str()) {
            errors.push(ConfigError::Validation {
                message: format!("broker.device_classes lists `{class}` more than once"),
            });
        }
    }

    if !config
        .broker
        .device_classes
        .contains(&config.broker.default_device_class)
    {
        errors.push(ConfigError::Validation {
            message: format!(
                "broker.default_device_class `{}` is not listed in broker.device_classes",
                config.broker.default_device_class
            ),
        });
    }

    if config.broker.poll_interval_ms == 0 {
        errors.push(ConfigError::Validation {
            message: "broker.poll_interval_ms must be at least 1".to_string(),
        });
    }

    if config.interceptor.max_content_runes == Some(0) {
        errors.push(ConfigError::Validation {
            message: "interceptor.max_content_runes must be at least 1 when set".to_string(),
        });
    }

    if config.ids.node_id > MAX_NODE_ID {
        errors.push(ConfigError::Validation {
            message: format!(
                "ids.node_id must be at most {MAX_NODE_ID}, got {}",
                config.ids.node_id
            ),
        });
    }

    if config
        .logging
        .level
        .parse::<tracing::Level>()
        .is_err()
    {
        errors.push(ConfigError::Validation {
            message: format!(
                "logging.level `{}` must be one of trace, debug, info, warn, error",
                config.logging.level
            ),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Device class names become part of queue names: `[a-z0-9_-]+`.
pub fn is_valid_device_class(class: &str) -> bool {
    !class.is_empty()
        && class
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParleyConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ParleyConfig::default()).is_ok());
    }

    #[test]
    fn ping_period_must_be_shorter_than_pong_wait() {
        let mut config = ParleyConfig::default();
        config.connection.ping_period_secs = Some(60);
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.to_string().contains("ping_period_secs")));
    }

    #[test]
    fn default_device_class_must_be_listed() {
        let mut config = ParleyConfig::default();
        config.broker.default_device_class = "mobile".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("mobile"));
    }

    #[test]
    fn collects_all_errors() {
        let mut config = ParleyConfig::default();
        config.server.host = String::new();
        config.connection.outbound_capacity = 0;
        config.ids.node_id = 4096;
        config.broker.device_classes = vec!["Computer".to_string()];
        config.broker.default_device_class = "Computer".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4, "got {errors:?}");
    }

    #[test]
    fn device_class_charset() {
        assert!(is_valid_device_class("computer"));
        assert!(is_valid_device_class("mobile-2"));
        assert!(!is_valid_device_class(""));
        assert!(!is_valid_device_class("Mobile"));
        assert!(!is_valid_device_class("a.b"));
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let mut config = ParleyConfig::default();
        config.logging.level = "loud".to_string();
        assert!(validate_config(&config).is_err());
    }
}
