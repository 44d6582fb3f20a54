// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde
//! attributes, such as non-zero timeouts and non-empty paths.

use crate::diagnostic::ConfigError;
use crate::model::CharlaConfig;

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &CharlaConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if !VALID_LOG_LEVELS.contains(&config.service.log_level.as_str()) {
        errors.push(ConfigError::Validation {
            message: format!(
                "service.log_level must be one of {}, got `{}`",
                VALID_LOG_LEVELS.join(", "),
                config.service.log_level
            ),
        });
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.database_path must not be empty".to_string(),
        });
    }

    if config.session.data_dir.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "session.data_dir must not be empty".to_string(),
        });
    }

    if config.session.connect_timeout_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "session.connect_timeout_secs must be greater than zero".to_string(),
        });
    }

    if config.session.send_timeout_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "session.send_timeout_secs must be greater than zero".to_string(),
        });
    }

    if config.session.send_retries == 0 {
        errors.push(ConfigError::Validation {
            message: "session.send_retries must be at least 1".to_string(),
        });
    }

    if config.session.qr_validity_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "session.qr_validity_secs must be greater than zero".to_string(),
        });
    }

    if config.session.tag_capacity == 0 {
        errors.push(ConfigError::Validation {
            message: "session.tag_capacity must be at least 1".to_string(),
        });
    }

    if config.pipeline.dedup_ttl_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "pipeline.dedup_ttl_secs must be greater than zero".to_string(),
        });
    }

    if config.responder.history_turns == 0 {
        errors.push(ConfigError::Validation {
            message: "responder.history_turns must be at least 1".to_string(),
        });
    }

    if config.quota.default_message_limit < 0 {
        errors.push(ConfigError::Validation {
            message: format!(
                "quota.default_message_limit must be non-negative, got {}",
                config.quota.default_message_limit
            ),
        });
    }

    if config.quota.default_token_limit < 0 {
        errors.push(ConfigError::Validation {
            message: format!(
                "quota.default_token_limit must be non-negative, got {}",
                config.quota.default_token_limit
            ),
        });
    }

    if let Some(ref cmd) = config.transport.bridge_command
        && cmd.trim().is_empty()
    {
        errors.push(ConfigError::Validation {
            message: "transport.bridge_command must not be empty when set".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
