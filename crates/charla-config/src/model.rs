// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Charla engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Charla configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable
/// overrides. All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CharlaConfig {
    /// Service identity and logging settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Session manager settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Ingestion pipeline settings (dedup, classification).
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Automated responder settings.
    #[serde(default)]
    pub responder: ResponderConfig,

    /// Default quota limits for newly created tenants.
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Bridge transport settings.
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Service identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Display name of the service instance.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_service_name() -> String {
    "charla".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Session manager configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Directory holding per-tenant session artifact directories.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Overall bound on a connect attempt, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Bound on a single send attempt, in seconds.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// Maximum send attempts before giving up on transient failures.
    #[serde(default = "default_send_retries")]
    pub send_retries: u32,

    /// Base backoff between send attempts, in milliseconds. Grows linearly
    /// with the attempt number.
    #[serde(default = "default_send_backoff_ms")]
    pub send_backoff_ms: u64,

    /// How long an issued QR credential remains scannable, in seconds.
    #[serde(default = "default_qr_validity_secs")]
    pub qr_validity_secs: u64,

    /// Persisted session artifacts older than this are rebuilt, in seconds.
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,

    /// Settle wait after a forced cleanup, in milliseconds.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Most recent automated-send message ids kept per tenant.
    #[serde(default = "default_tag_capacity")]
    pub tag_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            connect_timeout_secs: default_connect_timeout_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            send_retries: default_send_retries(),
            send_backoff_ms: default_send_backoff_ms(),
            qr_validity_secs: default_qr_validity_secs(),
            staleness_secs: default_staleness_secs(),
            settle_ms: default_settle_ms(),
            tag_capacity: default_tag_capacity(),
        }
    }
}

fn default_data_dir() -> String {
    dirs::data_dir()
        .map(|p| p.join("charla").join("sessions"))
        .and_then(|p| p.to_str().map(String::from))
        .unwrap_or_else(|| "./charla-sessions".to_string())
}

fn default_connect_timeout_secs() -> u64 {
    45
}

fn default_send_timeout_secs() -> u64 {
    20
}

fn default_send_retries() -> u32 {
    3
}

fn default_send_backoff_ms() -> u64 {
    500
}

fn default_qr_validity_secs() -> u64 {
    300
}

fn default_staleness_secs() -> u64 {
    3600
}

fn default_settle_ms() -> u64 {
    500
}

fn default_tag_capacity() -> usize {
    200
}

/// Ingestion pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// How long a dedup claim shields a message id, in seconds.
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,

    /// Window after the last inbound within which an unmarked own-account
    /// send is attributed to the automated agent, in milliseconds.
    #[serde(default = "default_auto_reply_window_ms")]
    pub auto_reply_window_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dedup_ttl_secs: default_dedup_ttl_secs(),
            auto_reply_window_ms: default_auto_reply_window_ms(),
        }
    }
}

fn default_dedup_ttl_secs() -> u64 {
    60
}

fn default_auto_reply_window_ms() -> u64 {
    2000
}

/// Automated responder configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResponderConfig {
    /// Most recent conversation turns handed to the completion collaborator.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// System prompt used when a tenant has none configured.
    #[serde(default = "default_system_prompt")]
    pub default_system_prompt: String,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
            default_system_prompt: default_system_prompt(),
        }
    }
}

fn default_history_turns() -> usize {
    10
}

fn default_system_prompt() -> String {
    "You are a helpful assistant answering on behalf of a business.".to_string()
}

/// Default quota limits applied to newly created tenants.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaConfig {
    /// Monthly message ceiling for new tenants.
    #[serde(default = "default_message_limit")]
    pub default_message_limit: i64,

    /// Monthly token ceiling for new tenants.
    #[serde(default = "default_token_limit")]
    pub default_token_limit: i64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_message_limit: default_message_limit(),
            default_token_limit: default_token_limit(),
        }
    }
}

fn default_message_limit() -> i64 {
    1000
}

fn default_token_limit() -> i64 {
    100_000
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
        .map(|p| p.join("charla").join("charla.db"))
        .and_then(|p| p.to_str().map(String::from))
        .unwrap_or_else(|| "./charla.db".to_string())
}

fn default_wal_mode() -> bool {
    true
}

/// Bridge transport configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Command spawned per tenant session. `None` disables the bridge
    /// transport (tests inject mocks instead).
    #[serde(default)]
    pub bridge_command: Option<String>,

    /// Extra arguments passed before the session directory argument.
    #[serde(default)]
    pub bridge_args: Vec<String>,
}
