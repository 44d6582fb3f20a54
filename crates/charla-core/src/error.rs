// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Charla automation engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Why a send was rejected without retry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SendRejectReason {
    /// The transport rate-limited the sender.
    RateLimited,
    /// The recipient has blocked this sender.
    Blocked,
    /// The recipient address is malformed or unknown.
    InvalidAddress,
}

/// Which quota ceiling was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum QuotaDimension {
    Messages,
    Tokens,
}

/// Coarse status category for the upward CRUD/API layer.
///
/// Callers outside this core map these to protocol status codes; the core
/// only guarantees that distinct failure classes stay distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StatusCategory {
    BadRequest,
    Unauthorized,
    Conflict,
    Unavailable,
    QuotaExceeded,
    Timeout,
    Internal,
}

/// The primary error type used across all Charla crates.
#[derive(Debug, Error)]
pub enum CharlaError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Transport errors (bridge process failure, protocol violation, connection loss).
    #[error("transport error: {message}")]
    Transport {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Completion collaborator errors (API failure, malformed response).
    #[error("completion error: {message}")]
    Completion {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connect or send exceeded its bound.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// The transport rejected the tenant's credential.
    #[error("authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// A send was attempted while the tenant's session is not ready.
    #[error("tenant {tenant} is not connected")]
    NotConnected { tenant: i64 },

    /// A connect was attempted while a handshake is already in flight.
    #[error("tenant {tenant} already has a session handshake in progress")]
    Conflict { tenant: i64 },

    /// A quota ceiling is exhausted.
    #[error("quota exceeded on {dimension}")]
    QuotaExceeded { dimension: QuotaDimension },

    /// A message with this external identifier was already processed.
    #[error("duplicate message {external_id}")]
    DuplicateMessage { external_id: String },

    /// A send failed in a way that is safe to retry.
    #[error("transient send failure: {message}")]
    TransientSend { message: String },

    /// A send failed in a way that must not be retried.
    #[error("send rejected: {reason}")]
    TerminalSend { reason: SendRejectReason },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CharlaError {
    /// The status category the upward API layer should surface for this error.
    pub fn status_category(&self) -> StatusCategory {
        match self {
            CharlaError::Config(_) => StatusCategory::BadRequest,
            CharlaError::Storage { .. } => StatusCategory::Internal,
            CharlaError::Transport { .. } => StatusCategory::Unavailable,
            CharlaError::Completion { .. } => StatusCategory::Unavailable,
            CharlaError::Timeout { .. } => StatusCategory::Timeout,
            CharlaError::AuthenticationFailed { .. } => StatusCategory::Unauthorized,
            CharlaError::NotConnected { .. } => StatusCategory::Unavailable,
            CharlaError::Conflict { .. } => StatusCategory::Conflict,
            CharlaError::QuotaExceeded { .. } => StatusCategory::QuotaExceeded,
            CharlaError::DuplicateMessage { .. } => StatusCategory::Conflict,
            CharlaError::TransientSend { .. } => StatusCategory::Unavailable,
            CharlaError::TerminalSend { .. } => StatusCategory::BadRequest,
            CharlaError::Internal(_) => StatusCategory::Internal,
        }
    }

    /// Whether a send that failed with this error may be attempted again.
    pub fn is_retryable_send(&self) -> bool {
        matches!(self, CharlaError::TransientSend { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_categories_distinguish_failure_classes() {
        let timeout = CharlaError::Timeout {
            duration: Duration::from_secs(45),
        };
        let auth = CharlaError::AuthenticationFailed {
            reason: "credential rejected".into(),
        };
        let conflict = CharlaError::Conflict { tenant: 7 };
        let quota = CharlaError::QuotaExceeded {
            dimension: QuotaDimension::Messages,
        };

        assert_eq!(timeout.status_category(), StatusCategory::Timeout);
        assert_eq!(auth.status_category(), StatusCategory::Unauthorized);
        assert_eq!(conflict.status_category(), StatusCategory::Conflict);
        assert_eq!(quota.status_category(), StatusCategory::QuotaExceeded);
    }

    #[test]
    fn only_transient_sends_are_retryable() {
        let transient = CharlaError::TransientSend {
            message: "socket reset".into(),
        };
        let terminal = CharlaError::TerminalSend {
            reason: SendRejectReason::RateLimited,
        };
        let not_connected = CharlaError::NotConnected { tenant: 1 };

        assert!(transient.is_retryable_send());
        assert!(!terminal.is_retryable_send());
        assert!(!not_connected.is_retryable_send());
    }

    #[test]
    fn send_reject_reason_round_trips() {
        use std::str::FromStr;
        for reason in [
            SendRejectReason::RateLimited,
            SendRejectReason::Blocked,
            SendRejectReason::InvalidAddress,
        ] {
            let s = reason.to_string();
            assert_eq!(SendRejectReason::from_str(&s).unwrap(), reason);
        }
    }
}
