// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across adapter traits and the Charla engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Numeric identifier of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub i64);

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-assigned identifier of a message, unique within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

/// Identifies the type of adapter in the plugin registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Transport,
    Completion,
    Storage,
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Who produced a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SenderClass {
    /// The tenant's human operator, typing from their own device.
    TenantOperator,
    /// The system-generated responder.
    AutomatedAgent,
    /// An external contact messaging the tenant.
    ExternalContact,
}

/// Payload kind of a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Video,
    Document,
    Sticker,
    Location,
    Contact,
    Other,
}

/// States of a tenant's connection to the external transport.
///
/// `Ready` is the only state from which sends are accepted. Any state may
/// fall to `Disconnected` or `Error` on a transport event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session work has started for this tenant.
    Uninitialized,
    /// A QR credential has been issued and awaits a scan.
    AwaitingScan,
    /// Credential accepted, handshake still pending.
    Authenticated,
    /// Fully connected, phone identity known.
    Ready,
    /// Clean teardown.
    Disconnected,
    /// Abnormal teardown.
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::AwaitingScan => write!(f, "awaiting_scan"),
            SessionState::Authenticated => write!(f, "authenticated"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uninitialized" => Ok(SessionState::Uninitialized),
            "awaiting_scan" => Ok(SessionState::AwaitingScan),
            "authenticated" => Ok(SessionState::Authenticated),
            "ready" => Ok(SessionState::Ready),
            "disconnected" => Ok(SessionState::Disconnected),
            "error" => Ok(SessionState::Error),
            other => Err(format!("unknown session state `{other}`")),
        }
    }
}

/// A raw message event delivered by the transport, before classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Transport-assigned message identifier, unique within the tenant.
    pub id: String,
    /// Address of the chat the message belongs to (the counterparty for DMs).
    pub chat: String,
    /// Address of the author.
    pub sender: String,
    /// Whether the message left from the tenant's own account.
    pub from_me: bool,
    /// Textual content (caption for media).
    pub body: String,
    /// Payload kind.
    pub kind: MessageKind,
    /// Transport timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Typed events emitted by a transport session.
///
/// Replaces per-session callbacks: the session manager consumes these from
/// a per-tenant pump so transition logic is testable without a live
/// transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    /// A QR credential payload was issued.
    Qr { payload: String },
    /// The scanned credential was accepted; handshake continues.
    Authenticated,
    /// The session is fully connected under the given phone identity.
    Ready { phone: String },
    /// The credential was rejected.
    AuthFailure { reason: String },
    /// The transport dropped the session.
    Disconnected { reason: String },
    /// A message was delivered (inbound or echo of an outbound).
    Message(MessageEvent),
}

/// A message event together with the tenant whose session delivered it.
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    pub tenant: TenantId,
    pub event: MessageEvent,
}

/// Change notifications fanned out to subscribers (UI, transports upward).
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// A tenant's session state changed.
    SessionStatus { tenant: TenantId, state: SessionState },
    /// A conversation's snapshot, unread count, or bot flag changed.
    ConversationUpdated { tenant: TenantId, conversation_id: i64 },
    /// A new message row was stored.
    MessageStored {
        tenant: TenantId,
        conversation_id: i64,
        message_id: String,
    },
}

/// A tenant account with its quota counters.
///
/// Counter invariants (non-negative, reset date advancing only via the
/// explicit reset operation) are enforced by the storage schema and the
/// quota ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: i64,
    /// Opaque external code identifying the tenant.
    pub code: String,
    pub name: String,
    /// `active`, `inactive`, or `suspended`.
    pub status: TenantStatus,
    pub message_limit: i64,
    pub message_usage: i64,
    pub token_limit: i64,
    pub token_usage: i64,
    /// ISO 8601 timestamp of the last explicit usage reset.
    pub usage_reset_at: String,
    /// Per-tenant system prompt for the completion collaborator.
    pub system_prompt: Option<String>,
    /// First hour (0-23, inclusive) at which automation responds.
    pub work_start_hour: u8,
    /// Hour (1-24, exclusive) at which automation stops responding.
    pub work_end_hour: u8,
    /// CSV of ISO weekday numbers (1 = Monday .. 7 = Sunday). Empty = every day.
    pub work_days: String,
    pub created_at: String,
}

/// Lifecycle status of a tenant account.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Inactive,
    Suspended,
}

/// Persisted session status for a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub tenant_id: i64,
    /// Last persisted [`SessionState`], as its display string.
    pub state: String,
    pub phone: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: String,
}

/// A per-(tenant, counterparty) conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub tenant_id: i64,
    /// External contact address this thread is with.
    pub counterparty: String,
    pub display_name: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
    pub unread_count: i64,
    /// Whether the automated responder may reply in this thread.
    pub bot_enabled: bool,
    pub created_at: String,
}

/// A stored message, immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Internal UUID primary key.
    pub id: String,
    pub tenant_id: i64,
    /// Transport-assigned identifier, unique within the tenant.
    pub external_id: String,
    pub conversation_id: i64,
    pub sender_class: SenderClass,
    /// Whether this system's tenant account originated the message.
    pub from_me: bool,
    /// Whether this system generated the message.
    pub automated: bool,
    pub content: String,
    pub kind: MessageKind,
    pub is_read: bool,
    pub created_at: String,
}

/// Outcome of an idempotent message insert.
#[derive(Debug, Clone)]
pub enum MessageInsert {
    /// The row was newly written.
    Inserted(StoredMessage),
    /// A row with the same `(tenant_id, external_id)` already existed;
    /// the existing record is returned, never an error.
    Duplicate(StoredMessage),
}

impl MessageInsert {
    /// The stored record, whether new or pre-existing.
    pub fn record(&self) -> &StoredMessage {
        match self {
            MessageInsert::Inserted(m) | MessageInsert::Duplicate(m) => m,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, MessageInsert::Duplicate(_))
    }
}

/// Current ISO 8601 timestamp with millisecond precision.
pub fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
