// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage adapter trait for the persistence collaborator.
//!
//! All operations are idempotent on unique identifiers; in particular,
//! message insertion resolves duplicate external identifiers to the
//! existing row instead of erroring.

use async_trait::async_trait;

use crate::error::CharlaError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{
    Conversation, MessageInsert, SessionRecord, StoredMessage, Tenant,
};

/// Adapter for storage and persistence backends.
#[async_trait]
pub trait StorageAdapter: PluginAdapter {
    /// Initializes the storage backend (migrations, connection, etc.).
    async fn initialize(&self) -> Result<(), CharlaError>;

    /// Closes the storage backend, flushing pending writes.
    async fn close(&self) -> Result<(), CharlaError>;

    // --- Tenant operations ---

    /// Creates a tenant and returns its assigned numeric id.
    async fn create_tenant(&self, tenant: &Tenant) -> Result<i64, CharlaError>;

    async fn get_tenant(&self, id: i64) -> Result<Option<Tenant>, CharlaError>;

    async fn get_tenant_by_code(&self, code: &str) -> Result<Option<Tenant>, CharlaError>;

    // --- Session status operations ---

    /// Inserts or updates the persisted session status for a tenant.
    async fn upsert_session_record(
        &self,
        tenant_id: i64,
        state: &str,
        phone: Option<&str>,
        last_error: Option<&str>,
    ) -> Result<(), CharlaError>;

    async fn get_session_record(
        &self,
        tenant_id: i64,
    ) -> Result<Option<SessionRecord>, CharlaError>;

    // --- Conversation operations ---

    /// Returns the conversation for `(tenant_id, counterparty)`, creating
    /// it with `bot_enabled = true` if it does not exist.
    async fn get_or_create_conversation(
        &self,
        tenant_id: i64,
        counterparty: &str,
        display_name: Option<&str>,
    ) -> Result<Conversation, CharlaError>;

    async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>, CharlaError>;

    async fn list_conversations(&self, tenant_id: i64) -> Result<Vec<Conversation>, CharlaError>;

    /// Updates the last-message snapshot, optionally incrementing the
    /// unread counter.
    async fn touch_conversation(
        &self,
        id: i64,
        last_message: &str,
        last_message_at: &str,
        increment_unread: bool,
    ) -> Result<(), CharlaError>;

    async fn set_bot_enabled(&self, id: i64, enabled: bool) -> Result<(), CharlaError>;

    async fn mark_conversation_read(&self, id: i64) -> Result<(), CharlaError>;

    // --- Message operations ---

    /// Idempotent insert keyed on `(tenant_id, external_id)`; a duplicate
    /// arrival resolves to the existing record.
    async fn insert_message(&self, message: &StoredMessage) -> Result<MessageInsert, CharlaError>;

    /// Most recent messages of a conversation, oldest first, bounded by `limit`.
    async fn recent_messages(
        &self,
        conversation_id: i64,
        limit: i64,
    ) -> Result<Vec<StoredMessage>, CharlaError>;
}
