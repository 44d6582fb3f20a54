// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Quota-gated automated-response orchestration.
//!
//! A linear pipeline with early-exit guards, not a state machine:
//! bot flag -> tenant status -> quota -> working hours -> completion ->
//! send -> post-send quota commit. Every failure inside the guarded span
//! is logged and contained; it must never disturb the surrounding
//! ingestion path.

use std::sync::Arc;

use charla_config::model::ResponderConfig;
use charla_core::traits::{Completion, CompletionAdapter, CompletionTurn};
use charla_core::types::TenantStatus;
use charla_core::{CharlaError, StorageAdapter};
use charla_quota::QuotaLedger;
use charla_session::SessionManager;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::pipeline::ClassifiedMessage;
use crate::working_hours;

/// Map a stored message to its completion role.
pub(crate) fn turn_role(from_me: bool) -> &'static str {
    if from_me {
        "assistant"
    } else {
        "user"
    }
}

/// Decides, per classified inbound message, whether to produce and send an
/// automated reply.
pub struct ResponseOrchestrator {
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    quota: Arc<QuotaLedger>,
    sessions: Arc<SessionManager>,
    completion: Arc<dyn CompletionAdapter + Send + Sync>,
    config: ResponderConfig,
}

impl ResponseOrchestrator {
    pub fn new(
        storage: Arc<dyn StorageAdapter + Send + Sync>,
        quota: Arc<QuotaLedger>,
        sessions: Arc<SessionManager>,
        completion: Arc<dyn CompletionAdapter + Send + Sync>,
        config: ResponderConfig,
    ) -> Self {
        Self {
            storage,
            quota,
            sessions,
            completion,
            config,
        }
    }

    /// Contained entry point: errors are logged, never propagated, so one
    /// failed reply cannot block unrelated message handling.
    pub async fn process(&self, message: &ClassifiedMessage) {
        if let Err(e) = self.respond(message).await {
            warn!(
                tenant = %message.tenant,
                conversation = message.conversation.id,
                error = %e,
                "automated response failed"
            );
        }
    }

    async fn respond(&self, message: &ClassifiedMessage) -> Result<(), CharlaError> {
        // Re-read the thread: the bot flag may have flipped since ingestion.
        let Some(conversation) = self.storage.get_conversation(message.conversation.id).await?
        else {
            return Ok(());
        };
        if !conversation.bot_enabled {
            debug!(
                tenant = %message.tenant,
                conversation = conversation.id,
                "automation disabled for thread, skipping"
            );
            return Ok(());
        }

        let Some(tenant) = self.storage.get_tenant(message.tenant.0).await? else {
            return Ok(());
        };
        if tenant.status != TenantStatus::Active {
            debug!(tenant = %message.tenant, status = %tenant.status, "tenant not active, skipping");
            return Ok(());
        }

        // Quota exhaustion is a skip, not an error.
        let quota = self.quota.check_available(tenant.id).await?;
        if !quota.available {
            info!(
                tenant = %message.tenant,
                message_usage = quota.messages.usage,
                message_limit = quota.messages.limit,
                token_usage = quota.tokens.usage,
                token_limit = quota.tokens.limit,
                "quota exhausted, skipping automated reply"
            );
            return Ok(());
        }

        if !working_hours::within_working_hours(&tenant, Utc::now()) {
            debug!(tenant = %message.tenant, "outside working hours, skipping");
            return Ok(());
        }

        let history = self
            .build_history(conversation.id, &message.message.id)
            .await?;
        let system_prompt = tenant
            .system_prompt
            .clone()
            .unwrap_or_else(|| self.config.default_system_prompt.clone());

        let Completion { text, token_cost } = self
            .completion
            .complete(&system_prompt, &history, &message.message.content)
            .await?;

        if text.trim().is_empty() {
            debug!(tenant = %message.tenant, "empty completion, nothing to send");
            return Ok(());
        }

        let sent = self
            .sessions
            .send(message.tenant, &conversation.counterparty, &text, true)
            .await?;

        // Commit only after the confirmed send so a failed send is never
        // charged.
        let outcome = self
            .quota
            .check_and_consume(tenant.id, 1, i64::from(token_cost))
            .await?;
        if !outcome.consumed {
            warn!(
                tenant = %message.tenant,
                "reply sent but quota was exhausted by a concurrent consumer"
            );
        }

        info!(
            tenant = %message.tenant,
            conversation = conversation.id,
            message_id = %sent.0,
            token_cost,
            "automated reply delivered"
        );
        Ok(())
    }

    /// Most recent turns of the thread, oldest first, excluding the
    /// message being answered.
    async fn build_history(
        &self,
        conversation_id: i64,
        exclude_message_id: &str,
    ) -> Result<Vec<CompletionTurn>, CharlaError> {
        let recent = self
            .storage
            .recent_messages(conversation_id, self.config.history_turns as i64 + 1)
            .await?;

        Ok(recent
            .into_iter()
            .filter(|m| m.id != exclude_message_id)
            .map(|m| CompletionTurn {
                role: turn_role(m.from_me).to_string(),
                content: m.content,
            })
            .take(self.config.history_turns)
            .collect())
    }
}
