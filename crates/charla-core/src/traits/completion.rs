// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Completion adapter trait for the text-completion collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CharlaError;
use crate::traits::adapter::PluginAdapter;

/// One prior turn of a conversation, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionTurn {
    /// `user` for the external contact, `assistant` for replies.
    pub role: String,
    pub content: String,
}

/// Result of a completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// Response text. Empty text means "do not reply".
    pub text: String,
    /// Token cost charged against the tenant's token quota.
    pub token_cost: u32,
}

/// Adapter for the opaque text-completion collaborator.
#[async_trait]
pub trait CompletionAdapter: PluginAdapter {
    /// Produces a reply to `question` given the system prompt and a bounded
    /// window of prior turns.
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[CompletionTurn],
        question: &str,
    ) -> Result<Completion, CharlaError>;
}
