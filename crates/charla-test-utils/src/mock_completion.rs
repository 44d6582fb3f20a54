// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock completion adapter for deterministic testing.
//!
//! Responses pop from a FIFO queue; an empty queue yields a default reply.
//! Calls are recorded so tests can assert on prompts and history depth.

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use charla_core::traits::{Completion, CompletionAdapter, CompletionTurn};
use charla_core::types::{AdapterType, HealthStatus};
use charla_core::{CharlaError, PluginAdapter};

/// A recorded completion invocation.
#[derive(Debug, Clone)]
pub struct CompletionCall {
    pub system_prompt: String,
    pub history_len: usize,
    pub question: String,
}

/// Mock completion collaborator with queued responses.
pub struct MockCompletion {
    responses: StdMutex<VecDeque<Completion>>,
    calls: StdMutex<Vec<CompletionCall>>,
    fail_next: StdMutex<Option<String>>,
}

impl MockCompletion {
    pub fn new() -> Self {
        Self {
            responses: StdMutex::new(VecDeque::new()),
            calls: StdMutex::new(Vec::new()),
            fail_next: StdMutex::new(None),
        }
    }

    pub fn with_responses(responses: Vec<Completion>) -> Self {
        let mock = Self::new();
        *mock.responses.lock().expect("responses lock") = VecDeque::from(responses);
        mock
    }

    /// Queue a response.
    pub fn push_response(&self, text: &str, token_cost: u32) {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(Completion {
                text: text.to_string(),
                token_cost,
            });
    }

    /// Make the next call fail with a completion error.
    pub fn fail_next(&self, message: &str) {
        *self.fail_next.lock().expect("fail_next lock") = Some(message.to_string());
    }

    /// All recorded calls.
    pub fn calls(&self) -> Vec<CompletionCall> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl Default for MockCompletion {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockCompletion {
    fn name(&self) -> &str {
        "mock-completion"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Completion
    }

    async fn health_check(&self) -> Result<HealthStatus, CharlaError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), CharlaError> {
        Ok(())
    }
}

#[async_trait]
impl CompletionAdapter for MockCompletion {
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[CompletionTurn],
        question: &str,
    ) -> Result<Completion, CharlaError> {
        self.calls.lock().expect("calls lock").push(CompletionCall {
            system_prompt: system_prompt.to_string(),
            history_len: history.len(),
            question: question.to_string(),
        });

        if let Some(message) = self.fail_next.lock().expect("fail_next lock").take() {
            return Err(CharlaError::Completion {
                message,
                source: None,
            });
        }

        let queued = self.responses.lock().expect("responses lock").pop_front();
        Ok(queued.unwrap_or(Completion {
            text: "mock reply".to_string(),
            token_cost: 42,
        }))
    }
}
