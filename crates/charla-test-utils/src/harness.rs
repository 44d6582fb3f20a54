// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles the complete automation stack -- mock transport,
//! mock completion, temp SQLite database, session manager, pipeline, and
//! orchestrator -- and runs the engine loop in the background. Tests drive
//! it by pushing transport events and asserting on recorded sends.

use std::sync::Arc;
use std::time::Duration;

use charla_config::model::{
    PipelineConfig, ResponderConfig, SessionConfig, StorageConfig,
};
use charla_core::types::{
    now_iso, ChangeEvent, MessageEvent, MessageKind, Tenant, TenantStatus, TransportEvent,
};
use charla_core::{
    CharlaError, CompletionAdapter, StorageAdapter, TenantId, TransportAdapter,
};
use charla_engine::{
    AutomationEngine, DedupCache, MessageClassifier, MessagePipeline, ResponseOrchestrator,
};
use charla_quota::QuotaLedger;
use charla_session::SessionManager;
use charla_storage::SqliteStorage;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::mock_completion::MockCompletion;
use crate::mock_transport::MockTransport;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    message_limit: i64,
    message_usage: i64,
    token_limit: i64,
    token_usage: i64,
    tenant_status: TenantStatus,
    system_prompt: Option<String>,
    work_start_hour: u8,
    work_end_hour: u8,
    work_days: String,
    transport_script: Vec<TransportEvent>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            message_limit: 100,
            message_usage: 0,
            token_limit: 100_000,
            token_usage: 0,
            tenant_status: TenantStatus::Active,
            system_prompt: None,
            work_start_hour: 0,
            work_end_hour: 24,
            work_days: String::new(),
            transport_script: vec![TransportEvent::Ready {
                phone: "5511999990000".to_string(),
            }],
        }
    }

    /// Set the tenant's monthly quota limits.
    pub fn with_quota(mut self, message_limit: i64, token_limit: i64) -> Self {
        self.message_limit = message_limit;
        self.token_limit = token_limit;
        self
    }

    /// Pre-set the tenant's usage counters.
    pub fn with_usage(mut self, message_usage: i64, token_usage: i64) -> Self {
        self.message_usage = message_usage;
        self.token_usage = token_usage;
        self
    }

    /// Set the tenant's lifecycle status.
    pub fn with_tenant_status(mut self, status: TenantStatus) -> Self {
        self.tenant_status = status;
        self
    }

    /// Set a per-tenant system prompt.
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = Some(prompt.to_string());
        self
    }

    /// Set the tenant's working window.
    pub fn with_working_hours(mut self, start: u8, end: u8, days: &str) -> Self {
        self.work_start_hour = start;
        self.work_end_hour = end;
        self.work_days = days.to_string();
        self
    }

    /// Replace the transport event script played on each session open.
    pub fn with_transport_script(mut self, script: Vec<TransportEvent>) -> Self {
        self.transport_script = script;
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(self) -> Result<TestHarness, CharlaError> {
        let temp_dir = tempfile::TempDir::new().map_err(|e| CharlaError::Storage {
            source: e.into(),
        })?;
        let db_path = temp_dir.path().join("harness.db");
        let db_path_str = db_path.to_string_lossy().to_string();

        let storage = SqliteStorage::new(StorageConfig {
            database_path: db_path_str.clone(),
            wal_mode: true,
        });
        storage.initialize().await?;
        let storage: Arc<dyn StorageAdapter + Send + Sync> = Arc::new(storage);

        let tenant = Tenant {
            id: 0,
            code: "harness".to_string(),
            name: "Harness Tenant".to_string(),
            status: self.tenant_status,
            message_limit: self.message_limit,
            message_usage: self.message_usage,
            token_limit: self.token_limit,
            token_usage: self.token_usage,
            usage_reset_at: now_iso(),
            system_prompt: self.system_prompt,
            work_start_hour: self.work_start_hour,
            work_end_hour: self.work_end_hour,
            work_days: self.work_days,
            created_at: now_iso(),
        };
        let tenant_id = storage.create_tenant(&tenant).await?;

        let quota = Arc::new(QuotaLedger::open(&db_path_str).await?);
        let transport = Arc::new(MockTransport::with_script(self.transport_script));
        let completion = Arc::new(MockCompletion::new());

        let session_config = SessionConfig {
            data_dir: temp_dir
                .path()
                .join("sessions")
                .to_string_lossy()
                .to_string(),
            connect_timeout_secs: 5,
            send_timeout_secs: 2,
            send_retries: 3,
            send_backoff_ms: 10,
            qr_validity_secs: 300,
            staleness_secs: 3600,
            settle_ms: 10,
            tag_capacity: 64,
        };

        let (ingest_tx, ingest_rx) = mpsc::channel(256);
        let (changes, changes_rx) = broadcast::channel(256);

        let transport_adapter: Arc<dyn TransportAdapter + Send + Sync> = transport.clone();
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&storage),
            transport_adapter,
            session_config,
            ingest_tx,
            changes.clone(),
        ));

        let pipeline_config = PipelineConfig::default();
        let classifier = MessageClassifier::new(
            sessions.automated_tags(),
            sessions.last_inbound(),
            &pipeline_config,
        );
        let dedup = Arc::new(DedupCache::new(Duration::from_secs(
            pipeline_config.dedup_ttl_secs,
        )));
        let pipeline = MessagePipeline::new(
            Arc::clone(&storage),
            dedup,
            classifier,
            sessions.last_inbound(),
            changes.clone(),
        );

        let completion_adapter: Arc<dyn CompletionAdapter + Send + Sync> =
            completion.clone();
        let orchestrator = ResponseOrchestrator::new(
            Arc::clone(&storage),
            Arc::clone(&quota),
            Arc::clone(&sessions),
            completion_adapter,
            ResponderConfig::default(),
        );

        let engine = AutomationEngine::new(pipeline, orchestrator, ingest_rx, changes.clone());
        let cancel = CancellationToken::new();
        let engine_task = tokio::spawn(engine.run(cancel.clone()));

        Ok(TestHarness {
            storage,
            sessions,
            quota,
            transport,
            completion,
            changes,
            changes_rx: tokio::sync::Mutex::new(changes_rx),
            tenant_id,
            cancel,
            engine_task,
            _temp_dir: temp_dir,
        })
    }
}

/// A fully wired automation stack on mock collaborators.
pub struct TestHarness {
    pub storage: Arc<dyn StorageAdapter + Send + Sync>,
    pub sessions: Arc<SessionManager>,
    pub quota: Arc<QuotaLedger>,
    pub transport: Arc<MockTransport>,
    pub completion: Arc<MockCompletion>,
    pub changes: broadcast::Sender<ChangeEvent>,
    changes_rx: tokio::sync::Mutex<broadcast::Receiver<ChangeEvent>>,
    pub tenant_id: i64,
    cancel: CancellationToken,
    engine_task: JoinHandle<()>,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    pub fn tenant(&self) -> TenantId {
        TenantId(self.tenant_id)
    }

    /// Push an inbound text message from `counterparty` into the live session.
    pub fn push_inbound(&self, external_id: &str, counterparty: &str, body: &str) -> bool {
        self.transport.push_event(
            self.tenant_id,
            TransportEvent::Message(MessageEvent {
                id: external_id.to_string(),
                chat: counterparty.to_string(),
                sender: counterparty.to_string(),
                from_me: false,
                body: body.to_string(),
                kind: MessageKind::Text,
                timestamp: Utc::now(),
            }),
        )
    }

    /// Push an own-account (operator-style) message into the live session.
    pub fn push_outbound(&self, external_id: &str, counterparty: &str, body: &str) -> bool {
        self.transport.push_event(
            self.tenant_id,
            TransportEvent::Message(MessageEvent {
                id: external_id.to_string(),
                chat: counterparty.to_string(),
                sender: "self".to_string(),
                from_me: true,
                body: body.to_string(),
                kind: MessageKind::Text,
                timestamp: Utc::now(),
            }),
        )
    }

    /// Discard all change events received so far, so the next
    /// [`wait_for_change`] only matches fresh ones.
    ///
    /// [`wait_for_change`]: TestHarness::wait_for_change
    pub async fn drain_changes(&self) {
        let mut rx = self.changes_rx.lock().await;
        loop {
            match rx.try_recv() {
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }

    /// Wait until a change event matching `pred` arrives.
    pub async fn wait_for_change<F>(&self, pred: F, timeout: Duration) -> bool
    where
        F: Fn(&ChangeEvent) -> bool,
    {
        let mut rx = self.changes_rx.lock().await;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(event)) if pred(&event) => return true,
                Ok(Ok(_)) => continue,
                Ok(Err(_)) | Err(_) => return false,
            }
        }
    }

    /// Stop the engine loop and release the stack.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.engine_task.await;
        let _ = self.storage.close().await;
    }
}

/// Poll `pred` until it holds or `timeout` elapses.
pub async fn wait_until<F>(pred: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    pred()
}
