// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `serve` subcommand: wire the full automation stack and run until
//! interrupted.
//!
//! The upward CRUD/API surface embeds [`SessionManager`] and
//! [`QuotaLedger`] directly; this process hosts the engine loop, the
//! bridge transport, and persistence.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use charla_bridge::BridgeTransport;
use charla_config::model::CharlaConfig;
use charla_core::traits::{Completion, CompletionAdapter, CompletionTurn};
use charla_core::types::{AdapterType, HealthStatus};
use charla_core::{CharlaError, PluginAdapter, StorageAdapter, TransportAdapter};
use charla_engine::{
    AutomationEngine, DedupCache, MessageClassifier, MessagePipeline, ResponseOrchestrator,
};
use charla_quota::QuotaLedger;
use charla_session::SessionManager;
use charla_storage::SqliteStorage;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Placeholder completion collaborator used when no provider is wired.
///
/// Always answers with empty text, which the orchestrator treats as
/// "do not reply", so ingestion and manual messaging keep working while
/// automated replies stay off.
struct DisabledCompletion;

#[async_trait]
impl PluginAdapter for DisabledCompletion {
    fn name(&self) -> &str {
        "disabled"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Completion
    }

    async fn health_check(&self) -> Result<HealthStatus, CharlaError> {
        Ok(HealthStatus::Degraded("no completion provider".into()))
    }

    async fn shutdown(&self) -> Result<(), CharlaError> {
        Ok(())
    }
}

#[async_trait]
impl CompletionAdapter for DisabledCompletion {
    async fn complete(
        &self,
        _system_prompt: &str,
        _history: &[CompletionTurn],
        _question: &str,
    ) -> Result<Completion, CharlaError> {
        Ok(Completion {
            text: String::new(),
            token_cost: 0,
        })
    }
}

/// Run the automation engine until SIGINT.
pub async fn run(config: CharlaConfig) -> Result<(), CharlaError> {
    info!(service = %config.service.name, "starting charla");

    let storage = SqliteStorage::new(config.storage.clone());
    storage.initialize().await?;
    let storage: Arc<dyn StorageAdapter + Send + Sync> = Arc::new(storage);

    let quota = Arc::new(QuotaLedger::open(&config.storage.database_path).await?);

    let transport: Arc<dyn TransportAdapter + Send + Sync> =
        Arc::new(BridgeTransport::new(config.transport.clone())?);

    let (ingest_tx, ingest_rx) = mpsc::channel(1024);
    let (changes, _) = broadcast::channel(1024);

    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&storage),
        transport,
        config.session.clone(),
        ingest_tx,
        changes.clone(),
    ));

    let classifier = MessageClassifier::new(
        sessions.automated_tags(),
        sessions.last_inbound(),
        &config.pipeline,
    );
    let dedup = Arc::new(DedupCache::new(Duration::from_secs(
        config.pipeline.dedup_ttl_secs,
    )));
    let pipeline = MessagePipeline::new(
        Arc::clone(&storage),
        dedup,
        classifier,
        sessions.last_inbound(),
        changes.clone(),
    );

    warn!("no completion provider configured; automated replies are disabled");
    let completion: Arc<dyn CompletionAdapter + Send + Sync> = Arc::new(DisabledCompletion);

    let orchestrator = ResponseOrchestrator::new(
        Arc::clone(&storage),
        Arc::clone(&quota),
        Arc::clone(&sessions),
        completion,
        config.responder.clone(),
    );

    let engine = AutomationEngine::new(pipeline, orchestrator, ingest_rx, changes);
    let cancel = CancellationToken::new();
    let engine_task = tokio::spawn(engine.run(cancel.clone()));

    info!("charla running; press ctrl-c to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }

    info!("shutting down");
    cancel.cancel();
    if let Err(e) = engine_task.await {
        warn!(error = %e, "engine task ended abnormally");
    }
    storage.close().await?;

    Ok(())
}
