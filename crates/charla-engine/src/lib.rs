// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ingestion and automation engine for Charla.
//!
//! The [`AutomationEngine`] consumes the session manager's inbound
//! envelope stream, runs each event through the [`MessagePipeline`], and
//! hands eligible messages to the [`ResponseOrchestrator`]. Pipeline
//! errors are logged per event; nothing thrown here stops the loop.

pub mod classifier;
pub mod dedup;
pub mod orchestrator;
pub mod pipeline;
pub mod working_hours;

use charla_core::types::{ChangeEvent, InboundEnvelope};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use classifier::{MessageClassifier, AUTOMATED_CONTENT_MARKER, BROADCAST_ADDRESS};
pub use dedup::DedupCache;
pub use orchestrator::ResponseOrchestrator;
pub use pipeline::{ClassifiedMessage, MessagePipeline};

/// The engine loop tying pipeline and orchestrator to the inbound stream.
pub struct AutomationEngine {
    pipeline: MessagePipeline,
    orchestrator: ResponseOrchestrator,
    ingest_rx: mpsc::Receiver<InboundEnvelope>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl AutomationEngine {
    pub fn new(
        pipeline: MessagePipeline,
        orchestrator: ResponseOrchestrator,
        ingest_rx: mpsc::Receiver<InboundEnvelope>,
        changes: broadcast::Sender<ChangeEvent>,
    ) -> Self {
        Self {
            pipeline,
            orchestrator,
            ingest_rx,
            changes,
        }
    }

    /// Subscription point for conversation/message/status notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    /// Run until the cancellation token fires or the ingest stream closes.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("automation engine running");

        loop {
            tokio::select! {
                envelope = self.ingest_rx.recv() => {
                    match envelope {
                        Some(envelope) => {
                            match self.pipeline.ingest(&envelope).await {
                                Ok(Some(classified)) => {
                                    self.orchestrator.process(&classified).await;
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    warn!(
                                        tenant = %envelope.tenant,
                                        external_id = %envelope.event.id,
                                        error = %e,
                                        "message ingestion failed"
                                    );
                                }
                            }
                        }
                        None => {
                            info!("ingest channel closed, stopping engine");
                            break;
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    info!("shutdown signal received, stopping engine");
                    break;
                }
            }
        }
    }
}
