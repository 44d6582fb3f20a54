// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message ingestion pipeline.
//!
//! Per event: broadcast filter -> dedup claim -> classification ->
//! idempotent message insert -> conversation update -> change
//! notification. A processing error releases the dedup claim so a
//! legitimate redelivery can retry.

use std::sync::Arc;

use charla_core::types::{
    ChangeEvent, Conversation, InboundEnvelope, StoredMessage, TenantId,
};
use charla_core::{CharlaError, SenderClass, StorageAdapter};
use charla_session::LastInboundTracker;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::classifier::{self, MessageClassifier};
use crate::dedup::DedupCache;

/// An inbound external-contact message that survived the pipeline and is a
/// candidate for an automated reply.
#[derive(Debug, Clone)]
pub struct ClassifiedMessage {
    pub tenant: TenantId,
    pub conversation: Conversation,
    pub message: StoredMessage,
    pub sender_class: SenderClass,
}

/// The ingestion pipeline shared by all tenant event streams.
pub struct MessagePipeline {
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    dedup: Arc<DedupCache>,
    classifier: MessageClassifier,
    last_inbound: Arc<LastInboundTracker>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl MessagePipeline {
    pub fn new(
        storage: Arc<dyn StorageAdapter + Send + Sync>,
        dedup: Arc<DedupCache>,
        classifier: MessageClassifier,
        last_inbound: Arc<LastInboundTracker>,
        changes: broadcast::Sender<ChangeEvent>,
    ) -> Self {
        Self {
            storage,
            dedup,
            classifier,
            last_inbound,
            changes,
        }
    }

    /// Ingest one raw message event.
    ///
    /// Returns the classified message when it is an inbound external
    /// contact message eligible for the orchestrator, `None` for anything
    /// filtered, duplicated, or self-originated.
    pub async fn ingest(
        &self,
        envelope: &InboundEnvelope,
    ) -> Result<Option<ClassifiedMessage>, CharlaError> {
        let event = &envelope.event;

        if classifier::is_broadcast(event) {
            debug!(tenant = %envelope.tenant, "broadcast traffic filtered");
            return Ok(None);
        }

        if !self.dedup.try_claim(envelope.tenant.0, &event.id) {
            debug!(
                tenant = %envelope.tenant,
                external_id = %event.id,
                "duplicate delivery skipped"
            );
            return Ok(None);
        }

        match self.process(envelope).await {
            Ok(result) => Ok(result),
            Err(e) => {
                // Release the claim so a redelivery can retry the work.
                self.dedup.release(envelope.tenant.0, &event.id);
                Err(e)
            }
        }
    }

    async fn process(
        &self,
        envelope: &InboundEnvelope,
    ) -> Result<Option<ClassifiedMessage>, CharlaError> {
        let tenant = envelope.tenant.0;
        let event = &envelope.event;
        let inbound = !event.from_me;

        let sender_class = self.classifier.classify(tenant, event);

        let conversation = self
            .storage
            .get_or_create_conversation(tenant, &event.chat, None)
            .await?;

        let stored = StoredMessage {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant,
            external_id: event.id.clone(),
            conversation_id: conversation.id,
            sender_class,
            from_me: event.from_me,
            automated: sender_class == SenderClass::AutomatedAgent,
            content: event.body.clone(),
            kind: event.kind,
            is_read: event.from_me,
            created_at: event
                .timestamp
                .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                .to_string(),
        };

        let insert = self.storage.insert_message(&stored).await?;
        if insert.is_duplicate() {
            debug!(
                tenant,
                external_id = %event.id,
                "replayed event resolved to existing message"
            );
            return Ok(None);
        }
        let message = insert.record().clone();

        self.storage
            .touch_conversation(conversation.id, &message.content, &message.created_at, inbound)
            .await?;

        if sender_class == SenderClass::TenantOperator && conversation.bot_enabled {
            // Manual intervention suppresses automation for this thread
            // until explicitly re-enabled.
            self.storage.set_bot_enabled(conversation.id, false).await?;
            info!(
                tenant,
                conversation = conversation.id,
                "operator message disabled automation for thread"
            );
        }

        if inbound {
            self.last_inbound.record(tenant, &event.chat);
        }

        // Refetch for an up-to-date snapshot after the writes above.
        let conversation = self
            .storage
            .get_conversation(conversation.id)
            .await?
            .unwrap_or(conversation);

        let _ = self.changes.send(ChangeEvent::MessageStored {
            tenant: envelope.tenant,
            conversation_id: conversation.id,
            message_id: message.id.clone(),
        });
        let _ = self.changes.send(ChangeEvent::ConversationUpdated {
            tenant: envelope.tenant,
            conversation_id: conversation.id,
        });

        if inbound && sender_class == SenderClass::ExternalContact {
            Ok(Some(ClassifiedMessage {
                tenant: envelope.tenant,
                conversation,
                message,
                sender_class,
            }))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charla_config::model::{PipelineConfig, StorageConfig};
    use charla_core::types::{now_iso, MessageEvent, MessageKind, Tenant, TenantStatus};
    use charla_session::AutomatedSendTags;
    use charla_storage::SqliteStorage;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::tempdir;

    struct Fixture {
        pipeline: MessagePipeline,
        storage: Arc<dyn StorageAdapter + Send + Sync>,
        tags: Arc<AutomatedSendTags>,
        tenant_id: i64,
        _dir: tempfile::TempDir,
    }

    async fn setup() -> Fixture {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("pipeline.db");
        let storage = SqliteStorage::new(StorageConfig {
            database_path: db_path.to_string_lossy().to_string(),
            wal_mode: true,
        });
        storage.initialize().await.unwrap();
        let storage: Arc<dyn StorageAdapter + Send + Sync> = Arc::new(storage);

        let tenant = Tenant {
            id: 0,
            code: "t1".into(),
            name: "Tenant One".into(),
            status: TenantStatus::Active,
            message_limit: 100,
            message_usage: 0,
            token_limit: 10_000,
            token_usage: 0,
            usage_reset_at: now_iso(),
            system_prompt: None,
            work_start_hour: 0,
            work_end_hour: 24,
            work_days: String::new(),
            created_at: now_iso(),
        };
        let tenant_id = storage.create_tenant(&tenant).await.unwrap();

        let tags = Arc::new(AutomatedSendTags::new());
        let last_inbound = Arc::new(LastInboundTracker::new());
        let config = PipelineConfig::default();
        let classifier =
            MessageClassifier::new(Arc::clone(&tags), Arc::clone(&last_inbound), &config);
        let dedup = Arc::new(DedupCache::new(Duration::from_secs(60)));
        let (changes, _) = broadcast::channel(64);

        let pipeline = MessagePipeline::new(
            Arc::clone(&storage),
            dedup,
            classifier,
            last_inbound,
            changes,
        );

        Fixture {
            pipeline,
            storage,
            tags,
            tenant_id,
            _dir: dir,
        }
    }

    fn inbound_event(id: &str, body: &str) -> MessageEvent {
        MessageEvent {
            id: id.to_string(),
            chat: "contact-1".to_string(),
            sender: "contact-1".to_string(),
            from_me: false,
            body: body.to_string(),
            kind: MessageKind::Text,
            timestamp: Utc::now(),
        }
    }

    fn outbound_event(id: &str, body: &str) -> MessageEvent {
        MessageEvent {
            id: id.to_string(),
            chat: "contact-1".to_string(),
            sender: "self".to_string(),
            from_me: true,
            body: body.to_string(),
            kind: MessageKind::Text,
            timestamp: Utc::now(),
        }
    }

    fn envelope(tenant: i64, event: MessageEvent) -> InboundEnvelope {
        InboundEnvelope {
            tenant: TenantId(tenant),
            event,
        }
    }

    #[tokio::test]
    async fn inbound_external_message_is_stored_and_eligible() {
        let fx = setup().await;

        let result = fx
            .pipeline
            .ingest(&envelope(fx.tenant_id, inbound_event("ext-1", "hello")))
            .await
            .unwrap();

        let classified = result.expect("inbound external message is eligible");
        assert_eq!(classified.sender_class, SenderClass::ExternalContact);
        assert_eq!(classified.conversation.unread_count, 1);
        assert!(classified.conversation.bot_enabled);

        let messages = fx
            .storage
            .recent_messages(classified.conversation.id, 10)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].external_id, "ext-1");
    }

    #[tokio::test]
    async fn replayed_event_yields_exactly_one_stored_message() {
        let fx = setup().await;
        let event = inbound_event("ext-dup", "hello again");

        let first = fx
            .pipeline
            .ingest(&envelope(fx.tenant_id, event.clone()))
            .await
            .unwrap();
        assert!(first.is_some());

        // Within the dedup window the replay is dropped at the claim.
        let second = fx
            .pipeline
            .ingest(&envelope(fx.tenant_id, event.clone()))
            .await
            .unwrap();
        assert!(second.is_none());

        // Even with a fresh claim (expired window simulated via release),
        // the unique external id resolves to the existing row.
        fx.pipeline.dedup.release(fx.tenant_id, "ext-dup");
        let third = fx
            .pipeline
            .ingest(&envelope(fx.tenant_id, event))
            .await
            .unwrap();
        assert!(third.is_none(), "duplicate insert must not re-trigger automation");

        let convo = fx
            .storage
            .get_or_create_conversation(fx.tenant_id, "contact-1", None)
            .await
            .unwrap();
        let messages = fx.storage.recent_messages(convo.id, 10).await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn operator_message_flips_bot_enabled() {
        let fx = setup().await;

        fx.pipeline
            .ingest(&envelope(fx.tenant_id, inbound_event("ext-1", "hi")))
            .await
            .unwrap();

        let result = fx
            .pipeline
            .ingest(&envelope(
                fx.tenant_id,
                outbound_event("out-1", "I'll take over from here"),
            ))
            .await
            .unwrap();
        assert!(result.is_none(), "operator messages are not auto-reply candidates");

        let convo = fx
            .storage
            .get_or_create_conversation(fx.tenant_id, "contact-1", None)
            .await
            .unwrap();
        assert!(!convo.bot_enabled, "manual message must disable the bot");
    }

    #[tokio::test]
    async fn tagged_outbound_message_keeps_bot_enabled() {
        let fx = setup().await;
        fx.tags.insert(fx.tenant_id, "out-auto", 8);

        let result = fx
            .pipeline
            .ingest(&envelope(
                fx.tenant_id,
                outbound_event("out-auto", "automated echo"),
            ))
            .await
            .unwrap();
        assert!(result.is_none());

        let convo = fx
            .storage
            .get_or_create_conversation(fx.tenant_id, "contact-1", None)
            .await
            .unwrap();
        assert!(convo.bot_enabled, "automated echoes must not disable the bot");

        let messages = fx.storage.recent_messages(convo.id, 10).await.unwrap();
        assert!(messages[0].automated);
    }

    #[tokio::test]
    async fn broadcast_traffic_is_never_stored() {
        let fx = setup().await;
        let mut event = inbound_event("ext-status", "status update");
        event.chat = classifier::BROADCAST_ADDRESS.to_string();

        let result = fx
            .pipeline
            .ingest(&envelope(fx.tenant_id, event))
            .await
            .unwrap();
        assert!(result.is_none());

        let conversations = fx.storage.list_conversations(fx.tenant_id).await.unwrap();
        assert!(conversations.is_empty(), "no conversation for broadcast traffic");
    }
}
