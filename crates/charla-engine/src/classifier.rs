// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sender classification for raw message events.
//!
//! Classification evidence, in order of precedence:
//! 1. The event id is in the tenant's automated-send tag set, or the
//!    content carries the reserved marker prefix -> automated agent.
//! 2. An own-account send landing within the auto-reply window of the
//!    counterparty's last inbound corroborates automated origin when the
//!    marker is absent.
//! 3. Any other own-account send is the tenant's human operator.
//! 4. Everything else is an external contact.
//!
//! The tag set is the authoritative mechanism; the content marker is a
//! documented fallback contract for sends that bypassed the manager.

use std::sync::Arc;
use std::time::Duration;

use charla_config::model::PipelineConfig;
use charla_core::types::MessageEvent;
use charla_core::SenderClass;
use charla_session::{AutomatedSendTags, LastInboundTracker};

/// Reserved zero-width prefix marking automated content.
///
/// Invisible in rendered chats; present only when a send could not be
/// tagged through the id set.
pub const AUTOMATED_CONTENT_MARKER: &str = "\u{200b}\u{200b}";

/// System address for broadcast/status traffic. Filtered before
/// classification; never produces a stored message.
pub const BROADCAST_ADDRESS: &str = "status@broadcast";

/// Whether an event is broadcast/status traffic.
pub fn is_broadcast(event: &MessageEvent) -> bool {
    event.chat == BROADCAST_ADDRESS || event.sender == BROADCAST_ADDRESS
}

/// Classifies raw message events into sender classes.
pub struct MessageClassifier {
    tags: Arc<AutomatedSendTags>,
    last_inbound: Arc<LastInboundTracker>,
    auto_reply_window: Duration,
}

impl MessageClassifier {
    pub fn new(
        tags: Arc<AutomatedSendTags>,
        last_inbound: Arc<LastInboundTracker>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            tags,
            last_inbound,
            auto_reply_window: Duration::from_millis(config.auto_reply_window_ms),
        }
    }

    /// Decide the sender class of an event for a tenant.
    pub fn classify(&self, tenant: i64, event: &MessageEvent) -> SenderClass {
        let tagged = self.tags.contains(tenant, &event.id);
        let marked = event.body.starts_with(AUTOMATED_CONTENT_MARKER);
        if tagged || marked {
            return SenderClass::AutomatedAgent;
        }

        if event.from_me {
            if self.replied_within_window(tenant, &event.chat) {
                return SenderClass::AutomatedAgent;
            }
            return SenderClass::TenantOperator;
        }

        SenderClass::ExternalContact
    }

    fn replied_within_window(&self, tenant: i64, counterparty: &str) -> bool {
        match self.last_inbound.elapsed_ms(tenant, counterparty) {
            Some(elapsed_ms) if elapsed_ms >= 0 => {
                (elapsed_ms as u128) <= self.auto_reply_window.as_millis()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charla_core::types::MessageKind;
    use chrono::{TimeDelta, Utc};

    fn classifier() -> (MessageClassifier, Arc<AutomatedSendTags>, Arc<LastInboundTracker>) {
        let tags = Arc::new(AutomatedSendTags::new());
        let last_inbound = Arc::new(LastInboundTracker::new());
        let config = PipelineConfig::default(); // 2000 ms window
        let classifier =
            MessageClassifier::new(Arc::clone(&tags), Arc::clone(&last_inbound), &config);
        (classifier, tags, last_inbound)
    }

    fn event(id: &str, from_me: bool, body: &str) -> MessageEvent {
        MessageEvent {
            id: id.to_string(),
            chat: "contact-1".to_string(),
            sender: if from_me { "self".to_string() } else { "contact-1".to_string() },
            from_me,
            body: body.to_string(),
            kind: MessageKind::Text,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn tagged_id_wins_over_everything() {
        let (classifier, tags, _) = classifier();
        tags.insert(1, "msg-1", 8);

        let class = classifier.classify(1, &event("msg-1", true, "plain text"));
        assert_eq!(class, SenderClass::AutomatedAgent);
    }

    #[test]
    fn marker_prefix_classifies_as_automated() {
        let (classifier, _, _) = classifier();
        let body = format!("{AUTOMATED_CONTENT_MARKER}Thanks for reaching out!");
        let class = classifier.classify(1, &event("msg-2", true, &body));
        assert_eq!(class, SenderClass::AutomatedAgent);
    }

    #[test]
    fn own_send_without_evidence_is_operator() {
        let (classifier, _, _) = classifier();
        let class = classifier.classify(1, &event("msg-3", true, "I'll handle this one"));
        assert_eq!(class, SenderClass::TenantOperator);
    }

    #[test]
    fn inbound_is_external_contact() {
        let (classifier, _, _) = classifier();
        let class = classifier.classify(1, &event("msg-4", false, "hello"));
        assert_eq!(class, SenderClass::ExternalContact);
    }

    #[test]
    fn fast_reply_corroborates_automated_origin() {
        let (classifier, _, last_inbound) = classifier();
        last_inbound.record_at(1, "contact-1", Utc::now() - TimeDelta::milliseconds(500));

        let class = classifier.classify(1, &event("msg-5", true, "auto-ish reply"));
        assert_eq!(class, SenderClass::AutomatedAgent);
    }

    #[test]
    fn slow_reply_is_operator() {
        let (classifier, _, last_inbound) = classifier();
        last_inbound.record_at(1, "contact-1", Utc::now() - TimeDelta::seconds(30));

        let class = classifier.classify(1, &event("msg-6", true, "typed by a human"));
        assert_eq!(class, SenderClass::TenantOperator);
    }

    #[test]
    fn timing_never_applies_to_inbound() {
        let (classifier, _, last_inbound) = classifier();
        last_inbound.record_at(1, "contact-1", Utc::now() - TimeDelta::milliseconds(100));

        let class = classifier.classify(1, &event("msg-7", false, "quick follow-up"));
        assert_eq!(class, SenderClass::ExternalContact);
    }

    #[test]
    fn broadcast_traffic_is_detected() {
        let mut ev = event("msg-8", false, "status update");
        ev.chat = BROADCAST_ADDRESS.to_string();
        assert!(is_broadcast(&ev));

        let ev = event("msg-9", false, "normal");
        assert!(!is_broadcast(&ev));
    }
}
