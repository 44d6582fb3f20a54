// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared high-churn tracking structures used by the event-delivery path.
//!
//! Both structures are written from every tenant's event stream and read by
//! the classifier, so they use concurrent maps with bounded growth instead
//! of per-tenant locks.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

/// Bounded per-tenant set of message ids this system sent as automation.
///
/// The authoritative tagging mechanism: an outbound message whose id is in
/// this set was generated by the automated agent, regardless of content.
/// Each tenant keeps only the most recent N ids.
#[derive(Debug, Default)]
pub struct AutomatedSendTags {
    tags: DashMap<i64, VecDeque<String>>,
}

impl AutomatedSendTags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag a message id as automation-originated, pruning to `capacity`.
    pub fn insert(&self, tenant: i64, message_id: &str, capacity: usize) {
        let mut ids = self.tags.entry(tenant).or_default();
        ids.push_back(message_id.to_string());
        while ids.len() > capacity {
            ids.pop_front();
        }
    }

    /// Whether the id was tagged (and not yet pruned).
    pub fn contains(&self, tenant: i64, message_id: &str) -> bool {
        self.tags
            .get(&tenant)
            .map(|ids| ids.iter().any(|id| id == message_id))
            .unwrap_or(false)
    }

    /// Drop all tags for a tenant (on disconnect/cleanup).
    pub fn clear_tenant(&self, tenant: i64) {
        self.tags.remove(&tenant);
    }

    /// Number of tags currently held for a tenant.
    pub fn len(&self, tenant: i64) -> usize {
        self.tags.get(&tenant).map(|ids| ids.len()).unwrap_or(0)
    }
}

/// Entries older than this many minutes are dropped during pruning.
const LAST_INBOUND_RETENTION_MINUTES: i64 = 10;

/// Prune when the tracker grows past this many entries.
const LAST_INBOUND_PRUNE_THRESHOLD: usize = 4096;

/// Timestamp of the most recent inbound message per (tenant, counterparty).
///
/// Feeds the classifier's timing heuristic: an own-account send landing
/// within a short window of the counterparty's last inbound corroborates
/// automated origin when the content marker is absent.
#[derive(Debug, Default)]
pub struct LastInboundTracker {
    seen: DashMap<(i64, String), DateTime<Utc>>,
}

impl LastInboundTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an inbound message from `counterparty` at the current instant.
    pub fn record(&self, tenant: i64, counterparty: &str) {
        self.record_at(tenant, counterparty, Utc::now());
    }

    /// Record an inbound message at an explicit instant.
    pub fn record_at(&self, tenant: i64, counterparty: &str, at: DateTime<Utc>) {
        self.seen.insert((tenant, counterparty.to_string()), at);
        if self.seen.len() > LAST_INBOUND_PRUNE_THRESHOLD {
            let cutoff = Utc::now() - TimeDelta::minutes(LAST_INBOUND_RETENTION_MINUTES);
            self.seen.retain(|_, seen_at| *seen_at > cutoff);
        }
    }

    /// Milliseconds since the last inbound from `counterparty`, if any.
    pub fn elapsed_ms(&self, tenant: i64, counterparty: &str) -> Option<i64> {
        self.seen
            .get(&(tenant, counterparty.to_string()))
            .map(|seen_at| (Utc::now() - *seen_at).num_milliseconds())
    }

    /// Drop all entries for a tenant (on disconnect/cleanup).
    pub fn clear_tenant(&self, tenant: i64) {
        self.seen.retain(|(t, _), _| *t != tenant);
    }
}
