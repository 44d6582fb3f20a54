// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Short-TTL claim cache preventing double-processing of redelivered events.
//!
//! The transport may deliver the same message event more than once. A claim
//! is an atomic check-and-insert; whichever event stream claims first
//! processes the message, later deliveries within the window are skipped.
//! Claims expire after a fixed window regardless of processing outcome, and
//! are released early on processing error so a legitimate retry can pass.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Prune expired claims once the cache grows past this many entries.
const PRUNE_THRESHOLD: usize = 4096;

/// Concurrent TTL claim set keyed by `(tenant, external message id)`.
pub struct DedupCache {
    entries: DashMap<String, Instant>,
    ttl: Duration,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    fn key(tenant: i64, external_id: &str) -> String {
        format!("{tenant}:{external_id}")
    }

    /// Atomically check-and-insert a claim.
    ///
    /// Returns `false` when the id was already claimed within the window;
    /// the caller must then skip processing. An expired claim is reclaimed
    /// in place.
    pub fn try_claim(&self, tenant: i64, external_id: &str) -> bool {
        if self.entries.len() > PRUNE_THRESHOLD {
            self.entries.retain(|_, claimed_at| claimed_at.elapsed() < self.ttl);
        }

        match self.entries.entry(Self::key(tenant, external_id)) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().elapsed() >= self.ttl {
                    occupied.insert(Instant::now());
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Instant::now());
                true
            }
        }
    }

    /// Drop a claim immediately so a redelivery can be processed.
    pub fn release(&self, tenant: i64, external_id: &str) {
        self.entries.remove(&Self::key(tenant, external_id));
    }

    /// Number of live claims (including not-yet-pruned expired ones).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
