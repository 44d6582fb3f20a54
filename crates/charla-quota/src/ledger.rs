// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Quota ledger enforcing per-tenant monthly message and token ceilings.
//!
//! Both dimensions combine with AND semantics: automation is eligible only
//! while both remain under limit. Consumption is a single conditional
//! UPDATE against the tenant row -- never a read-then-write from
//! application code -- so concurrent consumers cannot both pass a check
//! against stale usage.

use charla_core::CharlaError;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Read-only view of one quota dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionUsage {
    pub available: bool,
    pub usage: i64,
    pub limit: i64,
    pub remaining: i64,
    /// round(usage / limit * 100); a zero limit reports 100.
    pub percentage: u32,
}

impl DimensionUsage {
    fn from_counts(usage: i64, limit: i64) -> Self {
        let available = limit > 0 && usage < limit;
        let remaining = (limit - usage).max(0);
        let percentage = if limit <= 0 {
            100
        } else {
            ((usage as f64 / limit as f64) * 100.0).round() as u32
        };
        Self {
            available,
            usage,
            limit,
            remaining,
            percentage,
        }
    }
}

/// Snapshot of both quota dimensions for a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub messages: DimensionUsage,
    pub tokens: DimensionUsage,
    /// True only when both dimensions are available.
    pub available: bool,
}

impl QuotaSnapshot {
    fn from_counts(message_usage: i64, message_limit: i64, token_usage: i64, token_limit: i64) -> Self {
        let messages = DimensionUsage::from_counts(message_usage, message_limit);
        let tokens = DimensionUsage::from_counts(token_usage, token_limit);
        let available = messages.available && tokens.available;
        Self {
            messages,
            tokens,
            available,
        }
    }
}

/// Outcome of a consume attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeOutcome {
    /// Whether the counters were incremented.
    pub consumed: bool,
    /// Post-update state (pre-update state when not consumed).
    pub snapshot: QuotaSnapshot,
}

/// Convert a tokio-rusqlite error into CharlaError::Storage.
fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> CharlaError {
    CharlaError::Storage {
        source: Box::new(e),
    }
}

/// Persistent quota ledger backed by the tenants table.
///
/// Holds its own tokio-rusqlite connection; all operations are single
/// statements (or statement pairs whose write is self-contained), so the
/// background thread serializes concurrent callers.
pub struct QuotaLedger {
    conn: tokio_rusqlite::Connection,
}

impl QuotaLedger {
    /// Create a quota ledger from an existing tokio-rusqlite connection.
    pub fn new(conn: tokio_rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Open a quota ledger on a database file path.
    ///
    /// The tenants table must already exist (created by storage migrations).
    pub async fn open(path: &str) -> Result<Self, CharlaError> {
        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| CharlaError::Storage {
                source: Box::new(e),
            })?;
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;
        Ok(Self::new(conn))
    }

    /// Read-only availability check; never mutates.
    pub async fn check_available(&self, tenant_id: i64) -> Result<QuotaSnapshot, CharlaError> {
        self.conn
            .call(move |conn| {
                let row = conn.query_row(
                    "SELECT message_usage, message_limit, token_usage, token_limit
                     FROM tenants WHERE id = ?1",
                    rusqlite::params![tenant_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )?;
                Ok(row)
            })
            .await
            .map_err(map_tr_err)
            .map(|(mu, ml, tu, tl)| QuotaSnapshot::from_counts(mu, ml, tu, tl))
    }

    /// Re-check availability and, only if both dimensions are under limit,
    /// increment both counters in one conditional UPDATE.
    ///
    /// The gate is on the pre-consumption counters, so one in-flight call
    /// may overshoot a ceiling by its own cost; concurrent callers can
    /// never both pass against stale usage. Callers are expected to invoke
    /// this only after a confirmed send, so a failed send is never charged.
    pub async fn check_and_consume(
        &self,
        tenant_id: i64,
        messages: i64,
        tokens: i64,
    ) -> Result<ConsumeOutcome, CharlaError> {
        if messages < 0 || tokens < 0 {
            return Err(CharlaError::Internal(format!(
                "negative quota consumption ({messages} messages, {tokens} tokens)"
            )));
        }

        let (consumed, counts) = self
            .conn
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE tenants
                     SET message_usage = message_usage + ?1,
                         token_usage = token_usage + ?2
                     WHERE id = ?3
                       AND message_limit > 0 AND token_limit > 0
                       AND message_usage < message_limit
                       AND token_usage < token_limit",
                    rusqlite::params![messages, tokens, tenant_id],
                )?;
                let counts = conn.query_row(
                    "SELECT message_usage, message_limit, token_usage, token_limit
                     FROM tenants WHERE id = ?1",
                    rusqlite::params![tenant_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )?;
                Ok((updated == 1, counts))
            })
            .await
            .map_err(map_tr_err)?;

        let snapshot = QuotaSnapshot::from_counts(counts.0, counts.1, counts.2, counts.3);

        if consumed {
            info!(
                tenant = tenant_id,
                messages = messages,
                tokens = tokens,
                message_usage = snapshot.messages.usage,
                token_usage = snapshot.tokens.usage,
                "quota consumed"
            );
        } else {
            info!(
                tenant = tenant_id,
                message_usage = snapshot.messages.usage,
                message_limit = snapshot.messages.limit,
                token_usage = snapshot.tokens.usage,
                token_limit = snapshot.tokens.limit,
                "quota consumption refused"
            );
        }

        Ok(ConsumeOutcome { consumed, snapshot })
    }

    /// Zero both counters and advance the reset date.
    ///
    /// Admin-triggered only; the core runs no background reset timer.
    pub async fn reset_tenant(&self, tenant_id: i64) -> Result<(), CharlaError> {
        let updated = self
            .conn
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE tenants
                     SET message_usage = 0,
                         token_usage = 0,
                         usage_reset_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?1",
                    rusqlite::params![tenant_id],
                )?;
                Ok(updated)
            })
            .await
            .map_err(map_tr_err)?;

        if updated == 0 {
            return Err(CharlaError::Internal(format!(
                "reset for unknown tenant {tenant_id}"
            )));
        }

        info!(tenant = tenant_id, "quota counters reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charla_core::types::{now_iso, Tenant, TenantStatus};
    use charla_storage::queries::tenants;
    use charla_storage::Database;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn setup(message_limit: i64, token_limit: i64) -> (QuotaLedger, i64, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("quota.db");
        let path = db_path.to_str().unwrap();

        let db = Database::open(path).await.unwrap();
        let tenant = Tenant {
            id: 0,
            code: "t1".into(),
            name: "Tenant One".into(),
            status: TenantStatus::Active,
            message_limit,
            message_usage: 0,
            token_limit,
            token_usage: 0,
            usage_reset_at: now_iso(),
            system_prompt: None,
            work_start_hour: 0,
            work_end_hour: 24,
            work_days: String::new(),
            created_at: now_iso(),
        };
        let tenant_id = tenants::create_tenant(&db, &tenant).await.unwrap();
        db.close().await.unwrap();
        drop(db);

        let ledger = QuotaLedger::open(path).await.unwrap();
        (ledger, tenant_id, dir)
    }

    #[tokio::test]
    async fn check_available_reports_both_dimensions() {
        let (ledger, tenant_id, _dir) = setup(10, 1000).await;
        let snapshot = ledger.check_available(tenant_id).await.unwrap();

        assert!(snapshot.available);
        assert_eq!(snapshot.messages.limit, 10);
        assert_eq!(snapshot.messages.remaining, 10);
        assert_eq!(snapshot.messages.percentage, 0);
        assert_eq!(snapshot.tokens.limit, 1000);
    }

    #[tokio::test]
    async fn check_available_never_mutates() {
        let (ledger, tenant_id, _dir) = setup(10, 1000).await;
        ledger.check_available(tenant_id).await.unwrap();
        ledger.check_available(tenant_id).await.unwrap();
        let snapshot = ledger.check_available(tenant_id).await.unwrap();
        assert_eq!(snapshot.messages.usage, 0);
        assert_eq!(snapshot.tokens.usage, 0);
    }

    #[tokio::test]
    async fn consume_increments_both_counters() {
        let (ledger, tenant_id, _dir) = setup(10, 1000).await;
        let outcome = ledger.check_and_consume(tenant_id, 1, 150).await.unwrap();

        assert!(outcome.consumed);
        assert_eq!(outcome.snapshot.messages.usage, 1);
        assert_eq!(outcome.snapshot.tokens.usage, 150);
        assert_eq!(outcome.snapshot.messages.percentage, 10);
        assert_eq!(outcome.snapshot.tokens.percentage, 15);
    }

    #[tokio::test]
    async fn exhausted_messages_block_consumption() {
        let (ledger, tenant_id, _dir) = setup(2, 1000).await;
        assert!(ledger.check_and_consume(tenant_id, 1, 10).await.unwrap().consumed);
        assert!(ledger.check_and_consume(tenant_id, 1, 10).await.unwrap().consumed);

        let refused = ledger.check_and_consume(tenant_id, 1, 10).await.unwrap();
        assert!(!refused.consumed);
        assert_eq!(refused.snapshot.messages.usage, 2, "no mutation on refusal");
        assert!(!refused.snapshot.available);
    }

    #[tokio::test]
    async fn and_semantics_either_dimension_blocks() {
        // Token ceiling already reached, message ceiling wide open.
        let (ledger, tenant_id, _dir) = setup(100, 50).await;
        assert!(ledger.check_and_consume(tenant_id, 1, 50).await.unwrap().consumed);

        let snapshot = ledger.check_available(tenant_id).await.unwrap();
        assert!(snapshot.messages.available);
        assert!(!snapshot.tokens.available);
        assert!(!snapshot.available);

        let refused = ledger.check_and_consume(tenant_id, 1, 1).await.unwrap();
        assert!(!refused.consumed);
    }

    #[tokio::test]
    async fn zero_limit_is_always_exceeded() {
        let (ledger, tenant_id, _dir) = setup(0, 1000).await;
        let snapshot = ledger.check_available(tenant_id).await.unwrap();
        assert!(!snapshot.messages.available);
        assert_eq!(snapshot.messages.percentage, 100);

        let outcome = ledger.check_and_consume(tenant_id, 1, 1).await.unwrap();
        assert!(!outcome.consumed);
    }

    #[tokio::test]
    async fn single_call_may_overshoot_tokens() {
        let (ledger, tenant_id, _dir) = setup(10, 100).await;
        // 99/100 used, still available; one large call may push past the cap.
        assert!(ledger.check_and_consume(tenant_id, 1, 99).await.unwrap().consumed);
        let outcome = ledger.check_and_consume(tenant_id, 1, 500).await.unwrap();
        assert!(outcome.consumed);
        assert_eq!(outcome.snapshot.tokens.usage, 599);

        // But the next call is blocked.
        let refused = ledger.check_and_consume(tenant_id, 1, 1).await.unwrap();
        assert!(!refused.consumed);
    }

    #[tokio::test]
    async fn reset_round_trips_to_zero_usage() {
        let (ledger, tenant_id, _dir) = setup(10, 1000).await;
        ledger.check_and_consume(tenant_id, 1, 100).await.unwrap();

        let before = ledger.check_available(tenant_id).await.unwrap();
        let reset_before = {
            // usage_reset_at must advance across the reset.
            before.messages.usage
        };
        assert_eq!(reset_before, 1);

        ledger.reset_tenant(tenant_id).await.unwrap();
        let after = ledger.check_available(tenant_id).await.unwrap();
        assert_eq!(after.messages.usage, 0);
        assert_eq!(after.tokens.usage, 0);
        assert!(after.available);
    }

    #[tokio::test]
    async fn reset_unknown_tenant_errors() {
        let (ledger, _tenant_id, _dir) = setup(10, 1000).await;
        assert!(ledger.reset_tenant(9999).await.is_err());
    }

    #[tokio::test]
    async fn negative_consumption_is_rejected() {
        let (ledger, tenant_id, _dir) = setup(10, 1000).await;
        assert!(ledger.check_and_consume(tenant_id, -1, 0).await.is_err());
        assert!(ledger.check_and_consume(tenant_id, 0, -5).await.is_err());
    }

    /// N parallel consumers against N-1 remaining messages: exactly N-1
    /// succeed. The conditional UPDATE makes the double-pass race impossible.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumption_never_double_passes() {
        const N: i64 = 8;
        let (ledger, tenant_id, _dir) = setup(N - 1, 1_000_000).await;
        let ledger = Arc::new(ledger);

        let mut handles = Vec::new();
        for _ in 0..N {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger
                    .check_and_consume(tenant_id, 1, 10)
                    .await
                    .unwrap()
                    .consumed
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, N - 1, "exactly limit-many consumers may pass");
        let snapshot = ledger.check_available(tenant_id).await.unwrap();
        assert_eq!(snapshot.messages.usage, N - 1);
        assert!(!snapshot.messages.available);
    }
}
