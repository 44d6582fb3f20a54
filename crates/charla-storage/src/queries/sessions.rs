// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persisted session status per tenant.

use charla_core::CharlaError;
use rusqlite::params;

use crate::database::Database;
use crate::models::SessionRecord;

/// Insert or update the persisted session status for a tenant.
pub async fn upsert_session_record(
    db: &Database,
    tenant_id: i64,
    state: &str,
    phone: Option<&str>,
    last_error: Option<&str>,
) -> Result<(), CharlaError> {
    let state = state.to_string();
    let phone = phone.map(String::from);
    let last_error = last_error.map(String::from);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO sessions (tenant_id, state, phone, last_error, updated_at)
                 VALUES (?1, ?2, ?3, ?4, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                 ON CONFLICT(tenant_id) DO UPDATE SET
                     state = excluded.state,
                     phone = excluded.phone,
                     last_error = excluded.last_error,
                     updated_at = excluded.updated_at",
                params![tenant_id, state, phone, last_error],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get the persisted session status for a tenant.
pub async fn get_session_record(
    db: &Database,
    tenant_id: i64,
) -> Result<Option<SessionRecord>, CharlaError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT tenant_id, state, phone, last_error, updated_at
                 FROM sessions WHERE tenant_id = ?1",
            )?;
            let result = stmt.query_row(params![tenant_id], |row| {
                Ok(SessionRecord {
                    tenant_id: row.get(0)?,
                    state: row.get(1)?,
                    phone: row.get(2)?,
                    last_error: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            });
            match result {
                Ok(record) => Ok(Some(record)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::tenants;
    use charla_core::types::{now_iso, Tenant, TenantStatus};
    use tempfile::tempdir;

    async fn setup() -> (Database, i64, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        let tenant = Tenant {
            id: 0,
            code: "t1".into(),
            name: "Tenant One".into(),
            status: TenantStatus::Active,
            message_limit: 10,
            message_usage: 0,
            token_limit: 1000,
            token_usage: 0,
            usage_reset_at: now_iso(),
            system_prompt: None,
            work_start_hour: 0,
            work_end_hour: 24,
            work_days: String::new(),
            created_at: now_iso(),
        };
        let id = tenants::create_tenant(&db, &tenant).await.unwrap();
        (db, id, dir)
    }

    #[tokio::test]
    async fn upsert_creates_then_updates() {
        let (db, tenant_id, _dir) = setup().await;

        upsert_session_record(&db, tenant_id, "awaiting_scan", None, None)
            .await
            .unwrap();
        let record = get_session_record(&db, tenant_id).await.unwrap().unwrap();
        assert_eq!(record.state, "awaiting_scan");
        assert!(record.phone.is_none());

        upsert_session_record(&db, tenant_id, "ready", Some("5511999990000"), None)
            .await
            .unwrap();
        let record = get_session_record(&db, tenant_id).await.unwrap().unwrap();
        assert_eq!(record.state, "ready");
        assert_eq!(record.phone.as_deref(), Some("5511999990000"));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn missing_record_returns_none() {
        let (db, tenant_id, _dir) = setup().await;
        let record = get_session_record(&db, tenant_id).await.unwrap();
        assert!(record.is_none());
        db.close().await.unwrap();
    }
}
