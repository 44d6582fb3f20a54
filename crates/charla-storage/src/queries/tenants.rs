// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tenant CRUD operations.
//!
//! Usage counters are only written by the quota ledger; these queries never
//! touch `message_usage`/`token_usage` outside of tenant creation.

use charla_core::CharlaError;
use rusqlite::params;

use crate::database::Database;
use crate::models::Tenant;
use crate::queries::parse_enum;

pub(crate) fn row_to_tenant(row: &rusqlite::Row<'_>) -> Result<Tenant, rusqlite::Error> {
    Ok(Tenant {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        status: parse_enum(3, row.get::<_, String>(3)?)?,
        message_limit: row.get(4)?,
        message_usage: row.get(5)?,
        token_limit: row.get(6)?,
        token_usage: row.get(7)?,
        usage_reset_at: row.get(8)?,
        system_prompt: row.get(9)?,
        work_start_hour: row.get(10)?,
        work_end_hour: row.get(11)?,
        work_days: row.get(12)?,
        created_at: row.get(13)?,
    })
}

const TENANT_COLUMNS: &str = "id, code, name, status, message_limit, message_usage, \
     token_limit, token_usage, usage_reset_at, system_prompt, \
     work_start_hour, work_end_hour, work_days, created_at";

/// Create a tenant and return its assigned id.
pub async fn create_tenant(db: &Database, tenant: &Tenant) -> Result<i64, CharlaError> {
    let tenant = tenant.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO tenants (code, name, status, message_limit, message_usage, \
                 token_limit, token_usage, usage_reset_at, system_prompt, \
                 work_start_hour, work_end_hour, work_days, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    tenant.code,
                    tenant.name,
                    tenant.status.to_string(),
                    tenant.message_limit,
                    tenant.message_usage,
                    tenant.token_limit,
                    tenant.token_usage,
                    tenant.usage_reset_at,
                    tenant.system_prompt,
                    tenant.work_start_hour,
                    tenant.work_end_hour,
                    tenant.work_days,
                    tenant.created_at,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a tenant by numeric id.
pub async fn get_tenant(db: &Database, id: i64) -> Result<Option<Tenant>, CharlaError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?1"
            ))?;
            let result = stmt.query_row(params![id], row_to_tenant);
            match result {
                Ok(tenant) => Ok(Some(tenant)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a tenant by its opaque code.
pub async fn get_tenant_by_code(
    db: &Database,
    code: &str,
) -> Result<Option<Tenant>, CharlaError> {
    let code = code.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TENANT_COLUMNS} FROM tenants WHERE code = ?1"
            ))?;
            let result = stmt.query_row(params![code], row_to_tenant);
            match result {
                Ok(tenant) => Ok(Some(tenant)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}
