// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation thread operations.
//!
//! Conversations are never hard-deleted here; removal is an administrative
//! concern outside this core.

use charla_core::CharlaError;
use rusqlite::params;

use crate::database::Database;
use crate::models::Conversation;

fn row_to_conversation(row: &rusqlite::Row<'_>) -> Result<Conversation, rusqlite::Error> {
    Ok(Conversation {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        counterparty: row.get(2)?,
        display_name: row.get(3)?,
        last_message: row.get(4)?,
        last_message_at: row.get(5)?,
        unread_count: row.get(6)?,
        bot_enabled: row.get(7)?,
        created_at: row.get(8)?,
    })
}

const CONVERSATION_COLUMNS: &str = "id, tenant_id, counterparty, display_name, last_message, \
     last_message_at, unread_count, bot_enabled, created_at";

/// Return the conversation for `(tenant_id, counterparty)`, creating it with
/// `bot_enabled = true` if it does not exist. A display name fills in only
/// when none is recorded yet.
pub async fn get_or_create_conversation(
    db: &Database,
    tenant_id: i64,
    counterparty: &str,
    display_name: Option<&str>,
) -> Result<Conversation, CharlaError> {
    let counterparty = counterparty.to_string();
    let display_name = display_name.map(String::from);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO conversations (tenant_id, counterparty, display_name)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(tenant_id, counterparty) DO UPDATE SET
                     display_name = COALESCE(conversations.display_name, excluded.display_name)",
                params![tenant_id, counterparty, display_name],
            )?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE tenant_id = ?1 AND counterparty = ?2"
            ))?;
            stmt.query_row(params![tenant_id, counterparty], row_to_conversation)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a conversation by id.
pub async fn get_conversation(
    db: &Database,
    id: i64,
) -> Result<Option<Conversation>, CharlaError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"
            ))?;
            let result = stmt.query_row(params![id], row_to_conversation);
            match result {
                Ok(conversation) => Ok(Some(conversation)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// List a tenant's conversations, most recently active first.
pub async fn list_conversations(
    db: &Database,
    tenant_id: i64,
) -> Result<Vec<Conversation>, CharlaError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE tenant_id = ?1
                 ORDER BY last_message_at IS NULL, last_message_at DESC"
            ))?;
            let rows = stmt.query_map(params![tenant_id], row_to_conversation)?;
            let mut conversations = Vec::new();
            for row in rows {
                conversations.push(row?);
            }
            Ok(conversations)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Update the last-message snapshot, optionally incrementing the unread counter.
pub async fn touch_conversation(
    db: &Database,
    id: i64,
    last_message: &str,
    last_message_at: &str,
    increment_unread: bool,
) -> Result<(), CharlaError> {
    let last_message = last_message.to_string();
    let last_message_at = last_message_at.to_string();
    let increment: i64 = if increment_unread { 1 } else { 0 };
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE conversations
                 SET last_message = ?1, last_message_at = ?2,
                     unread_count = unread_count + ?3
                 WHERE id = ?4",
                params![last_message, last_message_at, increment, id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Flip the automated-responder flag for a conversation.
pub async fn set_bot_enabled(db: &Database, id: i64, enabled: bool) -> Result<(), CharlaError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE conversations SET bot_enabled = ?1 WHERE id = ?2",
                params![enabled, id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Zero the unread counter.
pub async fn mark_conversation_read(db: &Database, id: i64) -> Result<(), CharlaError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE conversations SET unread_count = 0 WHERE id = ?1",
                params![id],
            )?;
            Ok(())
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
    async fn get_or_create_is_idempotent() {
        let (db, tenant_id, _dir) = setup().await;

        let first = get_or_create_conversation(&db, tenant_id, "contact-1", Some("Ana"))
            .await
            .unwrap();
        assert!(first.bot_enabled, "new conversations default bot-enabled");
        assert_eq!(first.display_name.as_deref(), Some("Ana"));

        let second = get_or_create_conversation(&db, tenant_id, "contact-1", Some("Renamed"))
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        // Existing display name wins.
        assert_eq!(second.display_name.as_deref(), Some("Ana"));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn touch_updates_snapshot_and_unread() {
        let (db, tenant_id, _dir) = setup().await;
        let convo = get_or_create_conversation(&db, tenant_id, "contact-1", None)
            .await
            .unwrap();

        touch_conversation(&db, convo.id, "hello", "2026-02-01T10:00:00.000Z", true)
            .await
            .unwrap();
        touch_conversation(&db, convo.id, "again", "2026-02-01T10:01:00.000Z", true)
            .await
            .unwrap();

        let updated = get_conversation(&db, convo.id).await.unwrap().unwrap();
        assert_eq!(updated.last_message.as_deref(), Some("again"));
        assert_eq!(updated.unread_count, 2);

        mark_conversation_read(&db, convo.id).await.unwrap();
        let read = get_conversation(&db, convo.id).await.unwrap().unwrap();
        assert_eq!(read.unread_count, 0);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn bot_enabled_flag_flips() {
        let (db, tenant_id, _dir) = setup().await;
        let convo = get_or_create_conversation(&db, tenant_id, "contact-1", None)
            .await
            .unwrap();
        assert!(convo.bot_enabled);

        set_bot_enabled(&db, convo.id, false).await.unwrap();
        let updated = get_conversation(&db, convo.id).await.unwrap().unwrap();
        assert!(!updated.bot_enabled);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn list_orders_by_recency() {
        let (db, tenant_id, _dir) = setup().await;
        let a = get_or_create_conversation(&db, tenant_id, "contact-a", None)
            .await
            .unwrap();
        let b = get_or_create_conversation(&db, tenant_id, "contact-b", None)
            .await
            .unwrap();

        touch_conversation(&db, a.id, "old", "2026-02-01T10:00:00.000Z", false)
            .await
            .unwrap();
        touch_conversation(&db, b.id, "new", "2026-02-02T10:00:00.000Z", false)
            .await
            .unwrap();

        let list = list_conversations(&db, tenant_id).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].counterparty, "contact-b");

        db.close().await.unwrap();
    }
}
