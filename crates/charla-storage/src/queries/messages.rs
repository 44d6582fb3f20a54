// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message operations.
//!
//! The external identifier is unique within a tenant. A duplicate arrival
//! resolves to the existing row via `INSERT OR IGNORE` + fetch; callers
//! never see a constraint violation for replays.

use charla_core::CharlaError;
use rusqlite::params;

use crate::database::Database;
use crate::models::{MessageInsert, StoredMessage};
use crate::queries::parse_enum;

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<StoredMessage, rusqlite::Error> {
    Ok(StoredMessage {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        external_id: row.get(2)?,
        conversation_id: row.get(3)?,
        sender_class: parse_enum(4, row.get::<_, String>(4)?)?,
        from_me: row.get(5)?,
        automated: row.get(6)?,
        content: row.get(7)?,
        kind: parse_enum(8, row.get::<_, String>(8)?)?,
        is_read: row.get(9)?,
        created_at: row.get(10)?,
    })
}

const MESSAGE_COLUMNS: &str = "id, tenant_id, external_id, conversation_id, sender_class, \
     from_me, automated, content, kind, is_read, created_at";

/// Idempotent insert keyed on `(tenant_id, external_id)`.
pub async fn insert_message(
    db: &Database,
    message: &StoredMessage,
) -> Result<MessageInsert, CharlaError> {
    let message = message.clone();
    db.connection()
        .call(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO messages (id, tenant_id, external_id, conversation_id, \
                 sender_class, from_me, automated, content, kind, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    message.id,
                    message.tenant_id,
                    message.external_id,
                    message.conversation_id,
                    message.sender_class.to_string(),
                    message.from_me,
                    message.automated,
                    message.content,
                    message.kind.to_string(),
                    message.is_read,
                    message.created_at,
                ],
            )?;

            if inserted == 1 {
                return Ok(MessageInsert::Inserted(message));
            }

            // The unique key already exists: hand back the stored record.
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE tenant_id = ?1 AND external_id = ?2"
            ))?;
            let existing = stmt.query_row(
                params![message.tenant_id, message.external_id],
                row_to_message,
            )?;
            Ok(MessageInsert::Duplicate(existing))
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Most recent messages of a conversation, oldest first, bounded by `limit`.
pub async fn recent_messages(
    db: &Database,
    conversation_id: i64,
    limit: i64,
) -> Result<Vec<StoredMessage>, CharlaError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![conversation_id, limit], row_to_message)?;
            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            // Fetched newest-first; callers want chronological order.
            messages.reverse();
            Ok(messages)
        })
        .await
        .map_err(crate::database::map_tr_err)
}
