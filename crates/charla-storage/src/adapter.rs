// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the StorageAdapter trait.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use charla_config::model::StorageConfig;
use charla_core::types::{
    Conversation, MessageInsert, SessionRecord, StoredMessage, Tenant,
};
use charla_core::{
    AdapterType, CharlaError, HealthStatus, PluginAdapter, StorageAdapter,
};

use crate::database::Database;
use crate::queries;

/// SQLite-backed storage adapter.
///
/// Wraps a [`Database`] handle and delegates all query operations to the
/// typed query modules. The database is lazily initialized on the first
/// call to [`StorageAdapter::initialize`].
pub struct SqliteStorage {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    /// Create a new SqliteStorage with the given configuration.
    ///
    /// The database connection is not opened until [`StorageAdapter::initialize`]
    /// is called.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Returns a reference to the underlying Database, or an error if not initialized.
    fn db(&self) -> Result<&Database, CharlaError> {
        self.db.get().ok_or_else(|| CharlaError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, CharlaError> {
        let db = self.db()?;
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(crate::database::map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), CharlaError> {
        if let Some(db) = self.db.get() {
            db.close().await?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<(), CharlaError> {
        let path = self.config.database_path.clone();
        let db = Database::open(&path).await?;
        self.db.set(db).map_err(|_| CharlaError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite storage initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), CharlaError> {
        self.db()?.close().await
    }

    // --- Tenant operations ---

    async fn create_tenant(&self, tenant: &Tenant) -> Result<i64, CharlaError> {
        queries::tenants::create_tenant(self.db()?, tenant).await
    }

    async fn get_tenant(&self, id: i64) -> Result<Option<Tenant>, CharlaError> {
        queries::tenants::get_tenant(self.db()?, id).await
    }

    async fn get_tenant_by_code(&self, code: &str) -> Result<Option<Tenant>, CharlaError> {
        queries::tenants::get_tenant_by_code(self.db()?, code).await
    }

    // --- Session status operations ---

    async fn upsert_session_record(
        &self,
        tenant_id: i64,
        state: &str,
        phone: Option<&str>,
        last_error: Option<&str>,
    ) -> Result<(), CharlaError> {
        queries::sessions::upsert_session_record(self.db()?, tenant_id, state, phone, last_error)
            .await
    }

    async fn get_session_record(
        &self,
        tenant_id: i64,
    ) -> Result<Option<SessionRecord>, CharlaError> {
        queries::sessions::get_session_record(self.db()?, tenant_id).await
    }

    // --- Conversation operations ---

    async fn get_or_create_conversation(
        &self,
        tenant_id: i64,
        counterparty: &str,
        display_name: Option<&str>,
    ) -> Result<Conversation, CharlaError> {
        queries::conversations::get_or_create_conversation(
            self.db()?,
            tenant_id,
            counterparty,
            display_name,
        )
        .await
    }

    async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>, CharlaError> {
        queries::conversations::get_conversation(self.db()?, id).await
    }

    async fn list_conversations(&self, tenant_id: i64) -> Result<Vec<Conversation>, CharlaError> {
        queries::conversations::list_conversations(self.db()?, tenant_id).await
    }

    async fn touch_conversation(
        &self,
        id: i64,
        last_message: &str,
        last_message_at: &str,
        increment_unread: bool,
    ) -> Result<(), CharlaError> {
        queries::conversations::touch_conversation(
            self.db()?,
            id,
            last_message,
            last_message_at,
            increment_unread,
        )
        .await
    }

    async fn set_bot_enabled(&self, id: i64, enabled: bool) -> Result<(), CharlaError> {
        queries::conversations::set_bot_enabled(self.db()?, id, enabled).await
    }

    async fn mark_conversation_read(&self, id: i64) -> Result<(), CharlaError> {
        queries::conversations::mark_conversation_read(self.db()?, id).await
    }

    // --- Message operations ---

    async fn insert_message(&self, message: &StoredMessage) -> Result<MessageInsert, CharlaError> {
        queries::messages::insert_message(self.db()?, message).await
    }

    async fn recent_messages(
        &self,
        conversation_id: i64,
        limit: i64,
    ) -> Result<Vec<StoredMessage>, CharlaError> {
        queries::messages::recent_messages(self.db()?, conversation_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charla_core::types::{now_iso, MessageKind, SenderClass, TenantStatus};
    use tempfile::tempdir;

    fn make_config(path: &str) -> StorageConfig {
        StorageConfig {
            database_path: path.to_string(),
            wal_mode: true,
        }
    }

    fn make_tenant(code: &str) -> Tenant {
        Tenant {
            id: 0,
            code: code.to_string(),
            name: "Tenant".to_string(),
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
        }
    }

    #[tokio::test]
    async fn sqlite_storage_implements_plugin_adapter() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        assert_eq!(storage.name(), "sqlite");
        assert_eq!(storage.version(), semver::Version::new(0, 1, 0));
        assert_eq!(storage.adapter_type(), AdapterType::Storage);
    }

    #[tokio::test]
    async fn initialize_twice_returns_error() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("double_init.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        storage.initialize().await.unwrap();
        let result = storage.initialize().await;
        assert!(result.is_err(), "second initialize should fail");
    }

    #[tokio::test]
    async fn health_check_fails_when_not_initialized() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("no_init.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        let result = storage.health_check().await;
        assert!(result.is_err(), "health_check should fail before initialize");
    }

    #[tokio::test]
    async fn full_ingestion_lifecycle_through_adapter() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("lifecycle.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));
        storage.initialize().await.unwrap();

        let tenant_id = storage.create_tenant(&make_tenant("acme")).await.unwrap();
        let tenant = storage.get_tenant(tenant_id).await.unwrap().unwrap();
        assert_eq!(tenant.code, "acme");

        let convo = storage
            .get_or_create_conversation(tenant_id, "contact-1", Some("Ana"))
            .await
            .unwrap();
        assert!(convo.bot_enabled);

        let msg = StoredMessage {
            id: "m-1".into(),
            tenant_id,
            external_id: "ext-1".into(),
            conversation_id: convo.id,
            sender_class: SenderClass::ExternalContact,
            from_me: false,
            automated: false,
            content: "hello".into(),
            kind: MessageKind::Text,
            is_read: false,
            created_at: now_iso(),
        };
        let insert = storage.insert_message(&msg).await.unwrap();
        assert!(!insert.is_duplicate());

        storage
            .touch_conversation(convo.id, "hello", &msg.created_at, true)
            .await
            .unwrap();
        let updated = storage.get_conversation(convo.id).await.unwrap().unwrap();
        assert_eq!(updated.unread_count, 1);

        storage
            .upsert_session_record(tenant_id, "ready", Some("5511999990000"), None)
            .await
            .unwrap();
        let record = storage.get_session_record(tenant_id).await.unwrap().unwrap();
        assert_eq!(record.state, "ready");

        storage.close().await.unwrap();
    }
}
