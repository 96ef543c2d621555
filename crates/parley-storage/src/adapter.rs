// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the message and session store traits.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use parley_config::model::StorageConfig;
use parley_core::types::{Message, MessagePage, Session, SessionUpdate};
use parley_core::{HealthStatus, MessageStore, ParleyError, PluginAdapter, SessionStore};

use crate::database::Database;
use crate::queries;

/// SQLite-backed message and session store.
///
/// Wraps a [`Database`] handle and delegates to the typed query modules.
/// The database is opened by [`SqliteStorage::initialize`].
pub struct SqliteStorage {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    /// Create a new SqliteStorage with the given configuration.
    ///
    /// The database connection is not opened until [`SqliteStorage::initialize`] is called.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Wrap an already open database.
    pub fn from_database(db: Database) -> Self {
        Self {
            config: StorageConfig {
                database_path: db.path().to_string(),
                ..StorageConfig::default()
            },
            db: OnceCell::new_with(Some(db)),
        }
    }

    /// Open the database and run migrations.
    pub async fn initialize(&self) -> Result<(), ParleyError> {
        if let Some(parent) = std::path::Path::new(&self.config.database_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ParleyError::Storage {
                    source: Box::new(e),
                })?;
            }
        }
        let db = Database::open_with(&self.config.database_path, self.config.wal_mode).await?;
        self.db
            .set(db)
            .map_err(|_| ParleyError::storage("storage already initialized"))?;
        debug!(path = %self.config.database_path, "SQLite storage initialized");
        Ok(())
    }

    /// Shared handle to the open database, for collaborators that keep
    /// their own tables in the same file (the broker).
    pub fn database(&self) -> Result<Database, ParleyError> {
        self.db().cloned()
    }

    fn db(&self) -> Result<&Database, ParleyError> {
        self.db
            .get()
            .ok_or_else(|| ParleyError::storage("storage not initialized -- call initialize() first"))
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

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        let db = match self.db() {
            Ok(db) => db,
            Err(e) => return Ok(HealthStatus::Unhealthy(e.to_string())),
        };
        db.ping().await?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), ParleyError> {
        if let Some(db) = self.db.get() {
            db.checkpoint().await?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteStorage {
    async fn append(&self, message: &Message) -> Result<(), ParleyError> {
        queries::messages::append(self.db()?, message).await
    }

    async fn list_pair(
        &self,
        a: i64,
        b: i64,
        page_no: u32,
        page_size: u32,
    ) -> Result<MessagePage, ParleyError> {
        queries::messages::list_pair(self.db()?, a, b, page_no, page_size).await
    }

    async fn list_since(
        &self,
        a: i64,
        b: i64,
        cursor_id: i64,
        limit: u32,
    ) -> Result<Vec<Message>, ParleyError> {
        queries::messages::list_since(self.db()?, a, b, cursor_id, limit).await
    }
}

#[async_trait]
impl SessionStore for SqliteStorage {
    async fn list_for(&self, owner: i64) -> Result<Vec<Session>, ParleyError> {
        queries::sessions::list_for(self.db()?, owner).await
    }

    async fn upsert_unread(
        &self,
        owner: i64,
        session_id: i64,
        update: &SessionUpdate,
    ) -> Result<(), ParleyError> {
        queries::sessions::upsert_unread(self.db()?, owner, session_id, update).await
    }

    async fn clear_unread(&self, owner: i64, session_id: i64) -> Result<(), ParleyError> {
        queries::sessions::clear_unread(self.db()?, owner, session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{direct_session_id, timestamp_now, SessionType};
    use tempfile::tempdir;

    fn storage_at(dir: &tempfile::TempDir) -> SqliteStorage {
        SqliteStorage::new(StorageConfig {
            database_path: dir.path().join("nested").join("parley.db").display().to_string(),
            wal_mode: true,
        })
    }

    fn hello(id: i64) -> Message {
        Message {
            id,
            session_id: direct_session_id(1, 2),
            session_type: SessionType::DIRECT,
            from: 1,
            to: 2,
            content: "hello".to_string(),
            created_at: timestamp_now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn uninitialized_storage_reports_errors() {
        let dir = tempdir().unwrap();
        let storage = storage_at(&dir);
        assert!(storage.append(&hello(1)).await.is_err());
        assert!(matches!(
            storage.health_check().await.unwrap(),
            HealthStatus::Unhealthy(_)
        ));
    }

    #[tokio::test]
    async fn double_initialize_fails() {
        let dir = tempdir().unwrap();
        let storage = storage_at(&dir);
        storage.initialize().await.unwrap();
        assert!(storage.initialize().await.is_err());
    }

    #[tokio::test]
    async fn message_and_session_flow_survives_reopen() {
        let dir = tempdir().unwrap();
        let storage = storage_at(&dir);
        storage.initialize().await.unwrap();
        assert_eq!(storage.health_check().await.unwrap(), HealthStatus::Healthy);

        let m = hello(42);
        storage.append(&m).await.unwrap();
        storage
            .upsert_unread(2, m.session_id, &SessionUpdate::for_recipient(&m))
            .await
            .unwrap();
        let err = storage.append(&m).await.unwrap_err();
        assert!(matches!(err, ParleyError::Conflict(_)));
        storage.shutdown().await.unwrap();
        drop(storage);

        let reopened = storage_at(&dir);
        reopened.initialize().await.unwrap();
        let page = reopened.list_pair(1, 2, 1, 10).await.unwrap();
        assert_eq!(page.messages, vec![m.clone()]);
        let sessions = reopened.list_for(2).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].unread_count, 1);
        reopened.clear_unread(2, m.session_id).await.unwrap();
        assert_eq!(reopened.list_for(2).await.unwrap()[0].unread_count, 0);
    }
}
