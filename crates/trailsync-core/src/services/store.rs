//! Shared local store wrapper used by the sync engine and clients.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    ConflictRepository, Database, EntityRepository, LibSqlConflictRepository,
    LibSqlEntityRepository, LibSqlMetaRepository, LibSqlQueueRepository, MetaRepository,
    QueueRepository,
};
use crate::models::{
    ConflictId, ConflictRecord, EntityRecord, EntityType, LocalSyncStatus, SyncItem, SyncItemId,
};
use crate::Result;

/// Thread-safe handle over the local database and its repositories.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open a store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        tracing::debug!("Opened local store at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Filesystem path backing this store, if any.
    pub fn path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    // Queue

    pub async fn persist_item(&self, item: &SyncItem) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).upsert(item).await
    }

    pub async fn delete_item(&self, id: &SyncItemId) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).delete(id).await
    }

    pub async fn record_attempt(&self, item: &SyncItem) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .record_attempt(item)
            .await
    }

    pub async fn list_items(&self) -> Result<Vec<SyncItem>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).list().await
    }

    pub async fn delete_items_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .delete_for_entity(entity_type, entity_id)
            .await
    }

    // Conflicts

    pub async fn save_conflict(&self, record: &ConflictRecord) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .upsert(record)
            .await
    }

    pub async fn get_conflict(&self, id: &ConflictId) -> Result<Option<ConflictRecord>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection()).get(id).await
    }

    pub async fn find_conflict(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<ConflictRecord>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .find_for_entity(entity_type, entity_id)
            .await
    }

    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .list(limit)
            .await
    }

    pub async fn delete_conflict(&self, id: &ConflictId) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .delete(id)
            .await
    }

    // Entities

    pub async fn get_entity(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> Result<Option<EntityRecord>> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .get(entity_type, id)
            .await
    }

    pub async fn put_entity(&self, record: &EntityRecord) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .upsert(record)
            .await
    }

    /// Record a local edit: stamps `updated_at` now and marks the row pending.
    pub async fn save_local_entity(
        &self,
        entity_type: EntityType,
        id: &str,
        data: serde_json::Value,
    ) -> Result<EntityRecord> {
        let record = EntityRecord {
            entity_type,
            id: id.to_string(),
            data,
            updated_at: crate::util::unix_millis_now(),
            sync_status: LocalSyncStatus::Pending,
        };
        self.put_entity(&record).await?;
        Ok(record)
    }

    pub async fn set_entity_status(
        &self,
        entity_type: EntityType,
        id: &str,
        status: LocalSyncStatus,
    ) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .set_sync_status(entity_type, id, status)
            .await
    }

    pub async fn list_entities_with_status(
        &self,
        entity_type: EntityType,
        status: LocalSyncStatus,
    ) -> Result<Vec<EntityRecord>> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .list_by_status(entity_type, status)
            .await
    }

    // Status blob

    pub async fn last_sync_at(&self) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        LibSqlMetaRepository::new(db.connection())
            .last_sync_at()
            .await
    }

    pub async fn set_last_sync_at(&self, at: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMetaRepository::new(db.connection())
            .set_last_sync_at(at)
            .await
    }

    /// Pull watermark: only a completed pull moves it, never a push-only drain.
    pub async fn last_pull_at(&self) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        LibSqlMetaRepository::new(db.connection())
            .last_pull_at()
            .await
    }

    pub async fn set_last_pull_at(&self, at: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMetaRepository::new(db.connection())
            .set_last_pull_at(at)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn save_local_entity_marks_pending() {
        let store = LocalStore::open_in_memory().await.unwrap();

        let saved = store
            .save_local_entity(
                EntityType::Trail,
                "t1",
                serde_json::json!({ "id": "t1", "name": "Coastal" }),
            )
            .await
            .unwrap();
        assert_eq!(saved.sync_status, LocalSyncStatus::Pending);

        let pending = store
            .list_entities_with_status(EntityType::Trail, LocalSyncStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_path_creates_parent_directories() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("trailsync.db");

        let store = LocalStore::open_path(&db_path).await.unwrap();
        assert_eq!(store.path(), Some(&db_path));
        assert!(db_path.exists());
    }
}
