//! Local entity tables (trails, track points, media files, users)

use crate::error::Result;
use crate::models::{EntityRecord, EntityType, LocalSyncStatus};
use libsql::Connection;

/// Trait for entity table operations (async)
#[allow(async_fn_in_trait)]
pub trait EntityRepository {
    /// Get an entity by kind and id
    async fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<EntityRecord>>;

    /// Insert or overwrite an entity
    async fn upsert(&self, record: &EntityRecord) -> Result<()>;

    /// Update only the sync status column
    async fn set_sync_status(
        &self,
        entity_type: EntityType,
        id: &str,
        status: LocalSyncStatus,
    ) -> Result<()>;

    /// List entities of one kind with the given sync status
    async fn list_by_status(
        &self,
        entity_type: EntityType,
        status: LocalSyncStatus,
    ) -> Result<Vec<EntityRecord>>;
}

/// libSQL implementation of `EntityRepository`
pub struct LibSqlEntityRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlEntityRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_record(entity_type: EntityType, row: &libsql::Row) -> Result<EntityRecord> {
        let data: String = row.get(1)?;
        let status: String = row.get(3)?;
        Ok(EntityRecord {
            entity_type,
            id: row.get(0)?,
            data: serde_json::from_str(&data)?,
            updated_at: row.get(2)?,
            sync_status: LocalSyncStatus::parse(&status),
        })
    }
}

impl EntityRepository for LibSqlEntityRepository<'_> {
    async fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<EntityRecord>> {
        let sql = format!(
            "SELECT id, data, updated_at, sync_status FROM {} WHERE id = ?",
            entity_type.table()
        );
        let mut rows = self.conn.query(&sql, [id]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(entity_type, &row)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, record: &EntityRecord) -> Result<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO {} (id, data, updated_at, sync_status) VALUES (?, ?, ?, ?)",
            record.entity_type.table()
        );
        self.conn
            .execute(
                &sql,
                libsql::params![
                    record.id.as_str(),
                    serde_json::to_string(&record.data)?,
                    record.updated_at,
                    record.sync_status.as_str(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn set_sync_status(
        &self,
        entity_type: EntityType,
        id: &str,
        status: LocalSyncStatus,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET sync_status = ? WHERE id = ?",
            entity_type.table()
        );
        self.conn.execute(&sql, [status.as_str(), id]).await?;
        Ok(())
    }

    async fn list_by_status(
        &self,
        entity_type: EntityType,
        status: LocalSyncStatus,
    ) -> Result<Vec<EntityRecord>> {
        let sql = format!(
            "SELECT id, data, updated_at, sync_status FROM {}
             WHERE sync_status = ?
             ORDER BY updated_at ASC",
            entity_type.table()
        );
        let mut rows = self.conn.query(&sql, [status.as_str()]).await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(entity_type, &row)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn record(entity_type: EntityType, id: &str, status: LocalSyncStatus) -> EntityRecord {
        EntityRecord {
            entity_type,
            id: id.to_string(),
            data: serde_json::json!({ "id": id }),
            updated_at: 100,
            sync_status: status,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upsert_and_get_per_table() {
        let db = setup().await;
        let repo = LibSqlEntityRepository::new(db.connection());

        repo.upsert(&record(EntityType::Trail, "x", LocalSyncStatus::Synced))
            .await
            .unwrap();

        assert!(repo.get(EntityType::Trail, "x").await.unwrap().is_some());
        // Same id in a different table is a different entity
        assert!(repo.get(EntityType::MediaFile, "x").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_by_status_and_update() {
        let db = setup().await;
        let repo = LibSqlEntityRepository::new(db.connection());

        repo.upsert(&record(EntityType::TrackPoint, "p1", LocalSyncStatus::Pending))
            .await
            .unwrap();
        repo.upsert(&record(EntityType::TrackPoint, "p2", LocalSyncStatus::Synced))
            .await
            .unwrap();

        let pending = repo
            .list_by_status(EntityType::TrackPoint, LocalSyncStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "p1");

        repo.set_sync_status(EntityType::TrackPoint, "p1", LocalSyncStatus::Synced)
            .await
            .unwrap();
        let pending = repo
            .list_by_status(EntityType::TrackPoint, LocalSyncStatus::Pending)
            .await
            .unwrap();
        assert!(pending.is_empty());
    }
}
