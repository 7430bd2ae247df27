//! Conflict record repository

use crate::error::{Error, Result};
use crate::models::{ConflictId, ConflictRecord, EntityType};
use libsql::Connection;

use super::queue_repository::optional_text;

/// Trait for conflict record storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ConflictRepository {
    /// Insert or overwrite a record by id
    async fn upsert(&self, record: &ConflictRecord) -> Result<()>;

    /// Get a record by id
    async fn get(&self, id: &ConflictId) -> Result<Option<ConflictRecord>>;

    /// Get the open record for an entity, if any
    async fn find_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<ConflictRecord>>;

    /// List records, oldest first
    async fn list(&self, limit: usize) -> Result<Vec<ConflictRecord>>;

    /// Delete a record by id
    async fn delete(&self, id: &ConflictId) -> Result<()>;
}

/// libSQL implementation of `ConflictRepository`
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

const SELECT_COLUMNS: &str = "SELECT id, entity_type, entity_id, local_data, remote_data, status, resolved_data, detected_at
     FROM sync_conflicts";

impl<'a> LibSqlConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_record(row: &libsql::Row) -> Result<ConflictRecord> {
        let id: String = row.get(0)?;
        let entity_type: String = row.get(1)?;
        let local_data: String = row.get(3)?;
        let remote_data: String = row.get(4)?;
        let status: String = row.get(5)?;
        let resolved_data = row
            .get::<Option<String>>(6)?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?;

        Ok(ConflictRecord {
            conflict_id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid conflict id: {id}")))?,
            entity_type: entity_type.parse()?,
            entity_id: row.get(2)?,
            local_data: serde_json::from_str(&local_data)?,
            remote_data: serde_json::from_str(&remote_data)?,
            resolution: status.parse()?,
            resolved_data,
            detected_at: row.get(7)?,
        })
    }

    async fn query_records(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<ConflictRecord>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }
}

impl ConflictRepository for LibSqlConflictRepository<'_> {
    async fn upsert(&self, record: &ConflictRecord) -> Result<()> {
        let resolved_data = record
            .resolved_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_conflicts
                    (id, entity_type, entity_id, local_data, remote_data, status, resolved_data, detected_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    record.conflict_id.as_str(),
                    record.entity_type.as_str(),
                    record.entity_id.as_str(),
                    serde_json::to_string(&record.local_data)?,
                    serde_json::to_string(&record.remote_data)?,
                    record.resolution.as_str(),
                    optional_text(resolved_data.as_deref()),
                    record.detected_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &ConflictId) -> Result<Option<ConflictRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?");
        Ok(self
            .query_records(&sql, [id.as_str()])
            .await?
            .into_iter()
            .next())
    }

    async fn find_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<ConflictRecord>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE entity_type = ? AND entity_id = ? ORDER BY detected_at ASC LIMIT 1"
        );
        Ok(self
            .query_records(&sql, [entity_type.as_str(), entity_id])
            .await?
            .into_iter()
            .next())
    }

    async fn list(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY detected_at ASC, id ASC LIMIT ?");
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_records(&sql, libsql::params![limit]).await
    }

    async fn delete(&self, id: &ConflictId) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_conflicts WHERE id = ?", [id.as_str()])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Resolution;
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn sample() -> ConflictRecord {
        ConflictRecord::manual(
            EntityType::Trail,
            "t1",
            serde_json::json!({ "id": "t1", "name": "local", "updated_at": 10 }),
            serde_json::json!({ "id": "t1", "name": "remote", "updated_at": 20 }),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upsert_get_and_delete() {
        let db = setup().await;
        let repo = LibSqlConflictRepository::new(db.connection());

        let record = sample();
        repo.upsert(&record).await.unwrap();

        let fetched = repo.get(&record.conflict_id).await.unwrap().unwrap();
        assert_eq!(fetched, record);
        assert_eq!(fetched.resolution, Resolution::Manual);

        repo.delete(&record.conflict_id).await.unwrap();
        assert!(repo.get(&record.conflict_id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_find_for_entity() {
        let db = setup().await;
        let repo = LibSqlConflictRepository::new(db.connection());

        let record = sample();
        repo.upsert(&record).await.unwrap();

        let found = repo
            .find_for_entity(EntityType::Trail, "t1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.conflict_id, record.conflict_id);
        assert!(repo
            .find_for_entity(EntityType::TrackPoint, "t1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_resolved_data_roundtrip() {
        let db = setup().await;
        let repo = LibSqlConflictRepository::new(db.connection());

        let mut record = sample();
        record.resolution = Resolution::Merge;
        record.resolved_data = Some(serde_json::json!({ "id": "t1", "name": "merged" }));
        repo.upsert(&record).await.unwrap();

        let listed = repo.list(10).await.unwrap();
        assert_eq!(listed, vec![record]);
    }
}
