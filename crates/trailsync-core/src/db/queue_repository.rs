//! Persisted sync queue repository

use crate::error::{Error, Result};
use crate::models::{EntityType, SyncItem, SyncItemId};
use libsql::Connection;

/// Trait for persisted queue operations (async)
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    /// Insert or overwrite an item by id
    async fn upsert(&self, item: &SyncItem) -> Result<()>;

    /// Delete an item by id
    async fn delete(&self, id: &SyncItemId) -> Result<()>;

    /// Persist retry bookkeeping for an item
    async fn record_attempt(&self, item: &SyncItem) -> Result<()>;

    /// All persisted items, oldest first
    async fn list(&self) -> Result<Vec<SyncItem>>;

    /// Delete every item targeting one entity
    async fn delete_for_entity(&self, entity_type: EntityType, entity_id: &str) -> Result<u64>;
}

/// libSQL implementation of `QueueRepository`
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_item(row: &libsql::Row) -> Result<SyncItem> {
        let id: String = row.get(0)?;
        let entity_type: String = row.get(1)?;
        let operation: String = row.get(3)?;
        let payload: String = row.get(4)?;
        let priority: String = row.get(5)?;
        let attempts: i64 = row.get(6)?;

        Ok(SyncItem {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid queue item id: {id}")))?,
            entity_type: entity_type.parse()?,
            entity_id: row.get(2)?,
            operation: operation.parse()?,
            payload: serde_json::from_str(&payload)?,
            priority: priority.parse()?,
            attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
            last_error: row.get::<Option<String>>(7)?,
            timestamp: row.get(8)?,
        })
    }
}

pub(crate) fn optional_text(value: Option<&str>) -> libsql::Value {
    value.map_or(libsql::Value::Null, |text| {
        libsql::Value::Text(text.to_string())
    })
}

impl QueueRepository for LibSqlQueueRepository<'_> {
    async fn upsert(&self, item: &SyncItem) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_queue
                    (id, entity_type, entity_id, operation, payload, priority, attempts, last_error, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    item.id.as_str(),
                    item.entity_type.as_str(),
                    item.entity_id.as_str(),
                    item.operation.as_str(),
                    serde_json::to_string(&item.payload)?,
                    item.priority.as_str(),
                    i64::from(item.attempts),
                    optional_text(item.last_error.as_deref()),
                    item.timestamp,
                ],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &SyncItemId) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_queue WHERE id = ?", [id.as_str()])
            .await?;
        Ok(())
    }

    async fn record_attempt(&self, item: &SyncItem) -> Result<()> {
        self.conn
            .execute(
                "UPDATE sync_queue SET attempts = ?, last_error = ? WHERE id = ?",
                libsql::params![
                    i64::from(item.attempts),
                    optional_text(item.last_error.as_deref()),
                    item.id.as_str(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SyncItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, entity_type, entity_id, operation, payload, priority, attempts, last_error, created_at
                 FROM sync_queue
                 ORDER BY created_at ASC, id ASC",
                (),
            )
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::parse_item(&row)?);
        }
        Ok(items)
    }

    async fn delete_for_entity(&self, entity_type: EntityType, entity_id: &str) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM sync_queue WHERE entity_type = ? AND entity_id = ?",
                [entity_type.as_str(), entity_id],
            )
            .await?;
        Ok(rows)
    }
}
