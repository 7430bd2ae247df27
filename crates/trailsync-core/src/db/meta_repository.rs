//! Small key/value status blob (last sync time and friends)

use crate::error::Result;
use libsql::Connection;

const LAST_SYNC_AT_KEY: &str = "last_sync_at";
const LAST_PULL_AT_KEY: &str = "last_pull_at";

/// Trait for sync metadata operations (async)
#[allow(async_fn_in_trait)]
pub trait MetaRepository {
    /// Load the completion time of the last drain pass
    async fn last_sync_at(&self) -> Result<Option<i64>>;

    /// Store the completion time of the last drain pass
    async fn set_last_sync_at(&self, at: i64) -> Result<()>;

    /// Load the start time of the last successful pull
    async fn last_pull_at(&self) -> Result<Option<i64>>;

    /// Store the start time of the last successful pull
    async fn set_last_pull_at(&self, at: i64) -> Result<()>;
}

/// libSQL implementation of `MetaRepository`
pub struct LibSqlMetaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlMetaRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM sync_meta WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    async fn get_millis(&self, key: &str) -> Result<Option<i64>> {
        Ok(self
            .get_value(key)
            .await?
            .and_then(|value| value.trim().parse().ok()))
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }
}

impl MetaRepository for LibSqlMetaRepository<'_> {
    async fn last_sync_at(&self) -> Result<Option<i64>> {
        self.get_millis(LAST_SYNC_AT_KEY).await
    }

    async fn set_last_sync_at(&self, at: i64) -> Result<()> {
        self.set_value(LAST_SYNC_AT_KEY, &at.to_string()).await
    }

    async fn last_pull_at(&self) -> Result<Option<i64>> {
        self.get_millis(LAST_PULL_AT_KEY).await
    }

    async fn set_last_pull_at(&self, at: i64) -> Result<()> {
        self.set_value(LAST_PULL_AT_KEY, &at.to_string()).await
    }
}
