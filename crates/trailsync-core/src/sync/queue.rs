//! Persisted, deduplicated queue of pending mutations.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::models::{EntityType, Operation, Priority, QueueKey, SyncItem, SyncItemId};
use crate::services::LocalStore;
use crate::{Error, Result};

/// Position of an item in delivery order.
pub type DeliveryOrder = (Priority, i64, SyncItemId);

/// Item ready for the next delivery step.
#[derive(Debug, Clone)]
pub struct NextItem {
    pub item: SyncItem,
    /// Eligible items not yet visited, this one included
    pub remaining: usize,
}

/// In-memory queue mirrored to the `sync_queue` table.
///
/// Every mutation writes the store first, then memory, while holding the
/// queue lock, so the two never disagree about which items exist.
pub struct SyncQueue {
    store: LocalStore,
    items: Mutex<Vec<SyncItem>>,
    max_attempts: u32,
}

impl SyncQueue {
    pub fn new(store: LocalStore, max_attempts: u32) -> Self {
        Self {
            store,
            items: Mutex::new(Vec::new()),
            max_attempts,
        }
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Rebuild memory from the store, folding in the shutdown snapshot if any.
    ///
    /// The snapshot is consumed: once merged into the table it is deleted, so
    /// a session that ends without writing a fresh one cannot resurrect items
    /// delivered in the meantime. Returns the number of live items.
    pub async fn load(&self, snapshot_path: Option<&Path>) -> Result<usize> {
        let persisted = self.store.list_items().await?;
        let cached = match snapshot_path {
            Some(path) => read_snapshot(path).await,
            None => Vec::new(),
        };

        let merged = merge_loaded(persisted, cached);
        for id in &merged.superseded {
            self.store.delete_item(id).await?;
        }
        for item in &merged.write_back {
            self.store.persist_item(item).await?;
        }
        if let Some(path) = snapshot_path {
            discard_snapshot(path).await;
        }

        let count = merged.items.len();
        *self.items.lock().await = merged.items;
        tracing::info!(
            "Loaded {} queued item(s) ({} restored from snapshot)",
            count,
            merged.write_back.len()
        );
        Ok(count)
    }

    /// Queue a mutation. An existing item with the same key is replaced.
    pub async fn enqueue(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        operation: Operation,
        payload: Value,
        priority: Priority,
    ) -> Result<SyncItem> {
        let entity_id = entity_id.trim();
        if entity_id.is_empty() {
            return Err(Error::InvalidInput("entity id must not be empty".to_string()));
        }
        if !entity_type.supports(operation) {
            return Err(Error::InvalidInput(format!(
                "{operation} is not supported for {entity_type}"
            )));
        }

        let item = SyncItem::new(entity_type, entity_id, operation, payload, priority);
        let key = item.key();

        let mut items = self.items.lock().await;
        if let Some(index) = items.iter().position(|existing| existing.key() == key) {
            let replaced = &items[index];
            self.store.delete_item(&replaced.id).await?;
            tracing::debug!(
                "Replacing queued {} {} {} ({})",
                operation,
                entity_type,
                entity_id,
                replaced.id
            );
            items.remove(index);
        }

        self.store.persist_item(&item).await?;
        items.push(item.clone());
        tracing::debug!("Queued {} {} {} as {}", operation, entity_type, entity_id, item.id);
        Ok(item)
    }

    /// Drop a delivered item. Returns false if it was already gone.
    pub async fn remove(&self, id: &SyncItemId) -> Result<bool> {
        let mut items = self.items.lock().await;
        let Some(index) = items.iter().position(|item| item.id == *id) else {
            return Ok(false);
        };
        self.store.delete_item(id).await?;
        items.remove(index);
        Ok(true)
    }

    /// Charge one failed attempt. `None` if the item left the queue meanwhile.
    pub async fn mark_failed(&self, id: &SyncItemId, error: &str) -> Result<Option<SyncItem>> {
        let mut items = self.items.lock().await;
        let Some(item) = items.iter_mut().find(|item| item.id == *id) else {
            return Ok(None);
        };

        let mut updated = item.clone();
        updated.attempts = updated.attempts.saturating_add(1);
        updated.last_error = Some(error.to_string());
        self.store.record_attempt(&updated).await?;
        *item = updated.clone();
        Ok(Some(updated))
    }

    /// Reset exhausted items so automatic drains pick them up again.
    pub async fn retry_failed(&self) -> Result<usize> {
        let mut items = self.items.lock().await;
        let mut reset = 0;
        for item in items.iter_mut() {
            if !item.is_exhausted(self.max_attempts) {
                continue;
            }
            let mut updated = item.clone();
            updated.attempts = 0;
            updated.last_error = None;
            self.store.record_attempt(&updated).await?;
            *item = updated;
            reset += 1;
        }
        if reset > 0 {
            tracing::info!("Re-armed {} failed item(s)", reset);
        }
        Ok(reset)
    }

    /// Remove every item targeting one entity.
    pub async fn remove_for_entity(&self, entity_type: EntityType, entity_id: &str) -> Result<usize> {
        let mut items = self.items.lock().await;
        self.store
            .delete_items_for_entity(entity_type, entity_id)
            .await?;
        let before = items.len();
        items.retain(|item| !item.same_entity(entity_type, entity_id));
        Ok(before - items.len())
    }

    /// First eligible item in delivery order that has not been visited yet.
    pub async fn next_eligible(&self, visited: &HashSet<SyncItemId>) -> Option<NextItem> {
        let items = self.items.lock().await;
        let mut eligible: Vec<&SyncItem> = items
            .iter()
            .filter(|item| !item.is_exhausted(self.max_attempts) && !visited.contains(&item.id))
            .collect();
        let remaining = eligible.len();
        eligible.sort_by_key(|item| item.delivery_order());
        eligible.first().map(|item| NextItem {
            item: (*item).clone(),
            remaining,
        })
    }

    /// Earliest delivery position of an exhausted item, per entity.
    ///
    /// Later items for these entities must wait until the parked one is
    /// retried and delivered.
    pub async fn parked_entities(&self) -> HashMap<(EntityType, String), DeliveryOrder> {
        let items = self.items.lock().await;
        let mut parked: HashMap<(EntityType, String), DeliveryOrder> = HashMap::new();
        for item in items.iter().filter(|item| item.is_exhausted(self.max_attempts)) {
            let order = item.delivery_order();
            parked
                .entry((item.entity_type, item.entity_id.clone()))
                .and_modify(|earliest| {
                    if order < *earliest {
                        *earliest = order;
                    }
                })
                .or_insert(order);
        }
        parked
    }

    /// All items, exhausted ones included, in delivery order.
    pub async fn snapshot(&self) -> Vec<SyncItem> {
        let mut items = self.items.lock().await.clone();
        items.sort_by_key(SyncItem::delivery_order);
        items
    }

    /// `(pending, failed)` counts.
    pub async fn counts(&self) -> (usize, usize) {
        let items = self.items.lock().await;
        let failed = items
            .iter()
            .filter(|item| item.is_exhausted(self.max_attempts))
            .count();
        (items.len() - failed, failed)
    }

    pub async fn has_items_for(&self, entity_type: EntityType, entity_id: &str) -> bool {
        self.items
            .lock()
            .await
            .iter()
            .any(|item| item.same_entity(entity_type, entity_id))
    }

    /// Write the in-memory queue to the fast-cache file.
    pub async fn write_snapshot(&self, path: &Path) -> Result<()> {
        let items = self.snapshot().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(&items)?;
        tokio::fs::write(path, json).await?;
        tracing::debug!("Wrote {} item(s) to {}", items.len(), path.display());
        Ok(())
    }
}

/// Result of folding the snapshot into the persisted queue.
#[derive(Debug, Default)]
pub(crate) struct MergedQueue {
    pub items: Vec<SyncItem>,
    /// Snapshot copies that must be written to the table
    pub write_back: Vec<SyncItem>,
    /// Persisted rows displaced by a snapshot copy under another id
    pub superseded: Vec<SyncItemId>,
}

/// Deduplicate by key across both sources. Higher `attempts` wins; on a tie
/// the persisted copy is kept.
pub(crate) fn merge_loaded(persisted: Vec<SyncItem>, cached: Vec<SyncItem>) -> MergedQueue {
    let mut merged = MergedQueue::default();
    let mut by_key: HashMap<QueueKey, usize> = HashMap::new();

    for item in persisted {
        match by_key.get(&item.key()) {
            Some(&index) => {
                let kept = &merged.items[index];
                if item.timestamp > kept.timestamp {
                    merged.superseded.push(kept.id);
                    merged.items[index] = item;
                } else {
                    merged.superseded.push(item.id);
                }
            }
            None => {
                by_key.insert(item.key(), merged.items.len());
                merged.items.push(item);
            }
        }
    }

    for item in cached {
        match by_key.get(&item.key()) {
            Some(&index) => {
                let kept = &merged.items[index];
                if item.attempts <= kept.attempts {
                    continue;
                }
                if kept.id != item.id {
                    merged.superseded.push(kept.id);
                }
                merged.write_back.push(item.clone());
                merged.items[index] = item;
            }
            None => {
                by_key.insert(item.key(), merged.items.len());
                merged.write_back.push(item.clone());
                merged.items.push(item);
            }
        }
    }

    merged
}

async fn read_snapshot(path: &Path) -> Vec<SyncItem> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(error) => {
            tracing::warn!("Ignoring unreadable queue snapshot {}: {}", path.display(), error);
            return Vec::new();
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(items) => items,
        Err(error) => {
            tracing::warn!("Ignoring corrupt queue snapshot {}: {}", path.display(), error);
            Vec::new()
        }
    }
}

async fn discard_snapshot(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Consumed queue snapshot {}", path.display()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => {
            tracing::warn!("Failed to remove queue snapshot {}: {}", path.display(), error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn queue() -> SyncQueue {
        SyncQueue::new(LocalStore::open_in_memory().await.unwrap(), 3)
    }

    fn item(entity_id: &str, attempts: u32) -> SyncItem {
        let mut item = SyncItem::new(
            EntityType::Trail,
            entity_id,
            Operation::Update,
            json!({ "id": entity_id }),
            Priority::Normal,
        );
        item.attempts = attempts;
        item
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enqueue_persists_and_replaces_same_key() {
        let queue = queue().await;
        let first = queue
            .enqueue(EntityType::Trail, "t1", Operation::Update, json!({ "v": 1 }), Priority::Normal)
            .await
            .unwrap();
        let second = queue
            .enqueue(EntityType::Trail, "t1", Operation::Update, json!({ "v": 2 }), Priority::Normal)
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
        let items = queue.snapshot().await;
        assert_eq!(items, vec![second.clone()]);
        assert_eq!(queue.store.list_items().await.unwrap(), vec![second]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enqueue_keeps_distinct_operations() {
        let queue = queue().await;
        queue
            .enqueue(EntityType::Trail, "t1", Operation::Create, json!({}), Priority::Normal)
            .await
            .unwrap();
        queue
            .enqueue(EntityType::Trail, "t1", Operation::Update, json!({}), Priority::Normal)
            .await
            .unwrap();
        assert_eq!(queue.counts().await, (2, 0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enqueue_rejects_unsupported_pairs() {
        let queue = queue().await;
        let error = queue
            .enqueue(EntityType::UserProfile, "me", Operation::Delete, Value::Null, Priority::High)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));

        let error = queue
            .enqueue(EntityType::Trail, "  ", Operation::Create, json!({}), Priority::High)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mark_failed_counts_until_exhausted() {
        let queue = queue().await;
        let item = queue
            .enqueue(EntityType::Trail, "t1", Operation::Create, json!({}), Priority::Normal)
            .await
            .unwrap();

        for expected in 1..=3 {
            let updated = queue.mark_failed(&item.id, "HTTP 500").await.unwrap().unwrap();
            assert_eq!(updated.attempts, expected);
        }
        assert_eq!(queue.counts().await, (0, 1));
        assert!(queue.next_eligible(&HashSet::new()).await.is_none());

        let persisted = queue.store.list_items().await.unwrap();
        assert_eq!(persisted[0].attempts, 3);
        assert_eq!(persisted[0].last_error.as_deref(), Some("HTTP 500"));

        assert_eq!(queue.retry_failed().await.unwrap(), 1);
        assert_eq!(queue.counts().await, (1, 0));
        assert_eq!(queue.store.list_items().await.unwrap()[0].attempts, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mark_failed_ignores_replaced_items() {
        let queue = queue().await;
        let first = queue
            .enqueue(EntityType::Trail, "t1", Operation::Update, json!({}), Priority::Normal)
            .await
            .unwrap();
        queue
            .enqueue(EntityType::Trail, "t1", Operation::Update, json!({}), Priority::Normal)
            .await
            .unwrap();

        assert!(queue.mark_failed(&first.id, "boom").await.unwrap().is_none());
        assert_eq!(queue.store.list_items().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn next_eligible_follows_delivery_order() {
        let queue = queue().await;
        let low = queue
            .enqueue(EntityType::Trail, "a", Operation::Create, json!({}), Priority::Low)
            .await
            .unwrap();
        let critical = queue
            .enqueue(EntityType::Trail, "b", Operation::Create, json!({}), Priority::Critical)
            .await
            .unwrap();

        let mut visited = HashSet::new();
        let next = queue.next_eligible(&visited).await.unwrap();
        assert_eq!(next.item.id, critical.id);
        assert_eq!(next.remaining, 2);

        visited.insert(critical.id);
        let next = queue.next_eligible(&visited).await.unwrap();
        assert_eq!(next.item.id, low.id);
        assert_eq!(next.remaining, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_for_entity_clears_memory_and_store() {
        let queue = queue().await;
        for operation in [Operation::Create, Operation::Update] {
            queue
                .enqueue(EntityType::Trail, "t1", operation, json!({}), Priority::Normal)
                .await
                .unwrap();
        }
        queue
            .enqueue(EntityType::Trail, "t2", Operation::Update, json!({}), Priority::Normal)
            .await
            .unwrap();

        assert_eq!(queue.remove_for_entity(EntityType::Trail, "t1").await.unwrap(), 2);
        assert!(!queue.has_items_for(EntityType::Trail, "t1").await);
        assert_eq!(queue.store.list_items().await.unwrap().len(), 1);
    }

    #[test]
    fn merge_prefers_higher_attempts() {
        let persisted = item("t1", 1);
        let mut cached = persisted.clone();
        cached.attempts = 2;

        let merged = merge_loaded(vec![persisted], vec![cached.clone()]);
        assert_eq!(merged.items, vec![cached.clone()]);
        assert_eq!(merged.write_back, vec![cached]);
        assert!(merged.superseded.is_empty());
    }

    #[test]
    fn merge_tie_keeps_persisted_copy() {
        let persisted = item("t1", 1);
        let cached = item("t1", 1);

        let merged = merge_loaded(vec![persisted.clone()], vec![cached]);
        assert_eq!(merged.items, vec![persisted]);
        assert!(merged.write_back.is_empty());
    }

    #[test]
    fn merge_replaces_lower_attempt_row_with_other_id() {
        let persisted = item("t1", 0);
        let cached = item("t1", 2);

        let merged = merge_loaded(vec![persisted.clone()], vec![cached.clone()]);
        assert_eq!(merged.items, vec![cached]);
        assert_eq!(merged.superseded, vec![persisted.id]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_restores_snapshot_only_items() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshot_path = tmp.path().join("queue.json");

        let store = LocalStore::open_in_memory().await.unwrap();
        let persisted = item("t1", 0);
        store.persist_item(&persisted).await.unwrap();

        let mut cached_t1 = persisted.clone();
        cached_t1.attempts = 2;
        let cached_t2 = item("t2", 1);
        std::fs::write(
            &snapshot_path,
            serde_json::to_vec(&vec![cached_t1, cached_t2.clone()]).unwrap(),
        )
        .unwrap();

        let queue = SyncQueue::new(store.clone(), 3);
        assert_eq!(queue.load(Some(&snapshot_path)).await.unwrap(), 2);

        let rows = store.list_items().await.unwrap();
        assert_eq!(rows.len(), 2);
        let t1 = rows.iter().find(|row| row.entity_id == "t1").unwrap();
        assert_eq!(t1.attempts, 2);
        assert!(rows.contains(&cached_t2));
        assert!(!snapshot_path.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn parked_entities_reports_earliest_exhausted_item() {
        let queue = queue().await;
        let create = queue
            .enqueue(EntityType::Trail, "t1", Operation::Create, json!({}), Priority::Normal)
            .await
            .unwrap();
        queue
            .enqueue(EntityType::Trail, "t2", Operation::Create, json!({}), Priority::Normal)
            .await
            .unwrap();
        for _ in 0..3 {
            queue.mark_failed(&create.id, "HTTP 500").await.unwrap();
        }
        queue.mark_failed(&queue.snapshot().await[1].id, "HTTP 500").await.unwrap();

        let parked = queue.parked_entities().await;
        assert_eq!(parked.len(), 1);
        assert_eq!(
            parked.get(&(EntityType::Trail, "t1".to_string())),
            Some(&create.delivery_order())
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_ignores_corrupt_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshot_path = tmp.path().join("queue.json");
        std::fs::write(&snapshot_path, b"not json").unwrap();

        let queue = queue().await;
        assert_eq!(queue.load(Some(&snapshot_path)).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn write_snapshot_round_trips_through_load() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshot_path = tmp.path().join("cache").join("queue.json");

        let queue = queue().await;
        queue
            .enqueue(EntityType::MediaFile, "m1", Operation::Create, json!({}), Priority::Low)
            .await
            .unwrap();
        queue.write_snapshot(&snapshot_path).await.unwrap();

        let fresh = SyncQueue::new(LocalStore::open_in_memory().await.unwrap(), 3);
        assert_eq!(fresh.load(Some(&snapshot_path)).await.unwrap(), 1);
        assert_eq!(fresh.snapshot().await, queue.snapshot().await);
    }
}
