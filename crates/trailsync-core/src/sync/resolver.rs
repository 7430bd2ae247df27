//! Pull reconciliation and conflict resolution.

use std::sync::Arc;

use serde_json::Value;

use super::events::{EventBus, SyncEvent};
use super::queue::SyncQueue;
use crate::gateway::{entity_id_of, handler_for, pulled_entities, RemoteGateway};
use crate::models::{
    ConflictId, ConflictRecord, EntityRecord, EntityType, LocalSyncStatus, Operation, Resolution,
};
use crate::services::LocalStore;
use crate::util::{json_timestamp_millis, unix_millis_now};
use crate::{Error, Result};

/// Counts from one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub fetched: usize,
    pub unchanged: usize,
    /// Remote copies written over local rows
    pub applied: usize,
    pub conflicts: usize,
    /// Bodies without a usable id
    pub ignored: usize,
}

/// What happened to one pulled entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    Unchanged,
    Applied,
    Conflict(ConflictRecord),
    Ignored,
}

/// Owns conflict records: creates them during pulls, removes them only on
/// an explicit resolution.
pub struct ConflictResolver {
    store: LocalStore,
    queue: Arc<SyncQueue>,
    gateway: Arc<dyn RemoteGateway>,
    events: EventBus,
}

impl ConflictResolver {
    pub fn new(
        store: LocalStore,
        queue: Arc<SyncQueue>,
        gateway: Arc<dyn RemoteGateway>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            queue,
            gateway,
            events,
        }
    }

    /// Pull every entity kind changed since `since` and reconcile it.
    pub async fn pull_all(&self, since: Option<i64>) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for entity_type in EntityType::ALL {
            self.pull(entity_type, since, &mut report).await?;
        }
        tracing::info!(
            "Pulled {} remote entities: {} applied, {} conflicts, {} unchanged",
            report.fetched,
            report.applied,
            report.conflicts,
            report.unchanged
        );
        Ok(report)
    }

    async fn pull(
        &self,
        entity_type: EntityType,
        since: Option<i64>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let request = handler_for(entity_type).pull_request(since);
        let response = self.gateway.send(request).await?;

        for remote in pulled_entities(response) {
            report.fetched += 1;
            match self.reconcile(entity_type, remote).await? {
                Reconciled::Unchanged => report.unchanged += 1,
                Reconciled::Applied => report.applied += 1,
                Reconciled::Conflict(_) => report.conflicts += 1,
                Reconciled::Ignored => report.ignored += 1,
            }
        }
        Ok(())
    }

    /// Compare one remote body against the local copy.
    pub async fn reconcile(&self, entity_type: EntityType, remote: Value) -> Result<Reconciled> {
        let Some(entity_id) = entity_id_of(&remote) else {
            tracing::warn!("Ignoring pulled {} without an id", entity_type);
            return Ok(Reconciled::Ignored);
        };
        let remote_updated_at = remote_timestamp(&remote);
        let local = self.store.get_entity(entity_type, &entity_id).await?;

        let remote_is_newer = match (&local, remote_updated_at) {
            (None, _) => true,
            (Some(local), Some(remote_at)) => remote_at > local.updated_at,
            (Some(_), None) => false,
        };
        if !remote_is_newer {
            return Ok(Reconciled::Unchanged);
        }

        let open_conflict = self.store.find_conflict(entity_type, &entity_id).await?;
        let has_pending = self.queue.has_items_for(entity_type, &entity_id).await;

        if !has_pending && open_conflict.is_none() {
            self.store
                .put_entity(&EntityRecord {
                    entity_type,
                    id: entity_id.clone(),
                    data: remote,
                    updated_at: remote_updated_at.unwrap_or(0),
                    sync_status: LocalSyncStatus::Synced,
                })
                .await?;
            tracing::debug!("Applied remote {} {}", entity_type, entity_id);
            return Ok(Reconciled::Applied);
        }

        let local_data = match &local {
            Some(record) => record.data.clone(),
            None => self.queued_payload(entity_type, &entity_id).await,
        };

        let record = match open_conflict {
            Some(mut existing) => {
                existing.local_data = local_data;
                existing.remote_data = remote;
                self.store.save_conflict(&existing).await?;
                tracing::debug!("Refreshed open conflict {}", existing.conflict_id);
                existing
            }
            None => {
                let record = ConflictRecord::manual(entity_type, &entity_id, local_data, remote);
                self.store.save_conflict(&record).await?;
                tracing::info!(
                    "Conflict {} detected for {} {}",
                    record.conflict_id,
                    entity_type,
                    entity_id
                );
                self.events.emit(SyncEvent::ConflictDetected(record.clone()));
                record
            }
        };

        if local.is_some() {
            self.store
                .set_entity_status(entity_type, &entity_id, LocalSyncStatus::Conflict)
                .await?;
        }
        Ok(Reconciled::Conflict(record))
    }

    /// Apply a resolution. The record is removed only once its effects landed.
    pub async fn resolve(
        &self,
        conflict_id: &ConflictId,
        resolution: Resolution,
        resolved_data: Option<Value>,
    ) -> Result<()> {
        let record = self
            .store
            .get_conflict(conflict_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;

        match resolution {
            Resolution::Manual => {
                tracing::debug!("Conflict {} left for manual resolution", conflict_id);
                return Ok(());
            }
            Resolution::UseLocal => {
                self.push(&record, &record.local_data).await?;
                let status = if self
                    .queue
                    .has_items_for(record.entity_type, &record.entity_id)
                    .await
                {
                    LocalSyncStatus::Pending
                } else {
                    LocalSyncStatus::Synced
                };
                self.store
                    .set_entity_status(record.entity_type, &record.entity_id, status)
                    .await?;
            }
            Resolution::UseRemote => {
                let updated_at =
                    remote_timestamp(&record.remote_data).unwrap_or_else(unix_millis_now);
                self.overwrite_local(&record, record.remote_data.clone(), updated_at)
                    .await?;
            }
            Resolution::Merge => {
                let data = resolved_data.ok_or_else(|| {
                    Error::InvalidInput("merge resolution requires resolved data".to_string())
                })?;
                self.push(&record, &data).await?;
                self.overwrite_local(&record, data, unix_millis_now()).await?;
            }
        }

        self.store.delete_conflict(conflict_id).await?;
        tracing::info!(
            "Resolved conflict {} on {} {} with {}",
            conflict_id,
            record.entity_type,
            record.entity_id,
            resolution
        );
        Ok(())
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        self.store.list_conflicts(limit).await
    }

    async fn push(&self, record: &ConflictRecord, data: &Value) -> Result<()> {
        let request = handler_for(record.entity_type).request(
            Operation::Update,
            &record.entity_id,
            data,
        )?;
        self.gateway.send(request).await?;
        Ok(())
    }

    /// Write `data` locally and drop queued mutations it supersedes.
    async fn overwrite_local(
        &self,
        record: &ConflictRecord,
        data: Value,
        updated_at: i64,
    ) -> Result<()> {
        self.store
            .put_entity(&EntityRecord {
                entity_type: record.entity_type,
                id: record.entity_id.clone(),
                data,
                updated_at,
                sync_status: LocalSyncStatus::Synced,
            })
            .await?;
        let dropped = self
            .queue
            .remove_for_entity(record.entity_type, &record.entity_id)
            .await?;
        if dropped > 0 {
            tracing::debug!(
                "Dropped {} queued item(s) for {} {}",
                dropped,
                record.entity_type,
                record.entity_id
            );
        }
        Ok(())
    }

    async fn queued_payload(&self, entity_type: EntityType, entity_id: &str) -> Value {
        self.queue
            .snapshot()
            .await
            .into_iter()
            .filter(|item| item.same_entity(entity_type, entity_id))
            .max_by_key(|item| item.timestamp)
            .map_or(Value::Null, |item| item.payload)
    }
}

fn remote_timestamp(remote: &Value) -> Option<i64> {
    json_timestamp_millis(remote, "updated_at").or_else(|| json_timestamp_millis(remote, "updatedAt"))
}
