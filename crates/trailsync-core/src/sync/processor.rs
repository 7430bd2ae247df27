//! Drain loop: delivers queued items one at a time in priority order.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, RwLock};

use super::events::{DrainReport, DrainSkipped, EventBus, SyncEvent, SyncFailure};
use super::queue::{NextItem, SyncQueue};
use crate::gateway::{handler_for, FailureKind, GatewayError, RemoteGateway};
use crate::models::{EntityType, LocalSyncStatus, SyncItem};
use crate::services::LocalStore;
use crate::state::SyncStatus;
use crate::util::unix_millis_now;

/// Holds the processing flag for the lifetime of one pass and wakes
/// waiters when released.
struct ProcessingGuard<'a> {
    flag: &'a AtomicBool,
    idle: &'a Notify,
}

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool, idle: &'a Notify) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag, idle })
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.idle.notify_waiters();
    }
}

/// Drains the queue against the gateway. At most one pass runs at a time.
pub struct SyncProcessor {
    queue: Arc<SyncQueue>,
    store: LocalStore,
    gateway: Arc<dyn RemoteGateway>,
    events: EventBus,
    online: AtomicBool,
    authenticated: AtomicBool,
    processing: AtomicBool,
    idle: Notify,
    last_sync_at: RwLock<Option<i64>>,
}

impl SyncProcessor {
    pub fn new(
        queue: Arc<SyncQueue>,
        store: LocalStore,
        gateway: Arc<dyn RemoteGateway>,
        events: EventBus,
    ) -> Self {
        Self {
            queue,
            store,
            gateway,
            events,
            online: AtomicBool::new(false),
            authenticated: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            idle: Notify::new(),
            last_sync_at: RwLock::new(None),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Returns the previous value.
    pub fn set_online(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::AcqRel)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// Returns the previous value.
    pub fn set_authenticated(&self, authenticated: bool) -> bool {
        self.authenticated.swap(authenticated, Ordering::AcqRel)
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub(crate) async fn restore_last_sync_at(&self, at: Option<i64>) {
        *self.last_sync_at.write().await = at;
    }

    /// Why a drain would not start right now, if anything.
    pub fn readiness(&self) -> Result<(), DrainSkipped> {
        if !self.is_online() {
            Err(DrainSkipped::Offline)
        } else if !self.is_authenticated() {
            Err(DrainSkipped::Unauthenticated)
        } else if self.is_processing() {
            Err(DrainSkipped::AlreadyRunning)
        } else {
            Ok(())
        }
    }

    pub async fn status(&self) -> SyncStatus {
        let (pending_items, failed_items) = self.queue.counts().await;
        SyncStatus {
            is_online: self.is_online(),
            is_syncing: self.is_processing(),
            pending_items,
            failed_items,
            total_items: pending_items + failed_items,
            last_sync_at: *self.last_sync_at.read().await,
        }
    }

    pub async fn publish_status(&self) {
        let status = self.status().await;
        self.events.publish_status(status);
    }

    /// Run one pass over the eligible queue.
    ///
    /// Per-item failures are recorded on the item and never returned. An
    /// authorization rejection stops the pass and clears the authenticated
    /// flag until the caller re-asserts it.
    pub async fn drain(&self) -> Result<DrainReport, DrainSkipped> {
        if !self.is_online() {
            return Err(DrainSkipped::Offline);
        }
        if !self.is_authenticated() {
            return Err(DrainSkipped::Unauthenticated);
        }
        let Some(guard) = ProcessingGuard::acquire(&self.processing, &self.idle) else {
            tracing::debug!("Drain requested while a pass is running");
            return Err(DrainSkipped::AlreadyRunning);
        };

        let (pending, _) = self.queue.counts().await;
        tracing::info!("Drain pass started with {} eligible item(s)", pending);
        self.events.emit(SyncEvent::Started { pending });
        self.publish_status().await;

        let report = self.run_pass().await;

        if !report.halted_on_auth {
            let now = unix_millis_now();
            if let Err(error) = self.store.set_last_sync_at(now).await {
                tracing::error!("Failed to persist last sync time: {}", error);
                self.events.error(SyncFailure::Store(error.to_string()));
            }
            *self.last_sync_at.write().await = Some(now);
        }

        drop(guard);
        self.publish_status().await;

        tracing::info!(
            "Drain pass finished: {} delivered, {} failed ({} exhausted), {} held back",
            report.delivered,
            report.failed,
            report.exhausted,
            report.skipped_blocked
        );
        if !report.halted_on_auth {
            self.events.emit(SyncEvent::Completed(report.clone()));
        }
        Ok(report)
    }

    /// Like [`SyncProcessor::drain`], but waits out a pass that is already
    /// running and then starts a fresh one.
    pub async fn drain_when_idle(&self) -> Result<DrainReport, DrainSkipped> {
        loop {
            let idle = self.idle.notified();
            match self.drain().await {
                Err(DrainSkipped::AlreadyRunning) => idle.await,
                other => return other,
            }
        }
    }

    async fn run_pass(&self) -> DrainReport {
        let mut report = DrainReport::default();
        let mut visited = HashSet::new();
        // Entities with a failure earlier in this pass
        let mut blocked: HashSet<(EntityType, String)> = HashSet::new();
        // Entities with an exhausted item from an earlier pass
        let parked = self.queue.parked_entities().await;

        while let Some(NextItem { item, remaining }) = self.queue.next_eligible(&visited).await {
            let total = visited.len() + remaining;
            visited.insert(item.id);
            let current = visited.len();

            let entity = (item.entity_type, item.entity_id.clone());
            let behind_parked = parked
                .get(&entity)
                .is_some_and(|order| *order < item.delivery_order());
            if blocked.contains(&entity) || behind_parked {
                tracing::debug!(
                    "Holding back {} {} {} behind an earlier failure",
                    item.operation,
                    item.entity_type,
                    item.entity_id
                );
                report.skipped_blocked += 1;
                self.progress(current, total, item);
                continue;
            }

            tracing::debug!(
                "Delivering {} {} {} (attempt {})",
                item.operation,
                item.entity_type,
                item.entity_id,
                item.attempts + 1
            );
            report.attempted += 1;

            let outcome = handler_for(item.entity_type)
                .apply(self.gateway.as_ref(), &item)
                .await;
            match outcome {
                Ok(_) => {
                    report.delivered += 1;
                    self.complete(&item).await;
                }
                Err(error) if error.classify() == FailureKind::Authorization => {
                    tracing::warn!(
                        "Authorization rejected while delivering {} {}; halting pass: {}",
                        item.entity_type,
                        item.entity_id,
                        error
                    );
                    report.halted_on_auth = true;
                    self.set_authenticated(false);
                    self.events.error(SyncFailure::Unauthorized {
                        message: error.to_string(),
                    });
                    self.progress(current, total, item);
                    break;
                }
                Err(error) => {
                    report.failed += 1;
                    blocked.insert((item.entity_type, item.entity_id.clone()));
                    if self.record_failure(&item, &error).await {
                        report.exhausted += 1;
                    }
                }
            }

            self.progress(current, total, item);
            self.publish_status().await;
        }

        report
    }

    fn progress(&self, current: usize, total: usize, item: SyncItem) {
        self.events.emit(SyncEvent::Progress {
            current,
            total,
            item,
        });
    }

    async fn complete(&self, item: &SyncItem) {
        if let Err(error) = self.queue.remove(&item.id).await {
            tracing::error!("Failed to drop delivered item {}: {}", item.id, error);
            self.events.error(SyncFailure::Store(error.to_string()));
            return;
        }

        if self
            .queue
            .has_items_for(item.entity_type, &item.entity_id)
            .await
        {
            return;
        }
        match self.store.get_entity(item.entity_type, &item.entity_id).await {
            Ok(Some(record)) if record.sync_status == LocalSyncStatus::Pending => {
                if let Err(error) = self
                    .store
                    .set_entity_status(item.entity_type, &item.entity_id, LocalSyncStatus::Synced)
                    .await
                {
                    tracing::error!(
                        "Failed to mark {} {} synced: {}",
                        item.entity_type,
                        item.entity_id,
                        error
                    );
                }
            }
            Ok(_) => {}
            Err(error) => {
                tracing::error!(
                    "Failed to read {} {}: {}",
                    item.entity_type,
                    item.entity_id,
                    error
                );
            }
        }
    }

    /// Charge the attempt. Returns true when the item just ran out of budget.
    async fn record_failure(&self, item: &SyncItem, error: &GatewayError) -> bool {
        let kind = error.classify();
        if kind == FailureKind::Validation {
            tracing::warn!(
                "Remote rejected {} {} {} as invalid: {}",
                item.operation,
                item.entity_type,
                item.entity_id,
                error
            );
        } else {
            tracing::debug!("Delivery of {} failed: {}", item.id, error);
        }

        let updated = match self.queue.mark_failed(&item.id, &error.to_string()).await {
            Ok(Some(updated)) => updated,
            Ok(None) => return false,
            Err(store_error) => {
                tracing::error!("Failed to record attempt for {}: {}", item.id, store_error);
                self.events.error(SyncFailure::Store(store_error.to_string()));
                return false;
            }
        };

        let exhausted = updated.is_exhausted(self.queue.max_attempts());
        if exhausted {
            if kind == FailureKind::Validation {
                tracing::warn!(
                    "Poison item {} ({} {} {}) parked after {} attempts",
                    updated.id,
                    updated.operation,
                    updated.entity_type,
                    updated.entity_id,
                    updated.attempts
                );
            } else {
                tracing::warn!(
                    "Item {} parked after {} attempts: {}",
                    updated.id,
                    updated.attempts,
                    error
                );
            }
        }
        exhausted
    }
}
