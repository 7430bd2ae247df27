//! `SyncEngine`: the one handle callers hold.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connectivity::ConnectivityMonitor;
use super::events::{DrainReport, DrainSkipped, EventBus, SyncEvent, SyncFailure};
use super::processor::SyncProcessor;
use super::queue::SyncQueue;
use super::resolver::{ConflictResolver, ReconcileReport};
use super::scheduler::PeriodicScheduler;
use crate::config::EngineConfig;
use crate::gateway::{FailureKind, RemoteGateway};
use crate::models::{
    ConflictId, ConflictRecord, EntityType, LocalSyncStatus, Operation, Priority, Resolution,
    SyncItem,
};
use crate::services::LocalStore;
use crate::state::SyncStatus;
use crate::util::unix_millis_now;
use crate::{Error, Result};

/// Offline-first sync engine over a local store and a remote gateway.
///
/// Construct once at startup and clone the handle wherever it is needed.
/// Call [`SyncEngine::init`] before use and [`SyncEngine::shutdown`] on exit.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: LocalStore,
    config: EngineConfig,
    events: EventBus,
    queue: Arc<SyncQueue>,
    processor: Arc<SyncProcessor>,
    resolver: ConflictResolver,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Drains started by enqueue, reconnect or re-auth
    drains: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(store: LocalStore, gateway: Arc<dyn RemoteGateway>, config: EngineConfig) -> Self {
        let events = EventBus::new();
        let queue = Arc::new(SyncQueue::new(store.clone(), config.max_attempts));
        let processor = Arc::new(SyncProcessor::new(
            Arc::clone(&queue),
            store.clone(),
            Arc::clone(&gateway),
            events.clone(),
        ));
        let resolver =
            ConflictResolver::new(store.clone(), Arc::clone(&queue), gateway, events.clone());

        Self {
            inner: Arc::new(EngineInner {
                store,
                config,
                events,
                queue,
                processor,
                resolver,
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
                drains: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Load the queue (folding in the shutdown snapshot) and the last sync time.
    pub async fn init(&self) -> Result<SyncStatus> {
        let inner = &self.inner;
        inner
            .queue
            .load(inner.config.queue_snapshot_path.as_deref())
            .await?;
        let last_sync_at = inner.store.last_sync_at().await?;
        inner.processor.restore_last_sync_at(last_sync_at).await;
        inner.processor.publish_status().await;
        Ok(self.status().await)
    }

    /// Spawn the connectivity monitor and the periodic scheduler.
    pub async fn start_background(&self, connectivity: watch::Receiver<bool>) {
        let inner = &self.inner;
        let monitor =
            ConnectivityMonitor::new(Arc::clone(&inner.processor), inner.config.settle_delay());
        let scheduler =
            PeriodicScheduler::new(Arc::clone(&inner.processor), inner.config.sync_interval());

        let mut tasks = inner.tasks.lock().await;
        tasks.push(tokio::spawn(monitor.run(connectivity, inner.cancel.clone())));
        tasks.push(tokio::spawn(scheduler.run(inner.cancel.clone())));
        tracing::info!("Background sync tasks started");
    }

    /// Stop background tasks, wait for running drains and write the queue
    /// snapshot.
    pub async fn shutdown(&self) -> Result<()> {
        let inner = &self.inner;
        inner.cancel.cancel();

        let handles: Vec<_> = inner.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(error) = handle.await {
                tracing::error!("Background sync task failed: {}", error);
            }
        }

        let drains: Vec<_> = inner.drains.lock().await.drain(..).collect();
        for handle in drains {
            if let Err(error) = handle.await {
                tracing::error!("Triggered drain failed: {}", error);
            }
        }

        if let Some(path) = &inner.config.queue_snapshot_path {
            inner.queue.write_snapshot(path).await?;
        }
        tracing::info!("Sync engine stopped");
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.events.watch_status()
    }

    pub async fn status(&self) -> SyncStatus {
        self.inner.processor.status().await
    }

    /// Queued items, exhausted ones included, in delivery order.
    pub async fn queued_items(&self) -> Vec<SyncItem> {
        self.inner.queue.snapshot().await
    }

    /// Queue a mutation and, when possible, start a drain in the background.
    pub async fn add_to_sync_queue(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        operation: Operation,
        payload: Value,
        priority: Priority,
    ) -> Result<SyncItem> {
        let item = self
            .inner
            .queue
            .enqueue(entity_type, entity_id, operation, payload, priority)
            .await?;
        self.inner.processor.publish_status().await;
        self.trigger_drain().await;
        Ok(item)
    }

    /// Run one drain pass now.
    pub async fn drain(&self) -> std::result::Result<DrainReport, DrainSkipped> {
        self.inner.processor.drain().await
    }

    /// Manual reachability update for callers without a watch channel.
    ///
    /// Unlike the background monitor, regaining connectivity drains at once.
    pub async fn set_online(&self, online: bool) {
        let monitor = ConnectivityMonitor::new(
            Arc::clone(&self.inner.processor),
            self.inner.config.settle_delay(),
        );
        if monitor.apply(online).await {
            self.trigger_drain().await;
        }
    }

    /// Re-asserting authentication resumes draining if online.
    pub async fn set_authenticated(&self, authenticated: bool) {
        let was_authenticated = self.inner.processor.set_authenticated(authenticated);
        self.inner.processor.publish_status().await;
        if authenticated && !was_authenticated {
            tracing::info!("Authentication restored");
            self.trigger_drain().await;
        }
    }

    /// Set both flags without starting a drain. For one-shot callers that run
    /// [`SyncEngine::force_full_sync`] themselves right after.
    pub async fn prime(&self, online: bool, authenticated: bool) {
        self.inner.processor.set_online(online);
        self.inner.processor.set_authenticated(authenticated);
        self.inner.processor.publish_status().await;
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.processor.is_authenticated()
    }

    /// Re-arm items that exhausted their retry budget.
    pub async fn retry_failed(&self) -> Result<usize> {
        let reset = self.inner.queue.retry_failed().await?;
        self.inner.processor.publish_status().await;
        if reset > 0 {
            self.trigger_drain().await;
        }
        Ok(reset)
    }

    /// Queue an UPDATE for every pending entity row that has nothing queued.
    pub async fn enqueue_unsynced(&self) -> Result<usize> {
        let inner = &self.inner;
        let mut queued = 0;
        for entity_type in EntityType::ALL {
            let priority = if entity_type == EntityType::UserProfile {
                Priority::High
            } else {
                Priority::Normal
            };
            let rows = inner
                .store
                .list_entities_with_status(entity_type, LocalSyncStatus::Pending)
                .await?;
            for row in rows {
                if inner.queue.has_items_for(entity_type, &row.id).await {
                    continue;
                }
                inner
                    .queue
                    .enqueue(entity_type, &row.id, Operation::Update, row.data, priority)
                    .await?;
                queued += 1;
            }
        }
        if queued > 0 {
            tracing::info!("Queued {} unsynced local entities", queued);
            inner.processor.publish_status().await;
        }
        Ok(queued)
    }

    /// Enumerate unsynced rows, drain the queue, then pull and reconcile.
    ///
    /// A pass already in flight is waited out rather than treated as a
    /// failure. The pull asks for changes since the start of the last
    /// successful pull. Never fails past its boundary; problems are reported
    /// as `Error` events.
    pub async fn force_full_sync(&self) -> bool {
        let inner = &self.inner;
        match inner.processor.readiness() {
            Ok(()) | Err(DrainSkipped::AlreadyRunning) => {}
            Err(reason) => {
                inner.events.error(SyncFailure::Unavailable(reason));
                return false;
            }
        }
        let since = match inner.store.last_pull_at().await {
            Ok(since) => since,
            Err(error) => {
                self.report_error(&error);
                return false;
            }
        };

        if let Err(error) = self.enqueue_unsynced().await {
            self.report_error(&error);
            return false;
        }

        let report = match inner.processor.drain_when_idle().await {
            Ok(report) => report,
            Err(reason) => {
                inner.events.error(SyncFailure::Unavailable(reason));
                return false;
            }
        };
        if report.halted_on_auth {
            return false;
        }

        let pull_started = unix_millis_now();
        if let Err(error) = self.pull(since).await {
            self.report_error(&error);
            return false;
        }
        if let Err(error) = inner.store.set_last_pull_at(pull_started).await {
            self.report_error(&error);
            return false;
        }
        inner.processor.publish_status().await;

        if report.failed > 0 {
            inner.events.error(SyncFailure::ItemsFailed {
                count: report.failed,
            });
            return false;
        }
        true
    }

    /// Pull remote entities changed since `since` and reconcile them.
    pub async fn pull(&self, since: Option<i64>) -> Result<ReconcileReport> {
        self.inner.resolver.pull_all(since).await
    }

    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        self.inner.resolver.list(limit).await
    }

    /// Settle a conflict, returning the error instead of emitting it.
    pub async fn try_resolve_conflict(
        &self,
        conflict_id: &ConflictId,
        resolution: Resolution,
        resolved_data: Option<Value>,
    ) -> Result<()> {
        let result = self
            .inner
            .resolver
            .resolve(conflict_id, resolution, resolved_data)
            .await;
        if let Err(Error::Gateway(error)) = &result {
            if error.classify() == FailureKind::Authorization {
                self.inner.processor.set_authenticated(false);
            }
        }
        self.inner.processor.publish_status().await;
        result
    }

    /// Settle a conflict. Failures are reported as `Error` events.
    pub async fn resolve_conflict(
        &self,
        conflict_id: &ConflictId,
        resolution: Resolution,
        resolved_data: Option<Value>,
    ) -> bool {
        match self
            .try_resolve_conflict(conflict_id, resolution, resolved_data)
            .await
        {
            Ok(()) => true,
            Err(error) => {
                self.report_error(&error);
                false
            }
        }
    }

    async fn trigger_drain(&self) {
        if self.inner.processor.readiness().is_err() {
            return;
        }
        let mut drains = self.inner.drains.lock().await;
        if self.inner.cancel.is_cancelled() {
            return;
        }
        drains.retain(|handle| !handle.is_finished());

        let processor = Arc::clone(&self.inner.processor);
        drains.push(tokio::spawn(async move {
            if let Err(skipped) = processor.drain().await {
                tracing::debug!("Triggered drain skipped: {}", skipped);
            }
        }));
    }

    fn report_error(&self, error: &Error) {
        let failure = match error {
            Error::Gateway(gateway) if gateway.classify() == FailureKind::Authorization => {
                self.inner.processor.set_authenticated(false);
                SyncFailure::Unauthorized {
                    message: gateway.to_string(),
                }
            }
            Error::Gateway(gateway) => SyncFailure::Remote(gateway.to_string()),
            Error::InvalidInput(message) | Error::NotFound(message) => {
                SyncFailure::Rejected(message.clone())
            }
            other => SyncFailure::Store(other.to_string()),
        };
        tracing::warn!("Sync failed: {}", failure);
        self.inner.events.error(failure);
    }
}
