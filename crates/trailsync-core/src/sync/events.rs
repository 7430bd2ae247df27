//! Lifecycle events and the channels that carry them.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

use crate::models::{ConflictRecord, SyncItem};
use crate::state::SyncStatus;

const EVENT_CAPACITY: usize = 256;

/// Outcome of one completed drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Gateway deliveries attempted
    pub attempted: usize,
    pub delivered: usize,
    /// Deliveries that failed and were charged an attempt
    pub failed: usize,
    /// Of `failed`, items that used up their budget in this pass
    pub exhausted: usize,
    /// Items held back because an earlier item for the same entity failed
    pub skipped_blocked: usize,
    /// The pass stopped on an authorization rejection
    pub halted_on_auth: bool,
}

/// Why a drain request did not start a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DrainSkipped {
    #[error("a drain pass is already running")]
    AlreadyRunning,
    #[error("device is offline")]
    Offline,
    #[error("not authenticated")]
    Unauthenticated,
}

/// Error surfaced to listeners. Never returned from a drain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncFailure {
    #[error("authentication failed, sign in again: {message}")]
    Unauthorized { message: String },
    #[error("cannot sync: {0}")]
    Unavailable(DrainSkipped),
    #[error("{count} item(s) failed to sync")]
    ItemsFailed { count: usize },
    #[error("remote request failed: {0}")]
    Remote(String),
    #[error("local store error: {0}")]
    Store(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

impl SyncFailure {
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

/// Callback surface of the engine.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A drain pass began with this many eligible items
    Started { pending: usize },
    /// One item was visited; `current` counts from 1
    Progress {
        current: usize,
        total: usize,
        item: SyncItem,
    },
    Completed(DrainReport),
    Error(SyncFailure),
    ConflictDetected(ConflictRecord),
}

/// Event fan-out plus the latest status snapshot.
#[derive(Clone)]
pub struct EventBus {
    events: broadcast::Sender<SyncEvent>,
    status: watch::Sender<SyncStatus>,
}

impl EventBus {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status, _) = watch::channel(SyncStatus::default());
        Self { events, status }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Send to current subscribers; having none is not an error.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    pub fn error(&self, failure: SyncFailure) {
        tracing::debug!("Sync error event: {}", failure);
        self.emit(SyncEvent::Error(failure));
    }

    pub fn publish_status(&self, status: SyncStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.emit(SyncEvent::Started { pending: 0 });

        let mut rx = bus.subscribe();
        bus.error(SyncFailure::ItemsFailed { count: 2 });
        match rx.recv().await.unwrap() {
            SyncEvent::Error(failure) => assert_eq!(failure.to_string(), "2 item(s) failed to sync"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn publish_status_only_notifies_on_change() {
        let bus = EventBus::new();
        let mut rx = bus.watch_status();
        rx.mark_unchanged();

        bus.publish_status(SyncStatus::default());
        assert!(!rx.has_changed().unwrap());

        bus.publish_status(SyncStatus {
            pending_items: 1,
            total_items: 1,
            ..SyncStatus::default()
        });
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().pending_items, 1);
    }
}
