//! Shared sync state types.

use serde::{Deserialize, Serialize};

/// Coarse sync state for status indicators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Offline,
    Syncing,
    Synced,
    Error,
}

/// Aggregate view of the queue. Always recomputed, never stored as authority.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    /// Items still eligible for automatic delivery
    pub pending_items: usize,
    /// Items that exhausted the retry budget
    pub failed_items: usize,
    pub total_items: usize,
    /// Completion time of the last full drain pass (Unix ms)
    pub last_sync_at: Option<i64>,
}

impl SyncStatus {
    pub const fn state(&self) -> SyncState {
        if !self.is_online {
            SyncState::Offline
        } else if self.is_syncing {
            SyncState::Syncing
        } else if self.failed_items > 0 {
            SyncState::Error
        } else {
            SyncState::Synced
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_prefers_offline_then_syncing() {
        let mut status = SyncStatus {
            is_online: false,
            is_syncing: true,
            failed_items: 2,
            ..SyncStatus::default()
        };
        assert_eq!(status.state(), SyncState::Offline);

        status.is_online = true;
        assert_eq!(status.state(), SyncState::Syncing);

        status.is_syncing = false;
        assert_eq!(status.state(), SyncState::Error);

        status.failed_items = 0;
        assert_eq!(status.state(), SyncState::Synced);
    }
}
