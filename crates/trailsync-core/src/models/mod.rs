//! Data models for Trailsync

mod entity;
mod sync_conflict;
mod sync_item;

pub use entity::{EntityRecord, EntityType, LocalSyncStatus, Operation, Priority};
pub use sync_conflict::{ConflictId, ConflictRecord, Resolution};
pub use sync_item::{QueueKey, SyncItem, SyncItemId};
