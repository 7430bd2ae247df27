//! Queued mutation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity::{EntityType, Operation, Priority};

/// A unique identifier for a queued item, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncItemId(Uuid);

impl SyncItemId {
    /// Create a new unique item ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SyncItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Deduplication key: at most one live item per triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueKey {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: Operation,
}

/// A single pending mutation awaiting delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    pub id: SyncItemId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: Operation,
    /// Full entity for CREATE/UPDATE, `Null` for DELETE
    pub payload: serde_json::Value,
    /// Enqueue timestamp (Unix ms)
    pub timestamp: i64,
    /// Failed delivery attempts so far
    pub attempts: u32,
    pub last_error: Option<String>,
    pub priority: Priority,
}

impl SyncItem {
    /// Create a fresh item stamped with the current time
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        operation: Operation,
        payload: serde_json::Value,
        priority: Priority,
    ) -> Self {
        let payload = if operation == Operation::Delete {
            serde_json::Value::Null
        } else {
            payload
        };
        Self {
            id: SyncItemId::new(),
            entity_type,
            entity_id: entity_id.into(),
            operation,
            payload,
            timestamp: crate::util::unix_millis_now(),
            attempts: 0,
            last_error: None,
            priority,
        }
    }

    pub fn key(&self) -> QueueKey {
        QueueKey {
            entity_type: self.entity_type,
            entity_id: self.entity_id.clone(),
            operation: self.operation,
        }
    }

    /// Whether the item has used up `max_attempts` and is parked.
    pub const fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.attempts >= max_attempts
    }

    /// Delivery order: priority tier first, then enqueue time, then id.
    pub fn delivery_order(&self) -> (Priority, i64, SyncItemId) {
        (self.priority, self.timestamp, self.id)
    }

    /// Whether this item targets the given entity.
    pub fn same_entity(&self, entity_type: EntityType, entity_id: &str) -> bool {
        self.entity_type == entity_type && self.entity_id == entity_id
    }
}
