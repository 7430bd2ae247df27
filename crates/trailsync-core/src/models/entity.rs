//! Entity kinds, operations and priority tiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Kind of entity a queued mutation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Trail,
    TrackPoint,
    MediaFile,
    UserProfile,
}

impl EntityType {
    /// All entity kinds, in pull-reconciliation order.
    pub const ALL: [Self; 4] = [
        Self::UserProfile,
        Self::Trail,
        Self::TrackPoint,
        Self::MediaFile,
    ];

    /// Stable wire/storage name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trail => "TRAIL",
            Self::TrackPoint => "TRACK_POINT",
            Self::MediaFile => "MEDIA_FILE",
            Self::UserProfile => "USER_PROFILE",
        }
    }

    /// Local table holding entities of this kind
    pub const fn table(self) -> &'static str {
        match self {
            Self::Trail => "trails",
            Self::TrackPoint => "track_points",
            Self::MediaFile => "media_files",
            Self::UserProfile => "users",
        }
    }

    /// Whether the remote backend accepts `operation` for this kind.
    pub const fn supports(self, operation: Operation) -> bool {
        match self {
            Self::UserProfile => matches!(operation, Operation::Update),
            Self::Trail | Self::TrackPoint | Self::MediaFile => true,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "TRAIL" => Ok(Self::Trail),
            "TRACK_POINT" => Ok(Self::TrackPoint),
            "MEDIA_FILE" => Ok(Self::MediaFile),
            "USER_PROFILE" => Ok(Self::UserProfile),
            other => Err(Error::InvalidInput(format!("unknown entity type: {other}"))),
        }
    }
}

/// Mutation applied to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown operation: {other}"))),
        }
    }
}

/// Delivery tier. Variant order is delivery order: `Critical` drains first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Normal => "NORMAL",
            Self::Low => "LOW",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(Self::Critical),
            "HIGH" => Ok(Self::High),
            "NORMAL" => Ok(Self::Normal),
            "LOW" => Ok(Self::Low),
            other => Err(Error::InvalidInput(format!("unknown priority: {other}"))),
        }
    }
}

/// Sync state of a row in one of the local entity tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalSyncStatus {
    Synced,
    Pending,
    Conflict,
}

impl LocalSyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Conflict => "conflict",
        }
    }

    pub(crate) fn parse(value: &str) -> Self {
        match value {
            "synced" => Self::Synced,
            "conflict" => Self::Conflict,
            _ => Self::Pending,
        }
    }
}

/// Local copy of an entity as stored in its table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_type: EntityType,
    pub id: String,
    /// Full entity body as last written locally
    pub data: serde_json::Value,
    /// Last local modification (Unix ms)
    pub updated_at: i64,
    pub sync_status: LocalSyncStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_by_severity() {
        let mut tiers = vec![
            Priority::Low,
            Priority::Critical,
            Priority::Normal,
            Priority::High,
        ];
        tiers.sort();
        assert_eq!(
            tiers,
            vec![
                Priority::Critical,
                Priority::High,
                Priority::Normal,
                Priority::Low
            ]
        );
    }

    #[test]
    fn entity_type_parses_loose_spellings() {
        assert_eq!(
            "track-point".parse::<EntityType>().unwrap(),
            EntityType::TrackPoint
        );
        assert_eq!(
            "user_profile".parse::<EntityType>().unwrap(),
            EntityType::UserProfile
        );
        assert!("comment".parse::<EntityType>().is_err());
    }

    #[test]
    fn user_profile_only_supports_update() {
        assert!(EntityType::UserProfile.supports(Operation::Update));
        assert!(!EntityType::UserProfile.supports(Operation::Create));
        assert!(!EntityType::UserProfile.supports(Operation::Delete));
        assert!(EntityType::Trail.supports(Operation::Delete));
    }
}
