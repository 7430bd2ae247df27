//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity::EntityType;
use crate::error::Error;

/// Identifier of a stored conflict record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// How a conflict is (or should be) settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    /// Re-assert the local copy against the remote
    UseLocal,
    /// Accept the remote copy locally
    UseRemote,
    /// Write caller-supplied data to both sides
    Merge,
    /// Awaiting a human decision
    Manual,
}

impl Resolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UseLocal => "USE_LOCAL",
            Self::UseRemote => "USE_REMOTE",
            Self::Merge => "MERGE",
            Self::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "USE_LOCAL" | "LOCAL" => Ok(Self::UseLocal),
            "USE_REMOTE" | "REMOTE" => Ok(Self::UseRemote),
            "MERGE" => Ok(Self::Merge),
            "MANUAL" => Ok(Self::Manual),
            other => Err(Error::InvalidInput(format!("unknown resolution: {other}"))),
        }
    }
}

/// Divergence between a locally pending entity and a newer remote version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub conflict_id: ConflictId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub local_data: serde_json::Value,
    pub remote_data: serde_json::Value,
    pub resolution: Resolution,
    /// Caller-supplied body for `Merge`
    pub resolved_data: Option<serde_json::Value>,
    /// Detection time (Unix ms)
    pub detected_at: i64,
}

impl ConflictRecord {
    /// New unresolved record awaiting a manual decision
    pub fn manual(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        local_data: serde_json::Value,
        remote_data: serde_json::Value,
    ) -> Self {
        Self {
            conflict_id: ConflictId::new(),
            entity_type,
            entity_id: entity_id.into(),
            local_data,
            remote_data,
            resolution: Resolution::Manual,
            resolved_data: None,
            detected_at: crate::util::unix_millis_now(),
        }
    }
}
