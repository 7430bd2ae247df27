//! trailsync-core - Core library for Trailsync
//!
//! This crate contains the models, libSQL-backed local store, remote gateway
//! and the offline-first sync engine shared by every Trailsync client.

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use gateway::{GatewayError, HttpGateway, RemoteGateway};
pub use models::{
    ConflictId, ConflictRecord, EntityType, Operation, Priority, Resolution, SyncItem, SyncItemId,
};
pub use services::LocalStore;
pub use state::{SyncState, SyncStatus};
pub use sync::{DrainReport, DrainSkipped, SyncEngine, SyncEvent, SyncFailure};
