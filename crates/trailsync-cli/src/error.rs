use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] trailsync_core::Error),
    #[error(transparent)]
    Gateway(#[from] trailsync_core::GatewayError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Sync failed: {0}")]
    SyncFailed(String),
    #[error(
        "Remote API is not configured. Set api_base_url in the config file or TRAILSYNC_API_BASE_URL."
    )]
    RemoteNotConfigured,
}
