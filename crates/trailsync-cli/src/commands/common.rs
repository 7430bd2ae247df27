use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use trailsync_core::gateway::GatewayRequest;
use trailsync_core::{
    EngineConfig, GatewayError, HttpGateway, LocalStore, RemoteGateway, SyncEngine,
};

use crate::error::CliError;

const APP_DIR: &str = "trailsync";

/// Stand-in used when no API base URL is configured. Every request fails as
/// transient, so queued items stay put.
struct UnconfiguredGateway;

#[async_trait]
impl RemoteGateway for UnconfiguredGateway {
    async fn send(&self, request: GatewayRequest) -> Result<Value, GatewayError> {
        Err(GatewayError::NotConfigured(format!(
            "no API base URL for {} {}",
            request.method, request.path
        )))
    }
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> PathBuf {
    cli_config_path.unwrap_or_else(default_config_path)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.json")
}

pub fn load_config(config_path: &Path) -> Result<EngineConfig, CliError> {
    EngineConfig::load_from_path(config_path)
        .map_err(CliError::Config)?
        .with_env_overrides()
        .normalized()
        .map_err(CliError::Config)
}

/// `--db-path` wins over the configured path, which wins over the default.
pub fn resolve_db_path(cli_db_path: Option<PathBuf>, config: &EngineConfig) -> PathBuf {
    cli_db_path
        .or_else(|| config.database_path.clone())
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("trailsync.db")
}

pub async fn open_store(db_path: &Path) -> Result<LocalStore, CliError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(LocalStore::open_path(db_path).await?)
}

pub async fn build_gateway(config: &EngineConfig) -> Result<Arc<dyn RemoteGateway>, CliError> {
    let Some(base_url) = config.api_base_url.as_deref() else {
        tracing::debug!("No API base URL configured, remote calls are disabled");
        return Ok(Arc::new(UnconfiguredGateway));
    };

    let gateway = HttpGateway::new(base_url, config.request_timeout())?;
    gateway.set_access_token(config.access_token.clone()).await;
    Ok(Arc::new(gateway))
}

/// Build the engine over `store` and load its queue.
pub async fn open_engine(store: LocalStore, config: &EngineConfig) -> Result<SyncEngine, CliError> {
    let gateway = build_gateway(config).await?;
    let engine = SyncEngine::new(store, gateway, config.clone());
    engine.init().await?;
    Ok(engine)
}

pub fn parse_json_arg(name: &str, raw: Option<&str>) -> Result<Option<Value>, CliError> {
    raw.map(|raw| {
        serde_json::from_str(raw)
            .map_err(|error| CliError::InvalidArgument(format!("--{name} is not valid JSON: {error}")))
    })
    .transpose()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}
