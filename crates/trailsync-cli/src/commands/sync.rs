use std::path::Path;

use tokio::sync::broadcast::error::TryRecvError;
use trailsync_core::{EngineConfig, SyncEvent, SyncFailure};

use crate::commands::common::{open_engine, open_store};
use crate::error::CliError;

pub async fn run_sync(db_path: &Path, config: &EngineConfig) -> Result<(), CliError> {
    if config.api_base_url.is_none() {
        return Err(CliError::RemoteNotConfigured);
    }

    let engine = open_engine(open_store(db_path).await?, config).await?;
    let mut events = engine.subscribe();
    engine.prime(true, config.access_token.is_some()).await;

    let succeeded = engine.force_full_sync().await;
    let mut failures = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => {
                if let Some(line) = format_sync_event(&event) {
                    println!("{line}");
                }
                if let SyncEvent::Error(failure) = event {
                    failures.push(failure);
                }
            }
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::debug!("Skipped {} sync events", skipped);
            }
            Err(_) => break,
        }
    }
    engine.shutdown().await?;

    if succeeded {
        println!("Sync completed");
        return Ok(());
    }
    let message = failures
        .iter()
        .map(SyncFailure::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    Err(CliError::SyncFailed(if message.is_empty() {
        "see log output".to_string()
    } else {
        message
    }))
}

pub fn format_sync_event(event: &SyncEvent) -> Option<String> {
    match event {
        SyncEvent::Started { pending } => Some(format!("Syncing {pending} item(s)")),
        SyncEvent::Progress {
            current,
            total,
            item,
        } => Some(format!(
            "[{current}/{total}] {} {}/{}",
            item.operation, item.entity_type, item.entity_id
        )),
        SyncEvent::Completed(report) => Some(format!(
            "Delivered {} of {} attempted ({} failed, {} blocked)",
            report.delivered, report.attempted, report.failed, report.skipped_blocked
        )),
        SyncEvent::ConflictDetected(conflict) => Some(format!(
            "Conflict {} on {}/{}",
            conflict.conflict_id, conflict.entity_type, conflict.entity_id
        )),
        SyncEvent::Error(_) => None,
    }
}
