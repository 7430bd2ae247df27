use std::path::Path;

use serde::Serialize;
use trailsync_core::util::unix_millis_now;
use trailsync_core::{EngineConfig, SyncItem, SyncState, SyncStatus};

use crate::commands::common::{
    format_relative_time, format_sync_timestamp, open_engine, open_store,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct StatusReport {
    state: SyncState,
    #[serde(flatten)]
    status: SyncStatus,
    items: Vec<SyncItem>,
}

pub async fn run_status(as_json: bool, db_path: &Path, config: &EngineConfig) -> Result<(), CliError> {
    let engine = open_engine(open_store(db_path).await?, config).await?;
    let status = engine.status().await;
    let items = engine.queued_items().await;
    engine.shutdown().await?;

    if as_json {
        let report = StatusReport {
            state: status.state(),
            status,
            items,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Queue: {} pending, {} failed",
        status.pending_items, status.failed_items
    );
    match status.last_sync_at {
        Some(at) => println!(
            "Last sync: {} ({})",
            format_sync_timestamp(at),
            format_relative_time(at, unix_millis_now())
        ),
        None => println!("Last sync: never"),
    }
    for line in format_queue_item_lines(&items, config.max_attempts) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_queue_item_lines(items: &[SyncItem], max_attempts: u32) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let marker = if item.is_exhausted(max_attempts) {
                "FAILED"
            } else {
                "queued"
            };
            let mut line = format!(
                "{}  {:<6}  {:<8}  {:<6}  {}/{}  attempts={}",
                format_sync_timestamp(item.timestamp),
                marker,
                item.priority.as_str(),
                item.operation.as_str(),
                item.entity_type,
                item.entity_id,
                item.attempts
            );
            if let Some(error) = &item.last_error {
                line.push_str("  error=");
                line.push_str(error);
            }
            line
        })
        .collect()
}
