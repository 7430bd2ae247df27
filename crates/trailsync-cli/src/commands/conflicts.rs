use std::path::Path;

use serde::Serialize;
use trailsync_core::{ConflictId, ConflictRecord, EngineConfig, Resolution};

use crate::commands::common::{format_sync_timestamp, open_engine, open_store, parse_json_arg};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub detected_at: i64,
    pub local_data: serde_json::Value,
    pub remote_data: serde_json::Value,
}

pub fn conflict_to_item(conflict: &ConflictRecord) -> ConflictItem {
    ConflictItem {
        id: conflict.conflict_id.to_string(),
        entity_type: conflict.entity_type.to_string(),
        entity_id: conflict.entity_id.clone(),
        detected_at: conflict.detected_at,
        local_data: conflict.local_data.clone(),
        remote_data: conflict.remote_data.clone(),
    }
}

pub fn format_conflict_lines(conflicts: &[ConflictRecord]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {}  {}/{}",
                format_sync_timestamp(conflict.detected_at),
                conflict.conflict_id,
                conflict.entity_type,
                conflict.entity_id
            )
        })
        .collect()
}

pub async fn run_conflicts_list(
    limit: usize,
    as_json: bool,
    db_path: &Path,
    config: &EngineConfig,
) -> Result<(), CliError> {
    let engine = open_engine(open_store(db_path).await?, config).await?;
    let conflicts = engine.list_conflicts(limit).await?;
    engine.shutdown().await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(conflict_to_item)
            .collect::<Vec<ConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_conflicts_resolve(
    id: &str,
    resolution: Resolution,
    data: Option<&str>,
    db_path: &Path,
    config: &EngineConfig,
) -> Result<(), CliError> {
    let conflict_id = id
        .trim()
        .parse::<ConflictId>()
        .map_err(|error| CliError::InvalidArgument(format!("invalid conflict ID {id}: {error}")))?;
    let resolved_data = parse_json_arg("data", data)?;
    if resolution == Resolution::Merge && resolved_data.is_none() {
        return Err(CliError::InvalidArgument(
            "--data is required for merge".to_string(),
        ));
    }

    let engine = open_engine(open_store(db_path).await?, config).await?;
    let result = engine
        .try_resolve_conflict(&conflict_id, resolution, resolved_data)
        .await;
    engine.shutdown().await?;
    result?;

    if resolution == Resolution::Manual {
        println!("Conflict {conflict_id} left for manual review");
    } else {
        println!("Resolved conflict {conflict_id} with {resolution}");
    }
    Ok(())
}
