use std::path::Path;

use trailsync_core::{EngineConfig, EntityType, Operation, Priority};

use crate::commands::common::{open_engine, open_store, parse_json_arg};
use crate::error::CliError;

pub async fn run_enqueue(
    entity_type: EntityType,
    entity_id: &str,
    operation: Operation,
    payload: Option<&str>,
    priority: Priority,
    db_path: &Path,
    config: &EngineConfig,
) -> Result<(), CliError> {
    let entity_id = entity_id.trim();
    if entity_id.is_empty() {
        return Err(CliError::InvalidArgument("entity ID cannot be empty".to_string()));
    }
    if !entity_type.supports(operation) {
        return Err(CliError::InvalidArgument(format!(
            "{operation} is not supported for {entity_type}"
        )));
    }

    let store = open_store(db_path).await?;
    let payload = match (operation, parse_json_arg("payload", payload)?) {
        (Operation::Delete, _) => serde_json::Value::Null,
        (_, Some(data)) => store.save_local_entity(entity_type, entity_id, data).await?.data,
        (_, None) => store
            .get_entity(entity_type, entity_id)
            .await?
            .map(|record| record.data)
            .ok_or_else(|| {
                CliError::InvalidArgument(format!(
                    "--payload is required: no local {entity_type} with id {entity_id}"
                ))
            })?,
    };

    let engine = open_engine(store, config).await?;
    let item = engine
        .add_to_sync_queue(entity_type, entity_id, operation, payload, priority)
        .await?;
    engine.shutdown().await?;

    println!("{}", item.id);
    Ok(())
}
