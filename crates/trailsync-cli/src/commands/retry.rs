use std::path::Path;

use trailsync_core::EngineConfig;

use crate::commands::common::{open_engine, open_store};
use crate::error::CliError;

pub async fn run_retry_failed(db_path: &Path, config: &EngineConfig) -> Result<(), CliError> {
    let engine = open_engine(open_store(db_path).await?, config).await?;
    let reset = engine.retry_failed().await?;
    engine.shutdown().await?;

    if reset == 0 {
        println!("No failed items to retry.");
    } else {
        println!("Re-queued {reset} failed item(s)");
    }
    Ok(())
}
