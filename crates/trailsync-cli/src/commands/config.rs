use std::path::Path;

use trailsync_core::EngineConfig;

use crate::cli::ConfigCommands;
use crate::error::CliError;

pub fn run_config(
    command: &ConfigCommands,
    config_path: &Path,
    db_path: &Path,
    config: &EngineConfig,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => run_config_show(config_path, db_path, config),
    }
}

fn run_config_show(
    config_path: &Path,
    db_path: &Path,
    config: &EngineConfig,
) -> Result<(), CliError> {
    let exists = if config_path.exists() {
        ""
    } else {
        " (not found, using defaults)"
    };
    println!("Config file: {}{exists}", config_path.display());
    println!("Database: {}", db_path.display());
    println!(
        "Access token: {}",
        if config.access_token.is_some() {
            "set"
        } else {
            "not set"
        }
    );
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
