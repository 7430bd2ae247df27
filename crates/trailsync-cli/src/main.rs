//! Trailsync CLI - operator tool for the offline sync queue
//!
//! Queue local changes, inspect queue status, push and pull against the
//! configured API and settle conflicts from the terminal.

mod cli;
mod commands;
mod error;


use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, ConflictCommands};
use crate::commands::common::{load_config, resolve_config_path, resolve_db_path};
use crate::commands::config::run_config;
use crate::commands::conflicts::{run_conflicts_list, run_conflicts_resolve};
use crate::commands::enqueue::run_enqueue;
use crate::commands::retry::run_retry_failed;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trailsync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config);
    let config = load_config(&config_path)?;
    let db_path = resolve_db_path(cli.db_path, &config);

    match cli.command {
        Some(Commands::Enqueue {
            entity,
            id,
            operation,
            payload,
            priority,
        }) => {
            run_enqueue(
                entity.into(),
                &id,
                operation.into(),
                payload.as_deref(),
                priority.into(),
                &db_path,
                &config,
            )
            .await?;
        }
        Some(Commands::Status { json }) => run_status(json, &db_path, &config).await?,
        Some(Commands::Sync) => run_sync(&db_path, &config).await?,
        Some(Commands::Conflicts { command }) => match command {
            ConflictCommands::List { limit, json } => {
                run_conflicts_list(limit, json, &db_path, &config).await?;
            }
            ConflictCommands::Resolve {
                id,
                resolution,
                data,
            } => {
                run_conflicts_resolve(&id, resolution.into(), data.as_deref(), &db_path, &config)
                    .await?;
            }
        },
        Some(Commands::RetryFailed) => run_retry_failed(&db_path, &config).await?,
        Some(Commands::Config { command }) => run_config(&command, &config_path, &db_path, &config)?,
        None => {
            Cli::command().print_help().map_err(CliError::Io)?;
            println!();
        }
    }

    Ok(())
}
