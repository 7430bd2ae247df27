use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use trailsync_core::{EntityType, Operation, Priority, Resolution};

#[derive(Parser)]
#[command(name = "trailsync")]
#[command(about = "Inspect and drive the Trailsync offline sync queue")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the engine config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a local change and queue it for delivery
    Enqueue {
        /// Entity type (trail, track-point, media-file, user-profile)
        #[arg(value_enum)]
        entity: EntityArg,
        /// Entity ID
        id: String,
        /// Mutation to deliver
        #[arg(value_enum)]
        operation: OperationArg,
        /// Entity body as JSON (ignored for delete)
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,
        /// Delivery priority
        #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,
    },
    /// Show queue status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push everything queued, then pull remote changes
    Sync,
    /// Inspect or settle sync conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Re-arm items that ran out of delivery attempts
    RetryFailed,
    /// Inspect CLI configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List open conflicts
    List {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Settle one conflict
    Resolve {
        /// Conflict ID
        id: String,
        /// Which side wins
        #[arg(value_enum)]
        resolution: ResolutionArg,
        /// Merged entity body as JSON (required for merge)
        #[arg(long, value_name = "JSON")]
        data: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum EntityArg {
    Trail,
    TrackPoint,
    MediaFile,
    UserProfile,
}

impl From<EntityArg> for EntityType {
    fn from(value: EntityArg) -> Self {
        match value {
            EntityArg::Trail => Self::Trail,
            EntityArg::TrackPoint => Self::TrackPoint,
            EntityArg::MediaFile => Self::MediaFile,
            EntityArg::UserProfile => Self::UserProfile,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OperationArg {
    Create,
    Update,
    Delete,
}

impl From<OperationArg> for Operation {
    fn from(value: OperationArg) -> Self {
        match value {
            OperationArg::Create => Self::Create,
            OperationArg::Update => Self::Update,
            OperationArg::Delete => Self::Delete,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PriorityArg {
    Critical,
    High,
    Normal,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Critical => Self::Critical,
            PriorityArg::High => Self::High,
            PriorityArg::Normal => Self::Normal,
            PriorityArg::Low => Self::Low,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ResolutionArg {
    UseLocal,
    UseRemote,
    Merge,
    Manual,
}

impl From<ResolutionArg> for Resolution {
    fn from(value: ResolutionArg) -> Self {
        match value {
            ResolutionArg::UseLocal => Self::UseLocal,
            ResolutionArg::UseRemote => Self::UseRemote,
            ResolutionArg::Merge => Self::Merge,
            ResolutionArg::Manual => Self::Manual,
        }
    }
}
