//! # Device Selection CLI
//!
//! ## Available Commands
//!
//! - `serve` - Start the HTTP server (default)
//! - `check` - Run criteria against a catalog fixtures file
//! - `group-criteria` - Shared criteria of devices in a fixtures file
//! - `config` - Print the effective configuration

mod commands;

use crate::config::{Config, ConfigError};
use clap::{Parser, Subcommand};
use device_selection_core::SelectionError;
use std::path::PathBuf;
use thiserror::Error;

pub use commands::*;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] crate::api::ServerError),

    #[error("cannot read {path}: {reason}")]
    Input { path: PathBuf, reason: String },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Selection(#[from] SelectionError),
}

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Device selection service
///
/// Resolves semantic criteria (function, aspect, device class, interaction)
/// to the device services, device groups and imports that satisfy them.
#[derive(Parser, Debug)]
#[command(name = "device-selection")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Serve {
        /// Port to bind to (overrides `api_port`)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Select against a catalog fixtures file
    Check {
        /// Catalog snapshot (JSON)
        #[arg(short, long)]
        fixtures: PathBuf,

        /// Criteria as a JSON array
        #[arg(long)]
        criteria: String,

        /// Token to evaluate permissions for
        #[arg(short, long, default_value = "local")]
        token: String,

        /// Also select device groups
        #[arg(long)]
        include_groups: bool,

        /// Also select imports
        #[arg(long)]
        include_imports: bool,

        /// Also select service-group variants of devices
        #[arg(long)]
        include_id_modified: bool,

        /// Return full services instead of skeletons
        #[arg(long)]
        complete_services: bool,
    },

    /// Criteria shared by devices of a fixtures file
    GroupCriteria {
        /// Catalog snapshot (JSON)
        #[arg(short, long)]
        fixtures: PathBuf,

        /// Device ids (comma-separated, id modifiers allowed)
        #[arg(short, long, value_delimiter = ',')]
        devices: Vec<String>,

        /// Token to evaluate permissions for
        #[arg(short, long, default_value = "local")]
        token: String,
    },

    /// Print the effective configuration
    Config,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments and loaded configuration.
pub async fn execute(cli: Cli, config: Config) -> Result<(), CliError> {
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Serve { port }) => cmd_serve(config, port).await,
        Some(Commands::Check {
            fixtures,
            criteria,
            token,
            include_groups,
            include_imports,
            include_id_modified,
            complete_services,
        }) => {
            let options = device_selection_core::SelectionOptions {
                include_groups,
                include_imports,
                include_id_modified,
                complete_services,
                ..Default::default()
            };
            cmd_check(&config, &fixtures, &criteria, &token, &options, json_mode).await
        }
        Some(Commands::GroupCriteria {
            fixtures,
            devices,
            token,
        }) => cmd_group_criteria(&config, &fixtures, &devices, &token, json_mode).await,
        Some(Commands::Config) => cmd_config(&config),
        None => cmd_serve(config, None).await,
    }
}
