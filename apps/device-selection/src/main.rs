//! # Device Selection Service
//!
//! Answers "which devices, groups and imports can do X?" for semantic
//! criteria (function, aspect, device class, interaction).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                apps/device-selection (THE BINARY)            │
//! │                                                              │
//! │  ┌───────────┐   ┌───────────┐   ┌────────────────────────┐  │
//! │  │   CLI     │   │ HTTP API  │   │ Invalidation listener  │  │
//! │  │  (clap)   │   │  (axum)   │   │  (broadcast bus)       │  │
//! │  └─────┬─────┘   └─────┬─────┘   └───────────┬────────────┘  │
//! │        └───────────────┼─────────────────────┘               │
//! │                        ▼                                     │
//! │          engine ─► catalog ─► cache ─► upstream (reqwest)    │
//! │                        │                                     │
//! │                        ▼                                     │
//! │              ┌─────────────────────────┐                     │
//! │              │  device-selection-core  │                     │
//! │              └─────────────────────────┘                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! device-selection serve --port 8080
//! device-selection --config service.toml check -f catalog.json \
//!     --criteria '[{"function_id":"getTemperature","aspect_id":"air"}]'
//! ```

use clap::Parser;
use device_selection::cli;
use device_selection::config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // DEVICE_SELECTION_LOG_FORMAT=json enables machine-parseable output.
    let log_format =
        std::env::var("DEVICE_SELECTION_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.quiet {
        "device_selection=warn,tower_http=warn"
    } else if config.debug {
        "device_selection=debug,device_selection_core=debug,tower_http=debug"
    } else {
        "device_selection=info,tower_http=debug"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    if let Err(e) = cli::execute(cli, config).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
