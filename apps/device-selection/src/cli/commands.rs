//! # CLI Command Implementations

use super::CliError;
use crate::api;
use crate::cache::Cache;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::engine::Engine;
use crate::upstream::Upstream;
use crate::upstream::memory::{Fixtures, MemoryUpstream};
use device_selection_core::{FilterCriterion, Selectable, SelectionOptions};
use std::path::Path;
use std::sync::Arc;

/// Maximum fixtures file size (100 MB).
const MAX_FIXTURES_FILE_SIZE: u64 = 100 * 1024 * 1024;

// =============================================================================
// SERVE
// =============================================================================

pub async fn cmd_serve(mut config: Config, port: Option<u16>) -> Result<(), CliError> {
    if let Some(port) = port {
        config.api_port = port;
    }
    api::run_server(&config).await?;
    Ok(())
}

// =============================================================================
// OFFLINE CHECKS
// =============================================================================

/// Read and decode a fixtures file.
pub fn load_fixtures(path: &Path) -> Result<Fixtures, CliError> {
    let input_err = |reason: String| CliError::Input {
        path: path.to_path_buf(),
        reason,
    };
    let metadata = std::fs::metadata(path).map_err(|e| input_err(e.to_string()))?;
    if metadata.len() > MAX_FIXTURES_FILE_SIZE {
        return Err(input_err(format!(
            "file size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_FIXTURES_FILE_SIZE
        )));
    }
    let text = std::fs::read_to_string(path).map_err(|e| input_err(e.to_string()))?;
    Ok(serde_json::from_str(&text)?)
}

/// An engine over an in-memory catalog; no invalidation listener.
fn offline_engine(config: &Config, fixtures: Fixtures) -> Result<Engine, CliError> {
    let upstream = Upstream::from_single(Arc::new(MemoryUpstream::new(fixtures)));
    let catalog = Catalog::new(
        upstream,
        Cache::new(config.cache_config()?),
        config.max_parallel_upstream,
    );
    Ok(Engine::new(
        Arc::new(catalog),
        config.request_timeout(),
        config.max_parallel_upstream,
    ))
}

pub async fn cmd_check(
    config: &Config,
    fixtures: &Path,
    criteria: &str,
    token: &str,
    options: &SelectionOptions,
    json_mode: bool,
) -> Result<(), CliError> {
    let criteria: Vec<FilterCriterion> = serde_json::from_str(criteria)?;
    let engine = offline_engine(config, load_fixtures(fixtures)?)?;
    let selectables = engine.selectables(token, &criteria, options).await?;

    if json_mode {
        println!("{}", serde_json::to_string_pretty(&selectables)?);
    } else {
        print!("{}", render_selectables(&selectables));
    }
    Ok(())
}

pub async fn cmd_group_criteria(
    config: &Config,
    fixtures: &Path,
    device_ids: &[String],
    token: &str,
    json_mode: bool,
) -> Result<(), CliError> {
    let engine = offline_engine(config, load_fixtures(fixtures)?)?;
    let criteria = engine.device_group_criteria(token, device_ids).await?;

    if json_mode {
        println!("{}", serde_json::to_string_pretty(&criteria)?);
    } else if criteria.is_empty() {
        println!("No shared criteria");
    } else {
        for c in &criteria {
            let interaction = c.interaction.map(|i| i.to_string()).unwrap_or_default();
            println!(
                "{:<14} {} aspect={} class={}",
                interaction, c.function_id, c.aspect_id, c.device_class_id
            );
        }
    }
    Ok(())
}

pub fn cmd_config(config: &Config) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

// =============================================================================
// TEXT OUTPUT
// =============================================================================

/// One block per selectable: kind, name and id, then one line per path.
#[must_use]
pub fn render_selectables(selectables: &[Selectable]) -> String {
    if selectables.is_empty() {
        return "No matches\n".to_string();
    }
    let mut out = String::new();
    for s in selectables {
        let kind = match s {
            Selectable::Device { .. } => "device",
            Selectable::DeviceGroup { .. } => "group",
            Selectable::Import { .. } => "import",
        };
        out.push_str(&format!("{:<7} {} ({})\n", kind, s.display_name(), s.id()));
        for (service_id, options) in s.service_path_options().into_iter().flatten() {
            for option in options {
                out.push_str(&format!("        {} {}", service_id, option.path));
                if !option.aspect_node.id.is_empty() {
                    out.push_str(&format!(" [{}]", option.aspect_node.id));
                }
                out.push('\n');
                for configurable in &option.configurables {
                    out.push_str(&format!(
                        "          set {} = {}\n",
                        configurable.path, configurable.value
                    ));
                }
            }
        }
    }
    out
}

// =============================================================================
// TESTS
// =============================================================================
