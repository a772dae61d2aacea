/// `load_config` module: Loads a static YAML config into the internal
/// [`RunConfig`], plus the YAML bill of materials.
///
/// This module is the only place where untrusted YAML is parsed and mapped
/// to rich, strongly-typed internal structs.
///
/// # Responsibilities
/// - Parse user-supplied YAML configuration files into type-safe Rust structs
/// - Validate values the core takes for granted (positive bed dimensions,
///   at least one upload attempt, positive BOM quantities)
/// - Ensure robust error messages for CLI and tests: any failure in loading
///   must result in clear diagnostics.
/// - Acts as the adapter layer decoupling input schemas from the domain core
///
/// # Errors
/// All errors in this module use `anyhow::Error` for context-rich
/// diagnostics, and are surfaced at the CLI boundary.
use anyhow::Result;
use autoslice_core::config::RunConfig;
use autoslice_core::inventory::Bom;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    #[serde(flatten)]
    pub run: RunConfig,
    /// Optional inline bill of materials; `--bom` takes precedence.
    #[serde(default)]
    pub bom: Option<BTreeMap<String, u32>>,
}

impl CliConfig {
    /// The inline BOM, validated; errors when the config has none.
    pub fn bom(&self) -> Result<Bom> {
        match &self.bom {
            Some(entries) => bom_from_entries(entries.clone()),
            None => Err(anyhow::anyhow!(
                "no BOM given: pass --bom or add a 'bom' section to the config"
            )),
        }
    }
}

/// Loads a static YAML run config file and validates it.
pub fn load_run_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    validate(&config.run)?;
    Ok(config)
}

/// Loads a YAML bill of materials: a mapping from part name to quantity.
pub fn load_bom<P: AsRef<Path>>(path: P) -> Result<Bom> {
    let path_ref = path.as_ref();
    info!(bom_path = ?path_ref, "Loading bill of materials");
    let content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, bom_path = ?path_ref, "Failed to read BOM file");
        anyhow::anyhow!("Failed to read BOM file {:?}: {}", path_ref, e)
    })?;
    let entries: BTreeMap<String, u32> = serde_yaml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse BOM YAML: {e}"))?;
    bom_from_entries(entries)
}

fn bom_from_entries(entries: BTreeMap<String, u32>) -> Result<Bom> {
    for (part, quantity) in &entries {
        if *quantity == 0 {
            return Err(anyhow::anyhow!(
                "BOM quantity for part '{part}' must be a positive integer"
            ));
        }
    }
    Ok(Bom::from_entries(entries))
}

fn validate(run: &RunConfig) -> Result<()> {
    if run.project_name.trim().is_empty() {
        return Err(anyhow::anyhow!("project_name must not be empty"));
    }
    if run.printer.bed_width_mm <= 0.0
        || run.printer.bed_depth_mm <= 0.0
        || run.printer.max_height_mm <= 0.0
    {
        return Err(anyhow::anyhow!("printer dimensions must be positive"));
    }
    if run.material.cost_per_mm3 < 0.0 {
        return Err(anyhow::anyhow!("material cost must not be negative"));
    }
    if run.retry.max_attempts == 0 {
        return Err(anyhow::anyhow!("retry.max_attempts must be at least 1"));
    }
    Ok(())
}
