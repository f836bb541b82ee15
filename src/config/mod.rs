mod env;
pub use env::{MSG_KEY_VAR, REPORT_INTERVAL_VAR, RPS_VAR};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

pub use crate::throttler::ThrottlerConfig;

/// Complete flowlink configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FlowConfig {
    pub throttler: ThrottlerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Pipeline driver configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// How often to log a counter snapshot (seconds, 0 disables)
    #[serde(default = "default_report_interval")]
    pub report_interval_seconds: u64,
}

fn default_report_interval() -> u64 {
    5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            report_interval_seconds: default_report_interval(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &Path) -> Result<FlowConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config(&contents)
        .with_context(|| format!("Invalid config file '{}'", path.display()))
}

/// Parse configuration from TOML text
pub fn parse_config(contents: &str) -> Result<FlowConfig> {
    let config: FlowConfig = toml::from_str(contents).context("Failed to parse TOML")?;
    Ok(config)
}
