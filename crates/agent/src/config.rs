//! Agent configuration

use anyhow::{Context, Result};
use engine_lib::EngineConfig;

/// Engine configuration plus the identity this agent logs under
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub engine: EngineConfig,
    /// Host name from the environment, used as the `source` of structured events
    pub source: String,
}

fn default_source() -> String {
    std::env::var("NODE_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "emissions-agent".to_string())
}

impl AgentConfig {
    /// Load from `EMISSIONS_CONFIG` / `emissions.toml` and `EMISSIONS__*` variables
    pub fn load() -> Result<Self> {
        let engine = EngineConfig::load(None).context("Failed to load engine configuration")?;
        Ok(Self {
            engine,
            source: default_source(),
        })
    }
}
