//! Subcommand implementations

pub mod generations;
pub mod inference;
pub mod training;

use crate::output::OutputFormat;
use anyhow::{Context, Result};
use engine_lib::{ArtifactStore, EngineConfig};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolved configuration and the artifact store every command works against
pub struct Workspace {
    pub config: EngineConfig,
    pub store: ArtifactStore,
    pub format: OutputFormat,
}

impl Workspace {
    pub fn open(config_path: Option<&Path>, store_root: Option<PathBuf>, format: OutputFormat) -> Result<Self> {
        let mut config = EngineConfig::load(config_path).context("Failed to load configuration")?;
        if let Some(root) = store_root {
            config.store.root = root;
        }
        let store = ArtifactStore::open(&config.store.root, config.store.generations_to_keep)
            .with_context(|| format!("Failed to open artifact store at {}", config.store.root.display()))?;
        debug!(store = %config.store.root.display(), "Artifact store opened");
        Ok(Self { config, store, format })
    }
}

/// Two-column row for key/value summaries
#[derive(tabled::Tabled)]
pub struct FieldRow {
    #[tabled(rename = "Field")]
    pub field: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

impl FieldRow {
    pub fn new(field: &str, value: impl ToString) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}
