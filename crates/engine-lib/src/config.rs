//! Engine configuration
//!
//! Built from an optional TOML/JSON/YAML file layered with `EMISSIONS__*`
//! environment variables, e.g. `EMISSIONS__POLICY__MAINTENANCE_NOTICE_DAYS=10`.
//! Every field has a default, so an empty environment yields a working setup.

use crate::error::{EngineError, Result};
use crate::learners::{BoosterParams, CvConfig, IsolationForestParams, ParamGrid};
use crate::maintenance::MaintenanceParams;
use crate::policy::Thresholds;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "emissions.toml";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "EMISSIONS_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub update: UpdateConfig,
    #[serde(default)]
    pub policy: Thresholds,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Artifact store location and retention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
    #[serde(default = "default_generations_to_keep")]
    pub generations_to_keep: usize,
}

fn default_store_root() -> PathBuf {
    PathBuf::from("models")
}

fn default_generations_to_keep() -> usize {
    crate::store::DEFAULT_GENERATIONS_TO_KEEP
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
            generations_to_keep: default_generations_to_keep(),
        }
    }
}

/// Regressor search and training split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default)]
    pub grid: ParamGrid,
    #[serde(default = "default_nfold")]
    pub nfold: usize,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_early_stopping_rounds")]
    pub early_stopping_rounds: usize,
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    #[serde(default = "default_min_child_weight")]
    pub min_child_weight: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Share of rows held out for evaluation in a full training run
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
}

fn default_nfold() -> usize {
    5
}

fn default_max_rounds() -> usize {
    200
}

fn default_early_stopping_rounds() -> usize {
    10
}

fn default_lambda() -> f64 {
    1.0
}

fn default_min_child_weight() -> f64 {
    1.0
}

fn default_seed() -> u64 {
    42
}

fn default_test_fraction() -> f64 {
    0.2
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            grid: ParamGrid::default(),
            nfold: default_nfold(),
            max_rounds: default_max_rounds(),
            early_stopping_rounds: default_early_stopping_rounds(),
            lambda: default_lambda(),
            min_child_weight: default_min_child_weight(),
            seed: default_seed(),
            test_fraction: default_test_fraction(),
        }
    }
}

impl TrainingConfig {
    pub fn cv(&self) -> CvConfig {
        CvConfig {
            nfold: self.nfold,
            max_rounds: self.max_rounds,
            early_stopping_rounds: self.early_stopping_rounds,
            seed: self.seed,
        }
    }

    /// Fixed booster settings shared by every grid point
    pub fn base_params(&self) -> BoosterParams {
        BoosterParams {
            lambda: self.lambda,
            min_child_weight: self.min_child_weight,
            seed: self.seed,
            ..BoosterParams::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyConfig {
    #[serde(default = "default_contamination")]
    pub contamination: f64,
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_contamination() -> f64 {
    0.01
}

fn default_n_estimators() -> usize {
    100
}

fn default_max_samples() -> usize {
    256
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            contamination: default_contamination(),
            n_estimators: default_n_estimators(),
            max_samples: default_max_samples(),
            seed: default_seed(),
        }
    }
}

impl AnomalyConfig {
    pub fn forest_params(&self) -> IsolationForestParams {
        IsolationForestParams {
            n_trees: self.n_estimators,
            max_samples: self.max_samples,
            contamination: self.contamination,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_maintenance_depth")]
    pub max_depth: usize,
    #[serde(default = "default_min_days")]
    pub min_days: f64,
    #[serde(default = "default_max_days")]
    pub max_days: f64,
}

fn default_maintenance_depth() -> usize {
    crate::maintenance::DEFAULT_MAX_DEPTH
}

fn default_min_days() -> f64 {
    crate::maintenance::DEFAULT_MIN_DAYS
}

fn default_max_days() -> f64 {
    crate::maintenance::DEFAULT_MAX_DAYS
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            max_depth: default_maintenance_depth(),
            min_days: default_min_days(),
            max_days: default_max_days(),
        }
    }
}

impl MaintenanceConfig {
    pub fn params(&self) -> MaintenanceParams {
        MaintenanceParams {
            max_depth: self.max_depth,
            min_days: self.min_days,
            max_days: self.max_days,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Boosting rounds appended per incremental update
    #[serde(default = "default_update_rounds")]
    pub rounds: usize,
}

fn default_update_rounds() -> usize {
    50
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            rounds: default_update_rounds(),
        }
    }
}

/// Per-vehicle inference cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Minimum seconds between inferences for one vehicle stream
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// How often due streams are checked
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_inference_timeout_ms")]
    pub inference_timeout_ms: u64,
}

fn default_interval_secs() -> u64 {
    15 * 60
}

fn default_tick_secs() -> u64 {
    30
}

fn default_inference_timeout_ms() -> u64 {
    2000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            tick_secs: default_tick_secs(),
            inference_timeout_ms: default_inference_timeout_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

impl EngineConfig {
    /// Load from `path` (or `EMISSIONS_CONFIG`, or `emissions.toml` if present)
    /// plus `EMISSIONS__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut builder = config::Config::builder();
        builder = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(EngineError::Configuration(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
                builder.add_source(config::File::from(path))
            }
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let config = builder
            .add_source(
                config::Environment::with_prefix("EMISSIONS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;

        let engine: EngineConfig = config
            .try_deserialize()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;
        engine.validate()?;
        Ok(engine)
    }

    /// Reject settings that would fail later in a less obvious place
    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;
        self.maintenance.params().validate()?;
        self.anomaly.forest_params().validate()?;
        self.training.base_params().validate()?;
        if !(self.training.test_fraction >= 0.0 && self.training.test_fraction < 1.0) {
            return Err(EngineError::Configuration(format!(
                "test_fraction must be in [0, 1), got {}",
                self.training.test_fraction
            )));
        }
        if self.training.grid.is_empty() {
            return Err(EngineError::Configuration(
                "hyperparameter grid has no points".to_string(),
            ));
        }
        if self.update.rounds == 0 {
            return Err(EngineError::Configuration(
                "update rounds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.store.generations_to_keep, 5);
        assert_eq!(config.training.nfold, 5);
        assert_eq!(config.training.max_rounds, 200);
        assert_eq!(config.training.early_stopping_rounds, 10);
        assert_eq!(config.anomaly.contamination, 0.01);
        assert_eq!(config.maintenance.max_depth, 6);
        assert_eq!(config.update.rounds, 50);
        assert_eq!(config.policy.limits["Diesel"], 1500.0);
        assert_eq!(config.policy.maintenance_notice_days, 14);
        assert_eq!(config.scheduler.interval(), Duration::from_secs(900));
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("emissions.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[store]
root = "/var/lib/emissions"

[policy]
maintenance_notice_days = 10

[policy.limits]
Petrol = 1100.0
Diesel = 1400.0

[update]
rounds = 25
"#
        )
        .unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.store.root, PathBuf::from("/var/lib/emissions"));
        assert_eq!(config.policy.maintenance_notice_days, 10);
        assert_eq!(config.policy.limit_for("Petrol"), 1100.0);
        assert_eq!(config.policy.limit_for("CNG"), 1100.0);
        assert_eq!(config.update.rounds, 25);
        assert_eq!(config.training.seed, 42);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = EngineConfig::load(Some(Path::new("/nonexistent/emissions.toml"))).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn test_validate_rejects_bad_fraction() {
        let mut config = EngineConfig::default();
        config.training.test_fraction = 1.0;
        assert!(config.validate().is_err());
    }
}
