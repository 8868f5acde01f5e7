//! Training, incremental update and evaluation
//!
//! Every entry point writes into a [`StagedGeneration`]; nothing becomes
//! visible to readers until the generation is committed. The transform is
//! always staged first and every other model is fitted through that same
//! staged transform.

use crate::anomaly::AnomalyGate;
use crate::config::{AnomalyConfig, EngineConfig, MaintenanceConfig, TrainingConfig};
use crate::error::{ArtifactKind, EngineError, Result};
use crate::learners::{grid_search, r2_score, rmse, GradientBoostedRegressor, GridSearchOutcome};
use crate::maintenance::MaintenanceEstimator;
use crate::models::{RawRecord, VehicleReading};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::preprocess::{clean_batch, retain_labelled, train_test_split};
use crate::store::{ArtifactStore, GenerationManifest, HyperparameterRecord, StagedGeneration};
use crate::transform::FeatureTransform;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// RMSE and R² of a regressor on a held-out batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub rmse: f64,
    pub r2: f64,
    pub rows: usize,
}

/// Cleaned, labelled rows plus the count of rows dropped for a missing target
#[derive(Debug, Clone)]
pub struct TrainingBatch {
    pub readings: Vec<VehicleReading>,
    pub dropped: usize,
}

/// Clean a raw batch and drop rows whose target cannot be recovered
pub fn prepare_batch(records: &[RawRecord]) -> Result<TrainingBatch> {
    if records.is_empty() {
        return Err(EngineError::Configuration("training batch is empty".to_string()));
    }
    let (readings, dropped) = retain_labelled(clean_batch(records));
    if dropped > 0 {
        StructuredLogger::new("training").log_rows_dropped(dropped, readings.len());
        EngineMetrics::new().add_rows_dropped(dropped);
    }
    if readings.is_empty() {
        return Err(EngineError::Configuration(format!(
            "all {dropped} training rows lack a CO2 target"
        )));
    }
    Ok(TrainingBatch { readings, dropped })
}

/// Output of regressor training
#[derive(Debug, Clone)]
pub struct RegressorTraining {
    pub transform: FeatureTransform,
    pub regressor: GradientBoostedRegressor,
    pub hyperparameters: HyperparameterRecord,
    pub search: GridSearchOutcome,
}

fn targets(readings: &[VehicleReading]) -> Vec<f64> {
    readings.iter().map(|r| r.co2.unwrap_or(0.0)).collect()
}

/// Fit the transform, search hyperparameters, refit on the whole batch and
/// stage transform, regressor and hyperparameter record
pub fn train_regressor(
    staged: &StagedGeneration,
    readings: &[VehicleReading],
    config: &TrainingConfig,
) -> Result<RegressorTraining> {
    if readings.is_empty() {
        return Err(EngineError::Configuration("training batch is empty".to_string()));
    }
    let started = Instant::now();

    let transform = FeatureTransform::fit(readings)?;
    staged.write(ArtifactKind::Transform, &transform)?;
    let transform_checksum = staged.checksum_of(ArtifactKind::Transform)?;

    let x = transform.apply_batch(readings);
    let y = targets(readings);
    info!(
        rows = x.n_rows(),
        features = x.n_cols(),
        grid_points = config.grid.len(),
        "Starting hyperparameter search"
    );

    let search = grid_search(&config.grid, &config.base_params(), &x, &y, &config.cv())?;
    let best = &search.best;
    info!(
        grid_index = best.index,
        eta = best.params.eta,
        max_depth = best.params.max_depth,
        subsample = best.params.subsample,
        colsample_bytree = best.params.colsample_bytree,
        rounds = best.rounds,
        cv_rmse = best.score,
        "Hyperparameter search finished"
    );

    let regressor = GradientBoostedRegressor::fit(best.params.clone(), &x, &y, best.rounds)?;
    staged.write(ArtifactKind::Regressor, &regressor)?;

    let hyperparameters = HyperparameterRecord {
        params: best.params.clone(),
        num_boost_round: best.rounds,
        cv_rmse: Some(best.score),
        grid_index: Some(best.index),
        transform_checksum,
        trained_at: Utc::now(),
        incremental_rounds: 0,
    };
    staged.write(ArtifactKind::Hyperparameters, &hyperparameters)?;

    info!(
        trees = regressor.n_trees(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Regressor trained"
    );

    Ok(RegressorTraining {
        transform,
        regressor,
        hyperparameters,
        search,
    })
}

/// Transform already staged in this generation
fn staged_transform(staged: &StagedGeneration) -> Result<FeatureTransform> {
    let transform: FeatureTransform = staged.read(ArtifactKind::Transform)?;
    transform.validate()?;
    Ok(transform)
}

/// Fit and stage the anomaly gate through the staged transform
pub fn fit_anomaly_gate(
    staged: &StagedGeneration,
    readings: &[VehicleReading],
    config: &AnomalyConfig,
) -> Result<AnomalyGate> {
    let transform = staged_transform(staged)?;
    let gate = AnomalyGate::fit(&transform, readings, config.forest_params())?;
    staged.write(ArtifactKind::AnomalyGate, &gate)?;
    Ok(gate)
}

/// Fit and stage the maintenance estimator; requires the staged transform
pub fn fit_maintenance_estimator(
    staged: &StagedGeneration,
    readings: &[VehicleReading],
    config: &MaintenanceConfig,
) -> Result<MaintenanceEstimator> {
    let transform = staged_transform(staged)?;
    let estimator = MaintenanceEstimator::fit(&transform, readings, config.params())?;
    staged.write(ArtifactKind::MaintenanceEstimator, &estimator)?;
    Ok(estimator)
}

/// RMSE and R² of `regressor` over the labelled rows of `readings`
pub fn evaluate(
    regressor: &GradientBoostedRegressor,
    transform: &FeatureTransform,
    readings: &[VehicleReading],
) -> Result<EvaluationReport> {
    let labelled: Vec<VehicleReading> = readings.iter().filter(|r| r.co2.is_some()).cloned().collect();
    if labelled.is_empty() {
        return Err(EngineError::Configuration(
            "evaluation batch has no labelled rows".to_string(),
        ));
    }
    let x = transform.apply_batch(&labelled);
    if x.n_cols() != regressor.n_features() {
        return Err(EngineError::StaleTransform(format!(
            "transform produces {} features, regressor expects {}",
            x.n_cols(),
            regressor.n_features()
        )));
    }
    let y = targets(&labelled);
    let predicted = regressor.predict_batch(&x);
    Ok(EvaluationReport {
        rmse: rmse(&y, &predicted),
        r2: r2_score(&y, &predicted),
        rows: y.len(),
    })
}

/// Summary of a full training run
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub generation: String,
    pub train_rows: usize,
    pub test_rows: usize,
    pub dropped_rows: usize,
    pub hyperparameters: HyperparameterRecord,
    pub evaluation: Option<EvaluationReport>,
}

/// End-to-end training into one new generation
pub struct TrainingPipeline<'a> {
    store: &'a ArtifactStore,
    config: &'a EngineConfig,
}

impl<'a> TrainingPipeline<'a> {
    pub fn new(store: &'a ArtifactStore, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    /// Clean, split, train every model, evaluate and commit
    pub fn run(&self, records: &[RawRecord]) -> Result<TrainingReport> {
        let batch = prepare_batch(records)?;
        let (train, test) = train_test_split(
            &batch.readings,
            self.config.training.test_fraction,
            self.config.training.seed,
        );
        info!(
            train_rows = train.len(),
            test_rows = test.len(),
            dropped_rows = batch.dropped,
            "Training batch prepared"
        );

        let mut staged = self.store.stage()?;
        let trained = train_regressor(&staged, &train, &self.config.training)?;

        let evaluation = if test.is_empty() {
            warn!("No held-out rows, skipping evaluation");
            None
        } else {
            let report = evaluate(&trained.regressor, &trained.transform, &test)?;
            info!(rmse = report.rmse, r2 = report.r2, rows = report.rows, "Held-out evaluation");
            Some(report)
        };

        fit_anomaly_gate(&staged, &train, &self.config.anomaly)?;
        fit_maintenance_estimator(&staged, &train, &self.config.maintenance)?;

        if let Some(report) = &evaluation {
            staged.set_evaluation(report.clone());
        }
        let manifest = staged.commit()?;
        let logger = StructuredLogger::new("training");
        logger.log_training_completed(
            &manifest.id,
            train.len(),
            trained.hyperparameters.num_boost_round,
            trained.hyperparameters.cv_rmse,
        );
        logger.log_generation_committed(&manifest.id, manifest.parent.as_deref(), &manifest.origin.to_string());

        Ok(TrainingReport {
            generation: manifest.id,
            train_rows: train.len(),
            test_rows: test.len(),
            dropped_rows: batch.dropped,
            hyperparameters: trained.hyperparameters,
            evaluation,
        })
    }
}

/// Summary of an incremental update
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub generation: String,
    pub parent: Option<String>,
    pub rows: usize,
    pub dropped_rows: usize,
    pub rounds_added: usize,
    pub total_trees: usize,
}

/// Continue boosting the committed regressor on a new batch.
///
/// Uses the recorded hyperparameters, never re-searches. The result is a new
/// generation whose other artifacts are byte copies of the parent's. On any
/// failure the committed generation, including its regressor file, is
/// untouched.
pub fn incremental_update(store: &ArtifactStore, records: &[RawRecord], rounds: usize) -> Result<UpdateReport> {
    if rounds == 0 {
        return Err(EngineError::Configuration("update rounds must be positive".to_string()));
    }
    let batch = prepare_batch(records)?;

    let staged = store.stage_from_current().map_err(|e| match e {
        EngineError::ArtifactMissing {
            artifact: ArtifactKind::Transform,
            path,
        } => EngineError::StaleTransform(format!("feature transform not found at {}", path.display())),
        other => other,
    })?;
    let hyperparameters: HyperparameterRecord = staged.read(ArtifactKind::Hyperparameters)?;
    let mut regressor: GradientBoostedRegressor = staged.read(ArtifactKind::Regressor)?;

    let transform = load_transform_for_update(&staged, &hyperparameters)?;
    if transform.width() != regressor.n_features() {
        return Err(EngineError::StaleTransform(format!(
            "transform produces {} features but the regressor was trained on {}",
            transform.width(),
            regressor.n_features()
        )));
    }

    let x = transform.apply_batch(&batch.readings);
    let y = targets(&batch.readings);
    if regressor.params() != &hyperparameters.params {
        warn!("Regressor parameters differ from the hyperparameter record, continuing with the regressor's own");
    }
    regressor.continue_training(&x, &y, rounds)?;

    let hyperparameters = HyperparameterRecord {
        incremental_rounds: hyperparameters.incremental_rounds + rounds,
        ..hyperparameters
    };
    staged.write(ArtifactKind::Regressor, &regressor)?;
    staged.write(ArtifactKind::Hyperparameters, &hyperparameters)?;

    let manifest: GenerationManifest = staged.commit()?;
    StructuredLogger::new("update").log_generation_committed(
        &manifest.id,
        manifest.parent.as_deref(),
        &manifest.origin.to_string(),
    );
    info!(
        generation = %manifest.id,
        rows = batch.readings.len(),
        rounds_added = rounds,
        total_trees = regressor.n_trees(),
        "Incremental update committed"
    );

    Ok(UpdateReport {
        generation: manifest.id,
        parent: manifest.parent,
        rows: batch.readings.len(),
        dropped_rows: batch.dropped,
        rounds_added: rounds,
        total_trees: regressor.n_trees(),
    })
}

/// Every way the transform can fail to serve an update is reported as stale
fn load_transform_for_update(
    staged: &StagedGeneration,
    hyperparameters: &HyperparameterRecord,
) -> Result<FeatureTransform> {
    let checksum = match staged.checksum_of(ArtifactKind::Transform) {
        Ok(checksum) => checksum,
        Err(EngineError::ArtifactMissing { path, .. }) => {
            return Err(EngineError::StaleTransform(format!(
                "feature transform not found at {}",
                path.display()
            )))
        }
        Err(e) => return Err(e),
    };
    if checksum != hyperparameters.transform_checksum {
        return Err(EngineError::StaleTransform(
            "feature transform differs from the one the regressor was trained against".to_string(),
        ));
    }
    let transform: FeatureTransform = staged.read(ArtifactKind::Transform).map_err(|e| match e {
        EngineError::Corrupt { reason, .. } => EngineError::StaleTransform(reason),
        other => other,
    })?;
    transform.validate()?;
    Ok(transform)
}
