//! Real-time inference orchestrator
//!
//! One call walks `Start -> Transformed -> Gated -> (ShortCircuitAnomaly |
//! Predicted -> Decided)`. The regressors are never invoked for a reading the
//! anomaly gate flags. Every call either returns a complete result or an
//! error; there is no partial mode.

use crate::error::Result;
use crate::learners::{OutlierDetector, Regressor};
use crate::maintenance::DaysEstimator;
use crate::models::{InferenceResult, RawRecord, VehicleReading};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::policy::{decide, Thresholds};
use crate::preprocess::clean_record;
use crate::store::{ArtifactCache, ArtifactSet, ArtifactStore};
use crate::transform::FeatureTransform;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Inference slower than this is logged as a warning
pub const SLOW_INFERENCE: Duration = Duration::from_millis(100);

/// Orchestrator states, logged as each one is entered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceStage {
    Start,
    Transformed,
    Gated,
    ShortCircuitAnomaly,
    Predicted,
    Decided,
}

impl InferenceStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceStage::Start => "start",
            InferenceStage::Transformed => "transformed",
            InferenceStage::Gated => "gated",
            InferenceStage::ShortCircuitAnomaly => "short_circuit_anomaly",
            InferenceStage::Predicted => "predicted",
            InferenceStage::Decided => "decided",
        }
    }
}

/// The models one call runs through; all must come from the same generation
pub struct Pipeline<'a> {
    pub transform: &'a FeatureTransform,
    pub gate: &'a dyn OutlierDetector,
    pub regressor: &'a dyn Regressor,
    pub maintenance: &'a dyn DaysEstimator,
}

impl<'a> Pipeline<'a> {
    pub fn from_artifacts(set: &'a ArtifactSet) -> Self {
        Self {
            transform: &set.transform,
            gate: &set.anomaly_gate,
            regressor: &set.regressor,
            maintenance: &set.maintenance,
        }
    }

    /// Run one cleaned reading through gate, models and policy
    pub fn run(&self, reading: &VehicleReading, thresholds: &Thresholds) -> Result<InferenceResult> {
        let vehicle = reading.car_id.as_deref().unwrap_or("-");
        let mut stage = InferenceStage::Start;
        debug!(vehicle, stage = stage.as_str(), "Inference stage");

        let numeric = self.transform.apply_numeric(reading);
        let full = self.transform.apply(reading);
        stage = InferenceStage::Transformed;
        debug!(vehicle, stage = stage.as_str(), width = full.len(), "Inference stage");

        let anomaly = self.gate.is_outlier(&numeric);
        stage = InferenceStage::Gated;
        debug!(vehicle, stage = stage.as_str(), anomaly, "Inference stage");

        if anomaly {
            stage = InferenceStage::ShortCircuitAnomaly;
            debug!(vehicle, stage = stage.as_str(), "Inference stage");
            return decide(true, None, None, &reading.fuel_type, thresholds);
        }

        let predicted_co2 = self.regressor.predict(&full);
        let maintenance_days = self.maintenance.predict_days(&full);
        stage = InferenceStage::Predicted;
        debug!(
            vehicle,
            stage = stage.as_str(),
            predicted_co2,
            maintenance_days,
            "Inference stage"
        );

        let result = decide(
            false,
            Some(predicted_co2),
            Some(maintenance_days),
            &reading.fuel_type,
            thresholds,
        )?;
        stage = InferenceStage::Decided;
        debug!(vehicle, stage = stage.as_str(), action = result.action().label(), "Inference stage");
        Ok(result)
    }
}

/// Clean one raw record and infer with an already loaded generation
pub fn infer(set: &ArtifactSet, raw: &RawRecord, thresholds: &Thresholds) -> Result<InferenceResult> {
    let reading = clean_record(raw);
    Pipeline::from_artifacts(set).run(&reading, thresholds)
}

/// Load the committed generation from disk and infer one record
pub fn infer_from_store(store: &ArtifactStore, raw: &RawRecord, thresholds: &Thresholds) -> Result<InferenceResult> {
    let set = store.load_current()?;
    infer(&set, raw, thresholds)
}

/// Result of one engine call with the generation that produced it
#[derive(Debug, Clone, Serialize)]
pub struct InferenceOutcome {
    pub vehicle_id: Option<String>,
    pub generation: String,
    #[serde(flatten)]
    pub result: InferenceResult,
    pub latency_ms: f64,
}

/// Inference over the cached current generation, with metrics and event logs
pub struct InferenceEngine {
    cache: Arc<ArtifactCache>,
    thresholds: Thresholds,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl InferenceEngine {
    pub fn new(cache: Arc<ArtifactCache>, thresholds: Thresholds, source: impl Into<String>) -> Self {
        Self {
            cache,
            thresholds,
            metrics: EngineMetrics::new(),
            logger: StructuredLogger::new(source),
        }
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Infer one raw record against the current generation
    pub fn infer(&self, raw: &RawRecord) -> Result<InferenceOutcome> {
        let start = Instant::now();
        let outcome = self.infer_inner(raw, start);
        if outcome.is_err() {
            self.metrics.inc_inference_errors();
        }
        outcome
    }

    fn infer_inner(&self, raw: &RawRecord, start: Instant) -> Result<InferenceOutcome> {
        let set = self.cache.get()?;
        let result = infer(&set, raw, &self.thresholds)?;

        let elapsed = start.elapsed();
        let latency_ms = elapsed.as_secs_f64() * 1000.0;
        self.metrics.observe_inference_latency(elapsed.as_secs_f64());
        self.metrics.record_result(&result);
        self.metrics.set_generation(&set.generation);

        let vehicle = raw.stream_key();
        if elapsed > SLOW_INFERENCE {
            warn!(
                vehicle = ?vehicle,
                latency_ms,
                "Slow inference"
            );
        }
        self.logger.log_inference(vehicle, &set.generation, &result, latency_ms);

        Ok(InferenceOutcome {
            vehicle_id: vehicle.map(str::to_string),
            generation: set.generation.clone(),
            result,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;
    use crate::preprocess::clean_batch;

    struct Flag(bool);

    impl OutlierDetector for Flag {
        fn is_outlier(&self, _features: &[f64]) -> bool {
            self.0
        }
    }

    struct Fixed(f64);

    impl Regressor for Fixed {
        fn predict(&self, _features: &[f64]) -> f64 {
            self.0
        }
    }

    struct Unreachable;

    impl Regressor for Unreachable {
        fn predict(&self, _features: &[f64]) -> f64 {
            panic!("regressor invoked for a flagged reading")
        }
    }

    impl DaysEstimator for Unreachable {
        fn predict_days(&self, _features: &[f64]) -> u32 {
            panic!("maintenance estimator invoked for a flagged reading")
        }
    }

    struct Days(u32);

    impl DaysEstimator for Days {
        fn predict_days(&self, _features: &[f64]) -> u32 {
            self.0
        }
    }

    fn transform() -> FeatureTransform {
        let raws: Vec<RawRecord> = (0..10)
            .map(|i| RawRecord {
                engine_size_cm3: (1000.0 + i as f64 * 100.0).into(),
                power_ps: (80.0 + i as f64).into(),
                fuel_type: Some(if i % 2 == 0 { "Petrol" } else { "Diesel" }.to_string()),
                co2: (100.0 + i as f64).into(),
                ..Default::default()
            })
            .collect();
        FeatureTransform::fit(&clean_batch(&raws)).unwrap()
    }

    fn reading(fuel: &str) -> VehicleReading {
        clean_record(&RawRecord {
            engine_size_cm3: 1200.0.into(),
            power_ps: 90.0.into(),
            fuel_type: Some(fuel.to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn test_anomaly_short_circuits_models() {
        let t = transform();
        let pipeline = Pipeline {
            transform: &t,
            gate: &Flag(true),
            regressor: &Unreachable,
            maintenance: &Unreachable,
        };
        let result = pipeline.run(&reading("Petrol"), &Thresholds::default()).unwrap();
        assert!(result.is_anomaly());
        assert_eq!(result.action(), &Action::ManualInspection);
        assert_eq!(result.predicted_co2(), None);
        assert_eq!(result.maintenance_days(), None);
    }

    #[test]
    fn test_compliant_reading_is_ok() {
        let t = transform();
        let pipeline = Pipeline {
            transform: &t,
            gate: &Flag(false),
            regressor: &Fixed(110.0),
            maintenance: &Days(120),
        };
        let result = pipeline.run(&reading("Petrol"), &Thresholds::default()).unwrap();
        assert_eq!(result.predicted_co2(), Some(110.0));
        assert_eq!(result.maintenance_days(), Some(120));
        assert_eq!(result.action(), &Action::Ok);
    }

    #[test]
    fn test_unseen_fuel_uses_petrol_limit() {
        let t = transform();
        let pipeline = Pipeline {
            transform: &t,
            gate: &Flag(false),
            regressor: &Fixed(1250.0),
            maintenance: &Days(120),
        };
        let result = pipeline.run(&reading("Hydrogen"), &Thresholds::default()).unwrap();
        assert_eq!(
            result.action(),
            &Action::NonComplianceAlert {
                predicted_co2: 1250.0,
                limit: 1200.0
            }
        );
    }

    #[test]
    fn test_maintenance_notice_when_compliant() {
        let t = transform();
        let pipeline = Pipeline {
            transform: &t,
            gate: &Flag(false),
            regressor: &Fixed(900.0),
            maintenance: &Days(10),
        };
        let result = pipeline.run(&reading("Diesel"), &Thresholds::default()).unwrap();
        assert_eq!(result.action(), &Action::MaintenanceNotice { days: 10 });
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(InferenceStage::ShortCircuitAnomaly.as_str(), "short_circuit_anomaly");
        assert_eq!(InferenceStage::Decided.as_str(), "decided");
    }
}
