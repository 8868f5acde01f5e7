//! Anomaly gate over the numeric projection of a reading

use crate::error::{EngineError, Result};
use crate::learners::{IsolationForest, IsolationForestParams, OutlierDetector};
use crate::models::VehicleReading;
use crate::transform::FeatureTransform;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Fitted inlier/outlier classifier guarding the regressors.
///
/// Only standardized numeric features reach the forest; categorical context
/// plays no part in anomaly scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyGate {
    forest: IsolationForest,
}

impl AnomalyGate {
    /// Fit on the numeric projection of a cleaned training batch
    pub fn fit(
        transform: &FeatureTransform,
        readings: &[VehicleReading],
        params: IsolationForestParams,
    ) -> Result<Self> {
        if readings.is_empty() {
            return Err(EngineError::Configuration(
                "cannot fit anomaly gate on an empty batch".to_string(),
            ));
        }
        let x = transform.apply_numeric_batch(readings);
        let forest = IsolationForest::fit(params, &x)?;

        let flagged = (0..x.n_rows())
            .filter(|&i| forest.is_outlier(x.row(i)))
            .count();
        info!(
            rows = x.n_rows(),
            flagged_in_training = flagged,
            contamination = forest.params().contamination,
            threshold = forest.threshold(),
            "Anomaly gate fitted"
        );

        Ok(Self { forest })
    }

    /// Input width the gate was fitted on
    pub fn input_width(&self) -> usize {
        self.forest.n_features()
    }

    /// Raw isolation score, higher is more anomalous
    pub fn score(&self, numeric: &[f64]) -> f64 {
        self.forest.score(numeric)
    }

    /// Check the gate can consume this transform's numeric projection
    pub fn check_compatible(&self, transform: &FeatureTransform) -> Result<()> {
        self.forest.validate()?;
        if self.input_width() != transform.numeric_width() {
            return Err(EngineError::StaleTransform(format!(
                "anomaly gate expects {} numeric features, transform produces {}",
                self.input_width(),
                transform.numeric_width()
            )));
        }
        Ok(())
    }
}

impl OutlierDetector for AnomalyGate {
    fn is_outlier(&self, features: &[f64]) -> bool {
        self.forest.is_outlier(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawRecord;
    use crate::preprocess::clean_record;

    fn reading(engine: f64, power: f64) -> VehicleReading {
        clean_record(&RawRecord {
            engine_size_cm3: engine.into(),
            power_ps: power.into(),
            co2: 120.0.into(),
            ..Default::default()
        })
    }

    fn batch() -> Vec<VehicleReading> {
        (0..200)
            .map(|i| reading(1000.0 + (i % 11) as f64 * 100.0, 70.0 + ((i * 7) % 9) as f64 * 10.0))
            .collect()
    }

    #[test]
    fn test_far_engine_size_is_flagged() {
        let readings = batch();
        let transform = FeatureTransform::fit(&readings).unwrap();
        let gate = AnomalyGate::fit(&transform, &readings, IsolationForestParams::default()).unwrap();

        let far = transform.apply_numeric(&reading(50_000.0, 90.0));
        assert!(gate.is_outlier(&far));
        let typical = transform.apply_numeric(&reading(1500.0, 110.0));
        assert!(!gate.is_outlier(&typical));
    }

    #[test]
    fn test_compatible_with_own_transform() {
        let readings = batch();
        let transform = FeatureTransform::fit(&readings).unwrap();
        let gate = AnomalyGate::fit(&transform, &readings, IsolationForestParams::default()).unwrap();
        gate.check_compatible(&transform).unwrap();
        assert_eq!(gate.input_width(), 2);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let transform = FeatureTransform::fit(&batch()).unwrap();
        assert!(matches!(
            AnomalyGate::fit(&transform, &[], IsolationForestParams::default()),
            Err(EngineError::Configuration(_))
        ));
    }
}
