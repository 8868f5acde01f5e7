//! Maintenance interval estimation
//!
//! A shallow regression tree predicts days until recommended service. The
//! training label is a heuristic proxy derived from observed CO2:
//! `max(min_days, max_days - co2 / max_co2 * max_days)`. Deployments with real
//! service-log labels should swap the label source and keep the model.

use crate::error::{EngineError, Result};
use crate::learners::{Regressor, RegressionTree};
use crate::models::VehicleReading;
use crate::transform::FeatureTransform;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const DEFAULT_MIN_DAYS: f64 = 7.0;
pub const DEFAULT_MAX_DAYS: f64 = 180.0;
pub const DEFAULT_MAX_DEPTH: usize = 6;

/// Bounds and depth of the maintenance model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceParams {
    pub max_depth: usize,
    pub min_days: f64,
    pub max_days: f64,
}

impl Default for MaintenanceParams {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            min_days: DEFAULT_MIN_DAYS,
            max_days: DEFAULT_MAX_DAYS,
        }
    }
}

impl MaintenanceParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_days >= 0.0 && self.min_days < self.max_days) {
            return Err(EngineError::Configuration(format!(
                "maintenance bounds must satisfy 0 <= min_days < max_days, got [{}, {}]",
                self.min_days, self.max_days
            )));
        }
        Ok(())
    }
}

/// Synthesize "days until service" labels from observed CO2
pub fn synthesize_labels(co2: &[f64], params: &MaintenanceParams) -> Vec<f64> {
    let max_co2 = co2.iter().cloned().fold(0.0, f64::max);
    co2.iter()
        .map(|&c| {
            let normalized = if max_co2 > 0.0 { c / max_co2 } else { 0.0 };
            (params.max_days - normalized * params.max_days).max(params.min_days)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceEstimator {
    params: MaintenanceParams,
    n_features: usize,
    tree: RegressionTree,
}

impl MaintenanceEstimator {
    /// Fit on the full projection of labelled readings
    pub fn fit(
        transform: &FeatureTransform,
        readings: &[VehicleReading],
        params: MaintenanceParams,
    ) -> Result<Self> {
        params.validate()?;
        let labelled: Vec<&VehicleReading> = readings.iter().filter(|r| r.co2.is_some()).collect();
        if labelled.is_empty() {
            return Err(EngineError::Configuration(
                "cannot fit maintenance estimator without labelled readings".to_string(),
            ));
        }

        let co2: Vec<f64> = labelled.iter().filter_map(|r| r.co2).collect();
        let labels = synthesize_labels(&co2, &params);
        let owned: Vec<VehicleReading> = labelled.into_iter().cloned().collect();
        let x = transform.apply_batch(&owned);
        let tree = RegressionTree::fit_cart(&x, &labels, params.max_depth);

        info!(
            rows = x.n_rows(),
            depth = tree.depth(),
            leaves = tree.n_leaves(),
            "Maintenance estimator fitted"
        );

        Ok(Self {
            params,
            n_features: x.n_cols(),
            tree,
        })
    }

    /// Predicted whole days until service, within the configured bounds
    pub fn predict_days(&self, features: &[f64]) -> u32 {
        let days = self
            .tree
            .predict_row(features)
            .clamp(self.params.min_days, self.params.max_days);
        days as u32
    }

    pub fn params(&self) -> &MaintenanceParams {
        &self.params
    }

    pub fn check_compatible(&self, transform: &FeatureTransform) -> Result<()> {
        self.params.validate()?;
        if !self.tree.is_well_formed() {
            return Err(EngineError::Configuration("maintenance tree is malformed".to_string()));
        }
        if self.n_features != transform.width() {
            return Err(EngineError::StaleTransform(format!(
                "maintenance estimator expects {} features, transform produces {}",
                self.n_features,
                transform.width()
            )));
        }
        Ok(())
    }
}

/// Whole days until the next service for one feature vector
pub trait DaysEstimator: Send + Sync {
    fn predict_days(&self, features: &[f64]) -> u32;
}

impl DaysEstimator for MaintenanceEstimator {
    fn predict_days(&self, features: &[f64]) -> u32 {
        MaintenanceEstimator::predict_days(self, features)
    }
}

/// Raw (unclamped) tree output
impl Regressor for MaintenanceEstimator {
    fn predict(&self, features: &[f64]) -> f64 {
        self.tree.predict_row(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawRecord;
    use crate::preprocess::clean_record;

    #[test]
    fn test_label_synthesis() {
        let params = MaintenanceParams::default();
        let labels = synthesize_labels(&[0.0, 100.0, 200.0, 195.0], &params);
        assert_eq!(labels[0], 180.0);
        assert_eq!(labels[1], 90.0);
        // 180 - 180 = 0 is floored to the minimum
        assert_eq!(labels[2], 7.0);
        assert_eq!(labels[3], 7.0);
    }

    #[test]
    fn test_label_synthesis_all_zero() {
        let labels = synthesize_labels(&[0.0, 0.0], &MaintenanceParams::default());
        assert_eq!(labels, vec![180.0, 180.0]);
    }

    #[test]
    fn test_predictions_within_bounds() {
        let readings: Vec<VehicleReading> = (0..60)
            .map(|i| {
                clean_record(&RawRecord {
                    engine_size_cm3: (1000.0 + i as f64 * 20.0).into(),
                    power_ps: (60.0 + i as f64).into(),
                    co2: (80.0 + i as f64 * 3.0).into(),
                    ..Default::default()
                })
            })
            .collect();
        let transform = FeatureTransform::fit(&readings).unwrap();
        let estimator = MaintenanceEstimator::fit(&transform, &readings, MaintenanceParams::default()).unwrap();
        estimator.check_compatible(&transform).unwrap();

        for r in &readings {
            let days = estimator.predict_days(&transform.apply(r));
            assert!((7..=180).contains(&days));
        }
        let low = estimator.predict_days(&transform.apply(&readings[0]));
        let high = estimator.predict_days(&transform.apply(&readings[59]));
        assert!(low > high);
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let params = MaintenanceParams {
            min_days: 200.0,
            ..MaintenanceParams::default()
        };
        assert!(params.validate().is_err());
    }
}
