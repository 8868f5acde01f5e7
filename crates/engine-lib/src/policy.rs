//! Decision policy
//!
//! Pure mapping from gate and model outputs to one operator action. The
//! priority chain is strict: anomaly, then compliance, then maintenance
//! notice, then OK. Exactly one action is produced per call.

use crate::error::{EngineError, Result};
use crate::models::{Action, InferenceResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_FALLBACK_FUEL: &str = "Petrol";
pub const DEFAULT_MAINTENANCE_NOTICE_DAYS: u32 = 14;

/// Compliance limits and the maintenance urgency cutoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Maximum allowed predicted CO2 per fuel type (inclusive)
    #[serde(default = "default_limits")]
    pub limits: BTreeMap<String, f64>,
    /// Fuel type whose limit applies to unrecognized fuels
    #[serde(default = "default_fallback_fuel")]
    pub fallback_fuel: String,
    /// Notice fires when predicted days are at or below this value
    #[serde(default = "default_maintenance_notice_days")]
    pub maintenance_notice_days: u32,
}

fn default_limits() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("Diesel".to_string(), 1500.0),
        ("Petrol".to_string(), 1200.0),
        ("CNG".to_string(), 1000.0),
    ])
}

fn default_fallback_fuel() -> String {
    DEFAULT_FALLBACK_FUEL.to_string()
}

fn default_maintenance_notice_days() -> u32 {
    DEFAULT_MAINTENANCE_NOTICE_DAYS
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            limits: default_limits(),
            fallback_fuel: default_fallback_fuel(),
            maintenance_notice_days: default_maintenance_notice_days(),
        }
    }
}

impl Thresholds {
    /// The fallback fuel must itself have a limit
    pub fn validate(&self) -> Result<()> {
        if self.lookup(&self.fallback_fuel).is_none() {
            return Err(EngineError::Configuration(format!(
                "fallback fuel '{}' has no compliance limit",
                self.fallback_fuel
            )));
        }
        if let Some((fuel, limit)) = self.limits.iter().find(|(_, l)| !l.is_finite()) {
            return Err(EngineError::Configuration(format!(
                "compliance limit for '{fuel}' is not finite: {limit}"
            )));
        }
        Ok(())
    }

    /// Limit for a fuel type, falling back to the fallback fuel's limit
    pub fn limit_for(&self, fuel_type: &str) -> f64 {
        self.lookup(fuel_type)
            .or_else(|| self.lookup(&self.fallback_fuel))
            .unwrap_or(f64::INFINITY)
    }

    /// Exact match first, then ASCII case-insensitive
    fn lookup(&self, fuel_type: &str) -> Option<f64> {
        self.limits.get(fuel_type).copied().or_else(|| {
            self.limits
                .iter()
                .find(|(fuel, _)| fuel.eq_ignore_ascii_case(fuel_type))
                .map(|(_, limit)| *limit)
        })
    }
}

/// Combine the anomaly flag and predictions into one result.
///
/// Predictions are ignored when `anomaly` is set. Otherwise both must be
/// present and the CO2 prediction finite.
pub fn decide(
    anomaly: bool,
    predicted_co2: Option<f64>,
    maintenance_days: Option<u32>,
    fuel_type: &str,
    thresholds: &Thresholds,
) -> Result<InferenceResult> {
    if anomaly {
        return Ok(InferenceResult::Anomaly {
            action: Action::ManualInspection,
        });
    }

    let predicted_co2 =
        predicted_co2.ok_or(EngineError::IncompletePrediction("predicted co2 is missing"))?;
    let maintenance_days =
        maintenance_days.ok_or(EngineError::IncompletePrediction("maintenance days are missing"))?;
    if !predicted_co2.is_finite() {
        return Err(EngineError::IncompletePrediction("predicted co2 is not a finite number"));
    }

    let limit = thresholds.limit_for(fuel_type);
    let action = if predicted_co2 > limit {
        Action::NonComplianceAlert { predicted_co2, limit }
    } else if maintenance_days <= thresholds.maintenance_notice_days {
        Action::MaintenanceNotice {
            days: maintenance_days,
        }
    } else {
        Action::Ok
    };

    Ok(InferenceResult::Full {
        predicted_co2,
        maintenance_days,
        action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anomaly_wins_over_everything() {
        let t = Thresholds::default();
        let result = decide(true, Some(5000.0), Some(1), "Petrol", &t).unwrap();
        assert_eq!(
            result,
            InferenceResult::Anomaly {
                action: Action::ManualInspection
            }
        );
        assert_eq!(result.predicted_co2(), None);
        assert_eq!(result.maintenance_days(), None);

        // Predictions need not exist for an anomaly
        assert!(decide(true, None, None, "Petrol", &t).unwrap().is_anomaly());
    }

    #[test]
    fn test_compliance_limit_is_inclusive() {
        let t = Thresholds::default();
        let at = decide(false, Some(1200.0), Some(100), "Petrol", &t).unwrap();
        assert_eq!(at.action(), &Action::Ok);

        let over = decide(false, Some(1200.0 + 1e-9), Some(100), "Petrol", &t).unwrap();
        assert!(matches!(over.action(), Action::NonComplianceAlert { limit, .. } if *limit == 1200.0));
    }

    #[test]
    fn test_per_fuel_limits() {
        let t = Thresholds::default();
        assert_eq!(decide(false, Some(1400.0), Some(100), "Diesel", &t).unwrap().action(), &Action::Ok);
        assert!(matches!(
            decide(false, Some(1001.0), Some(100), "CNG", &t).unwrap().action(),
            Action::NonComplianceAlert { .. }
        ));
    }

    #[test]
    fn test_unknown_fuel_uses_fallback() {
        let t = Thresholds::default();
        assert_eq!(t.limit_for("Hydrogen"), 1200.0);
        assert_eq!(t.limit_for("diesel"), 1500.0);
        assert!(matches!(
            decide(false, Some(1250.0), Some(100), "Hydrogen", &t).unwrap().action(),
            Action::NonComplianceAlert { limit, .. } if *limit == 1200.0
        ));
    }

    #[test]
    fn test_maintenance_boundary() {
        let t = Thresholds::default();
        assert_eq!(
            decide(false, Some(100.0), Some(14), "Petrol", &t).unwrap().action(),
            &Action::MaintenanceNotice { days: 14 }
        );
        assert_eq!(decide(false, Some(100.0), Some(15), "Petrol", &t).unwrap().action(), &Action::Ok);
    }

    #[test]
    fn test_compliance_wins_over_maintenance() {
        let t = Thresholds::default();
        let result = decide(false, Some(2000.0), Some(7), "Diesel", &t).unwrap();
        assert!(matches!(result.action(), Action::NonComplianceAlert { .. }));
        assert_eq!(result.maintenance_days(), Some(7));
    }

    #[test]
    fn test_missing_prediction_is_error() {
        let t = Thresholds::default();
        assert!(matches!(
            decide(false, None, Some(30), "Petrol", &t),
            Err(EngineError::IncompletePrediction(_))
        ));
        assert!(matches!(
            decide(false, Some(100.0), None, "Petrol", &t),
            Err(EngineError::IncompletePrediction(_))
        ));
    }

    #[test]
    fn test_non_finite_prediction_is_error() {
        let t = Thresholds::default();
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                decide(false, Some(value), Some(100), "Petrol", &t),
                Err(EngineError::IncompletePrediction(_))
            ));
        }
        // Anomalies never look at the prediction
        assert!(decide(true, Some(f64::NAN), None, "Petrol", &t).unwrap().is_anomaly());
    }

    #[test]
    fn test_fallback_without_limit_rejected() {
        let t = Thresholds {
            fallback_fuel: "LPG".to_string(),
            ..Thresholds::default()
        };
        assert!(t.validate().is_err());
        Thresholds::default().validate().unwrap();
    }
}
