//! Core data models for the emissions engine

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Fuel type assumed when a reading carries none
pub const DEFAULT_FUEL_TYPE: &str = "Petrol";

/// Transmission type assumed when a reading carries none
pub const DEFAULT_TRANSMISSION_TYPE: &str = "Automatic";

/// Manufacturer recorded when a reading carries none
pub const UNKNOWN_MANUFACTURER: &str = "Unknown";

/// A loosely-typed numeric cell.
///
/// Accepts numbers, numeric strings, empty strings and nulls. Anything that
/// does not parse to a finite number is treated as missing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NumericField(pub Option<f64>);

impl NumericField {
    pub fn missing() -> Self {
        Self(None)
    }

    pub fn value(&self) -> Option<f64> {
        self.0
    }

    fn from_f64(v: f64) -> Self {
        if v.is_finite() {
            Self(Some(v))
        } else {
            Self(None)
        }
    }

    fn parse_text(s: &str) -> Self {
        match s.trim().parse::<f64>() {
            Ok(v) => Self::from_f64(v),
            Err(_) => Self(None),
        }
    }
}

impl From<f64> for NumericField {
    fn from(v: f64) -> Self {
        Self::from_f64(v)
    }
}

impl From<Option<f64>> for NumericField {
    fn from(v: Option<f64>) -> Self {
        v.map(Self::from_f64).unwrap_or_default()
    }
}

impl Serialize for NumericField {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.0 {
            Some(v) => serializer.serialize_f64(v),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for NumericField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct NumericVisitor;

        impl<'de> Visitor<'de> for NumericVisitor {
            type Value = NumericField;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a number, a numeric string, or null")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Self::Value, E> {
                Ok(NumericField::from_f64(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
                Ok(NumericField::from_f64(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
                Ok(NumericField::from_f64(v as f64))
            }

            fn visit_bool<E: de::Error>(self, _v: bool) -> std::result::Result<Self::Value, E> {
                Ok(NumericField::missing())
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
                Ok(NumericField::parse_text(v))
            }

            fn visit_none<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(NumericField::missing())
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(NumericField::missing())
            }

            fn visit_some<D: Deserializer<'de>>(
                self,
                deserializer: D,
            ) -> std::result::Result<Self::Value, D::Error> {
                deserializer.deserialize_any(NumericVisitor)
            }
        }

        deserializer.deserialize_any(NumericVisitor)
    }
}

/// One vehicle reading as it arrives from a dataset row or a telemetry client.
///
/// Every field is optional; the cleaning step supplies documented defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default, alias = "vehicleId", skip_serializing_if = "Option::is_none")]
    pub car_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transmission_type: Option<String>,
    #[serde(default)]
    pub engine_size_cm3: NumericField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuel_type: Option<String>,
    #[serde(default)]
    pub power_ps: NumericField,
    /// Observed CO2 in g/km
    #[serde(default, alias = "co2_emissions_gPERkm")]
    pub co2: NumericField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl RawRecord {
    /// Identifier of the vehicle stream this reading belongs to
    pub fn stream_key(&self) -> Option<&str> {
        self.car_id.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// A cleaned reading: every categorical field populated, numerics non-negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleReading {
    pub car_id: Option<String>,
    pub manufacturer: String,
    pub model: Option<String>,
    pub fuel_type: String,
    pub transmission_type: String,
    pub engine_size_cm3: f64,
    pub power_ps: f64,
    /// Observed CO2; `None` only when the source row had no usable target
    pub co2: Option<f64>,
    pub region: Option<String>,
    pub timestamp: Option<String>,
}

impl From<&VehicleReading> for RawRecord {
    fn from(r: &VehicleReading) -> Self {
        RawRecord {
            car_id: r.car_id.clone(),
            manufacturer: Some(r.manufacturer.clone()),
            model: r.model.clone(),
            transmission_type: Some(r.transmission_type.clone()),
            engine_size_cm3: NumericField::from(r.engine_size_cm3),
            fuel_type: Some(r.fuel_type.clone()),
            power_ps: NumericField::from(r.power_ps),
            co2: NumericField::from(r.co2),
            region: r.region.clone(),
            timestamp: r.timestamp.clone(),
        }
    }
}

/// Operator-facing action produced by the decision policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Reading is out of distribution: flag for manual verification inspection
    ManualInspection,
    /// Predicted CO2 exceeds the fuel-type compliance limit
    NonComplianceAlert { predicted_co2: f64, limit: f64 },
    /// Service recommended within the given number of days
    MaintenanceNotice { days: u32 },
    Ok,
}

impl Action {
    /// Short label used for metrics and log fields
    pub fn label(&self) -> &'static str {
        match self {
            Action::ManualInspection => "manual_inspection",
            Action::NonComplianceAlert { .. } => "non_compliance_alert",
            Action::MaintenanceNotice { .. } => "maintenance_notice",
            Action::Ok => "ok",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::ManualInspection => {
                write!(f, "ANOMALY: request more samples or flag for manual verification inspection")
            }
            Action::NonComplianceAlert { predicted_co2, limit } => write!(
                f,
                "ALERT: predicted non-compliance ({:.1} > {:.1}) -> notify user + manual verification inspection",
                predicted_co2, limit
            ),
            Action::MaintenanceNotice { days } => {
                write!(f, "NOTICE: recommend maintenance within {} days", days)
            }
            Action::Ok => write!(f, "OK"),
        }
    }
}

/// Outcome of one real-time inference call. Never partially populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "InferenceResultWire", try_from = "InferenceResultWire")]
pub enum InferenceResult {
    Anomaly {
        action: Action,
    },
    Full {
        predicted_co2: f64,
        maintenance_days: u32,
        action: Action,
    },
}

impl InferenceResult {
    pub fn is_anomaly(&self) -> bool {
        matches!(self, InferenceResult::Anomaly { .. })
    }

    pub fn action(&self) -> &Action {
        match self {
            InferenceResult::Anomaly { action } => action,
            InferenceResult::Full { action, .. } => action,
        }
    }

    pub fn predicted_co2(&self) -> Option<f64> {
        match self {
            InferenceResult::Anomaly { .. } => None,
            InferenceResult::Full { predicted_co2, .. } => Some(*predicted_co2),
        }
    }

    pub fn maintenance_days(&self) -> Option<u32> {
        match self {
            InferenceResult::Anomaly { .. } => None,
            InferenceResult::Full { maintenance_days, .. } => Some(*maintenance_days),
        }
    }
}

/// Flat wire shape: `{anomaly, predicted_co2, maintenance_days, action, message}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InferenceResultWire {
    anomaly: bool,
    predicted_co2: Option<f64>,
    maintenance_days: Option<u32>,
    action: Action,
    #[serde(default)]
    message: String,
}

impl From<InferenceResult> for InferenceResultWire {
    fn from(result: InferenceResult) -> Self {
        let message = result.action().to_string();
        InferenceResultWire {
            anomaly: result.is_anomaly(),
            predicted_co2: result.predicted_co2(),
            maintenance_days: result.maintenance_days(),
            action: result.action().clone(),
            message,
        }
    }
}

impl TryFrom<InferenceResultWire> for InferenceResult {
    type Error = String;

    fn try_from(wire: InferenceResultWire) -> std::result::Result<Self, Self::Error> {
        match (wire.anomaly, wire.predicted_co2, wire.maintenance_days) {
            (true, None, None) => Ok(InferenceResult::Anomaly {
                action: wire.action,
            }),
            (false, Some(predicted_co2), Some(maintenance_days)) => Ok(InferenceResult::Full {
                predicted_co2,
                maintenance_days,
                action: wire.action,
            }),
            (true, _, _) => Err("anomaly result must not carry predictions".to_string()),
            (false, _, _) => Err("full result requires predicted_co2 and maintenance_days".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_field_from_json_variants() {
        let rec: RawRecord = serde_json::from_str(
            r#"{"engine_size_cm3": "1598", "power_ps": null, "co2": 120}"#,
        )
        .unwrap();
        assert_eq!(rec.engine_size_cm3.value(), Some(1598.0));
        assert_eq!(rec.power_ps.value(), None);
        assert_eq!(rec.co2.value(), Some(120.0));
    }

    #[test]
    fn test_numeric_field_non_numeric_string_is_missing() {
        let rec: RawRecord = serde_json::from_str(r#"{"engine_size_cm3": "electric"}"#).unwrap();
        assert_eq!(rec.engine_size_cm3.value(), None);
    }

    #[test]
    fn test_column_aliases() {
        let rec: RawRecord = serde_json::from_str(
            r#"{"vehicleId": "VH-7", "co2_emissions_gPERkm": 98.5, "nox": 1.2}"#,
        )
        .unwrap();
        assert_eq!(rec.car_id.as_deref(), Some("VH-7"));
        assert_eq!(rec.co2.value(), Some(98.5));
        assert_eq!(rec.stream_key(), Some("VH-7"));
    }

    #[test]
    fn test_anomaly_result_wire_shape() {
        let result = InferenceResult::Anomaly {
            action: Action::ManualInspection,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["anomaly"], true);
        assert!(json["predicted_co2"].is_null());
        assert!(json["maintenance_days"].is_null());
        assert_eq!(json["action"]["kind"], "manual_inspection");
    }

    #[test]
    fn test_full_result_roundtrip() {
        let result = InferenceResult::Full {
            predicted_co2: 131.5,
            maintenance_days: 12,
            action: Action::MaintenanceNotice { days: 12 },
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: InferenceResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
        assert!(json.contains("within 12 days"));
    }

    #[test]
    fn test_partial_wire_rejected() {
        let json = r#"{"anomaly": false, "predicted_co2": 100.0, "maintenance_days": null, "action": {"kind": "ok"}}"#;
        assert!(serde_json::from_str::<InferenceResult>(json).is_err());

        let json = r#"{"anomaly": true, "predicted_co2": 100.0, "maintenance_days": null, "action": {"kind": "manual_inspection"}}"#;
        assert!(serde_json::from_str::<InferenceResult>(json).is_err());
    }
}
