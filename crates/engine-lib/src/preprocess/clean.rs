//! Cleaning of raw readings
//!
//! Repairs missing or unrealistic values with fixed defaults so the feature
//! transform never sees a null. Cleaning is idempotent: a cleaned batch fed
//! back through `clean_batch` comes out unchanged.

use crate::models::{
    RawRecord, VehicleReading, DEFAULT_FUEL_TYPE, DEFAULT_TRANSMISSION_TYPE, UNKNOWN_MANUFACTURER,
};

/// Clean a batch of raw readings.
///
/// * transmission type defaults to `Automatic`, fuel type to `Petrol`
/// * engine size: missing or non-numeric becomes 0.0 (electric vehicles)
/// * power: missing with an observed CO2 of exactly zero becomes 0.0;
///   remaining gaps take the batch median of the known values
/// * CO2, engine size and power are floored at zero
///
/// A missing CO2 stays missing; training drops those rows and counts them.
pub fn clean_batch(records: &[RawRecord]) -> Vec<VehicleReading> {
    let powers: Vec<Option<f64>> = records
        .iter()
        .map(|r| match (r.power_ps.value(), r.co2.value()) {
            (None, Some(co2)) if co2 == 0.0 => Some(0.0),
            (power, _) => power,
        })
        .collect();

    let known: Vec<f64> = powers.iter().flatten().copied().collect();
    let fill = median(&known).unwrap_or(0.0);

    records
        .iter()
        .zip(powers)
        .map(|(raw, power)| build_reading(raw, power.unwrap_or(fill), raw.co2.value()))
        .collect()
}

/// Clean a single reading for real-time inference.
///
/// Uses the batch defaults, except that a missing power rating or observed CO2
/// is taken as 0.0 since there is no batch to take a median from.
pub fn clean_record(raw: &RawRecord) -> VehicleReading {
    let co2 = raw.co2.value().unwrap_or(0.0);
    let power = raw.power_ps.value().unwrap_or(0.0);
    build_reading(raw, power, Some(co2))
}

/// Split cleaned readings into those with a usable target and a count of the rest
pub fn retain_labelled(readings: Vec<VehicleReading>) -> (Vec<VehicleReading>, usize) {
    let total = readings.len();
    let labelled: Vec<_> = readings.into_iter().filter(|r| r.co2.is_some()).collect();
    let dropped = total - labelled.len();
    (labelled, dropped)
}

fn build_reading(raw: &RawRecord, power: f64, co2: Option<f64>) -> VehicleReading {
    VehicleReading {
        car_id: non_blank(&raw.car_id),
        manufacturer: non_blank(&raw.manufacturer).unwrap_or_else(|| UNKNOWN_MANUFACTURER.to_string()),
        model: non_blank(&raw.model),
        fuel_type: non_blank(&raw.fuel_type).unwrap_or_else(|| DEFAULT_FUEL_TYPE.to_string()),
        transmission_type: non_blank(&raw.transmission_type)
            .unwrap_or_else(|| DEFAULT_TRANSMISSION_TYPE.to_string()),
        engine_size_cm3: floor_zero(raw.engine_size_cm3.value().unwrap_or(0.0)),
        power_ps: floor_zero(power),
        co2: co2.map(floor_zero),
        region: non_blank(&raw.region),
        timestamp: non_blank(&raw.timestamp),
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn floor_zero(v: f64) -> f64 {
    // also maps -0.0 to 0.0 so repeated cleaning compares equal
    if v > 0.0 {
        v
    } else {
        0.0
    }
}

/// Median with the midpoint of the two central values for even counts
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NumericField;

    fn raw(engine: Option<f64>, power: Option<f64>, co2: Option<f64>) -> RawRecord {
        RawRecord {
            engine_size_cm3: NumericField::from(engine),
            power_ps: NumericField::from(power),
            co2: NumericField::from(co2),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_for_categoricals() {
        let cleaned = clean_batch(&[RawRecord {
            fuel_type: Some("  ".to_string()),
            ..raw(Some(1400.0), Some(100.0), Some(120.0))
        }]);
        assert_eq!(cleaned[0].fuel_type, "Petrol");
        assert_eq!(cleaned[0].transmission_type, "Automatic");
        assert_eq!(cleaned[0].manufacturer, "Unknown");
    }

    #[test]
    fn test_electric_vehicle_power_rule() {
        let cleaned = clean_batch(&[
            raw(None, None, Some(0.0)),
            raw(Some(1600.0), Some(100.0), Some(130.0)),
            raw(Some(2000.0), Some(200.0), Some(180.0)),
        ]);
        assert_eq!(cleaned[0].engine_size_cm3, 0.0);
        assert_eq!(cleaned[0].power_ps, 0.0);
    }

    #[test]
    fn test_power_median_fill() {
        let cleaned = clean_batch(&[
            raw(Some(1600.0), None, Some(130.0)),
            raw(Some(1600.0), Some(100.0), Some(130.0)),
            raw(Some(2000.0), Some(200.0), Some(180.0)),
            raw(None, None, Some(0.0)),
        ]);
        // known powers: 100, 200 and the EV's 0.0 -> median 100
        assert_eq!(cleaned[0].power_ps, 100.0);
    }

    #[test]
    fn test_negative_values_floored() {
        let cleaned = clean_batch(&[raw(Some(-5.0), Some(-1.0), Some(-20.0))]);
        assert_eq!(cleaned[0].engine_size_cm3, 0.0);
        assert_eq!(cleaned[0].power_ps, 0.0);
        assert_eq!(cleaned[0].co2, Some(0.0));
    }

    #[test]
    fn test_missing_target_kept_as_missing() {
        let cleaned = clean_batch(&[raw(Some(1200.0), Some(90.0), None)]);
        assert_eq!(cleaned[0].co2, None);
        let (labelled, dropped) = retain_labelled(cleaned);
        assert!(labelled.is_empty());
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_clean_is_idempotent() {
        let batch = vec![
            raw(None, None, Some(0.0)),
            raw(Some(1598.0), None, Some(142.0)),
            raw(Some(-3.0), Some(75.0), None),
            RawRecord {
                fuel_type: Some("Diesel".into()),
                transmission_type: Some(" Manual ".into()),
                manufacturer: Some("Skoda".into()),
                ..raw(Some(1968.0), Some(150.0), Some(119.0))
            },
        ];
        let once = clean_batch(&batch);
        let again_input: Vec<RawRecord> = once.iter().map(RawRecord::from).collect();
        let twice = clean_batch(&again_input);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_clean_record_defaults() {
        let reading = clean_record(&RawRecord::default());
        assert_eq!(reading.engine_size_cm3, 0.0);
        assert_eq!(reading.power_ps, 0.0);
        assert_eq!(reading.co2, Some(0.0));
        assert_eq!(reading.fuel_type, "Petrol");
        assert_eq!(reading.transmission_type, "Automatic");
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }
}
