//! End-to-end tests: train into a store, then infer and update against it

use engine_lib::config::EngineConfig;
use engine_lib::learners::ParamGrid;
use engine_lib::preprocess::{clean_batch, clean_record};
use engine_lib::store::ArtifactStore;
use engine_lib::training::{incremental_update, TrainingPipeline};
use engine_lib::transform::{CategoricalColumn, FeatureTransform};
use engine_lib::{
    decide, infer, infer_from_store, Action, ArtifactCache, ArtifactKind, EngineError, InferenceEngine, NumericField,
    RawRecord, Thresholds,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

fn co2_for(engine: f64, power: f64) -> f64 {
    40.0 + engine * 0.05 + power * 0.4
}

fn fleet() -> Vec<RawRecord> {
    let fuels = ["Petrol", "Diesel", "CNG"];
    let makers = ["Ford", "Audi", "Fiat", "Skoda"];
    let mut records = Vec::new();
    for e in 0..11 {
        for p in 0..10 {
            let i = records.len();
            let engine = 1000.0 + e as f64 * 100.0;
            let power = 60.0 + p as f64 * 10.0;
            records.push(RawRecord {
                car_id: Some(format!("car-{i}")),
                manufacturer: Some(makers[i % makers.len()].to_string()),
                fuel_type: Some(fuels[i % fuels.len()].to_string()),
                transmission_type: Some(if i % 2 == 0 { "Manual" } else { "Automatic" }.to_string()),
                engine_size_cm3: engine.into(),
                power_ps: power.into(),
                co2: co2_for(engine, power).into(),
                ..Default::default()
            });
        }
    }
    records
}

fn test_config(root: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.store.root = root.to_path_buf();
    config.training.grid = ParamGrid {
        eta: vec![0.3],
        max_depth: vec![3, 4],
        subsample: vec![0.9],
        colsample_bytree: vec![0.8],
    };
    config.training.max_rounds = 60;
    config.anomaly.n_estimators = 100;
    config
}

fn trained_store() -> (TempDir, ArtifactStore, EngineConfig) {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let store = ArtifactStore::open(&config.store.root, config.store.generations_to_keep).unwrap();
    TrainingPipeline::new(&store, &config).run(&fleet()).unwrap();
    (dir, store, config)
}

fn scenario_a() -> RawRecord {
    RawRecord {
        car_id: Some("scenario-a".to_string()),
        engine_size_cm3: 1200.0.into(),
        power_ps: 90.0.into(),
        fuel_type: Some("Petrol".to_string()),
        transmission_type: Some("Manual".to_string()),
        co2: 110.0.into(),
        ..Default::default()
    }
}

#[test]
fn test_scenario_a_inlier_gets_full_result() {
    let (_dir, store, config) = trained_store();
    let result = infer_from_store(&store, &scenario_a(), &config.policy).unwrap();

    assert!(!result.is_anomaly());
    let predicted = result.predicted_co2().unwrap();
    let days = result.maintenance_days().unwrap();
    assert!(predicted.is_finite());
    assert!((7..=180).contains(&days));

    let expected = decide(false, Some(predicted), Some(days), "Petrol", &config.policy).unwrap();
    assert_eq!(result.action(), expected.action());
    assert!(!matches!(result.action(), Action::NonComplianceAlert { .. }));
}

#[test]
fn test_scenario_b_far_outlier_short_circuits() {
    let (_dir, store, config) = trained_store();
    let record = RawRecord {
        engine_size_cm3: 50000.0.into(),
        power_ps: 90.0.into(),
        fuel_type: Some("Petrol".to_string()),
        ..Default::default()
    };
    let result = infer_from_store(&store, &record, &config.policy).unwrap();
    assert!(result.is_anomaly());
    assert_eq!(result.predicted_co2(), None);
    assert_eq!(result.maintenance_days(), None);
    assert_eq!(result.action(), &Action::ManualInspection);

    let wire = serde_json::to_value(&result).unwrap();
    assert_eq!(wire["anomaly"], true);
    assert!(wire["predicted_co2"].is_null());
    assert!(wire["maintenance_days"].is_null());
}

#[test]
fn test_unseen_interior_readings_get_full_results() {
    let (_dir, store, config) = trained_store();
    let set = store.load_current().unwrap();

    // Midpoints between training grid values, never seen in training
    let mut off_grid = Vec::new();
    for e in 0..10 {
        for p in 0..9 {
            off_grid.push(RawRecord {
                engine_size_cm3: (1050.0 + e as f64 * 100.0).into(),
                power_ps: (65.0 + p as f64 * 10.0).into(),
                fuel_type: Some("Diesel".to_string()),
                transmission_type: Some("Automatic".to_string()),
                ..Default::default()
            });
        }
    }

    let mut flagged = 0;
    for record in &off_grid {
        let result = infer(&set, record, &config.policy).unwrap();
        if result.is_anomaly() {
            flagged += 1;
        } else {
            assert!(result.predicted_co2().unwrap().is_finite());
        }
    }
    assert!(flagged <= 2, "flagged {flagged} of {}", off_grid.len());
}

#[test]
fn test_scenario_c_unknown_fuel_uses_petrol_limit() {
    let (_dir, store, _config) = trained_store();
    let set = store.load_current().unwrap();
    let record = RawRecord {
        fuel_type: Some("Hydrogen".to_string()),
        ..scenario_a()
    };

    let strict = Thresholds {
        limits: BTreeMap::from([
            ("Petrol".to_string(), 100.0),
            ("Diesel".to_string(), 5000.0),
            ("CNG".to_string(), 5000.0),
        ]),
        ..Thresholds::default()
    };
    let result = infer(&set, &record, &strict).unwrap();
    assert!(!result.is_anomaly());
    assert_eq!(
        result.action(),
        &Action::NonComplianceAlert {
            predicted_co2: result.predicted_co2().unwrap(),
            limit: 100.0
        }
    );

    assert_eq!(Thresholds::default().limit_for("Hydrogen"), 1200.0);
}

#[test]
fn test_missing_fields_take_defaults() {
    let (_dir, store, config) = trained_store();
    let result = infer_from_store(&store, &RawRecord::default(), &config.policy);
    // Zero engine size and power is far from the fleet, but the call must still complete
    assert!(result.is_ok());
}

#[test]
fn test_inference_without_artifacts_is_fatal() {
    let dir = TempDir::new().unwrap();
    let store = ArtifactStore::open(dir.path(), 5).unwrap();
    let err = infer_from_store(&store, &scenario_a(), &Thresholds::default()).unwrap_err();
    assert!(matches!(err, EngineError::ArtifactMissing { .. }));
}

#[test]
fn test_engine_reports_generation() {
    let (_dir, store, config) = trained_store();
    let current = store.current_id().unwrap().unwrap();
    let engine = InferenceEngine::new(Arc::new(ArtifactCache::new(store)), config.policy.clone(), "test");
    let outcome = engine.infer(&scenario_a()).unwrap();
    assert_eq!(outcome.generation, current);
    assert_eq!(outcome.vehicle_id.as_deref(), Some("scenario-a"));
    assert!(!outcome.result.is_anomaly());
}

#[test]
fn test_incremental_update_then_infer() {
    let (_dir, store, config) = trained_store();
    let before = store.load_current().unwrap();

    let report = incremental_update(&store, &fleet()[..40], 10).unwrap();
    assert_eq!(report.parent.as_deref(), Some(before.generation.as_str()));

    let after = store.load_current().unwrap();
    assert_eq!(after.regressor.n_trees(), before.regressor.n_trees() + 10);
    assert_eq!(after.transform, before.transform);
    assert!(infer(&after, &scenario_a(), &config.policy).is_ok());
}

#[test]
fn test_incremental_update_with_stale_transform_leaves_regressor_untouched() {
    let (_dir, store, _config) = trained_store();
    let current = store.current_id().unwrap();
    let regressor_path = store.current_artifact_path(ArtifactKind::Regressor).unwrap();
    let regressor_before = std::fs::read(&regressor_path).unwrap();

    // Replace the transform with one fitted on a different schema
    let other = clean_batch(&[RawRecord {
        fuel_type: Some("Electric".to_string()),
        manufacturer: Some("Tesla".to_string()),
        engine_size_cm3: 0.0.into(),
        power_ps: 300.0.into(),
        co2: 0.0.into(),
        ..Default::default()
    }]);
    let transform_path = store.current_artifact_path(ArtifactKind::Transform).unwrap();
    let replacement = FeatureTransform::fit(&other).unwrap();
    std::fs::write(&transform_path, serde_json::to_vec_pretty(&replacement).unwrap()).unwrap();

    let err = incremental_update(&store, &fleet(), 50).unwrap_err();
    assert!(matches!(err, EngineError::StaleTransform(_)), "{err}");

    assert_eq!(std::fs::read(&regressor_path).unwrap(), regressor_before);
    assert_eq!(store.current_id().unwrap(), current);
}

#[test]
fn test_incremental_update_with_missing_transform_is_stale() {
    let (_dir, store, _config) = trained_store();
    let regressor_path = store.current_artifact_path(ArtifactKind::Regressor).unwrap();
    let regressor_before = std::fs::read(&regressor_path).unwrap();

    std::fs::remove_file(store.current_artifact_path(ArtifactKind::Transform).unwrap()).unwrap();

    let err = incremental_update(&store, &fleet(), 50).unwrap_err();
    assert!(matches!(err, EngineError::StaleTransform(_)), "{err}");
    assert_eq!(std::fs::read(&regressor_path).unwrap(), regressor_before);
}

#[test]
fn test_cleaning_is_idempotent() {
    let mut records = fleet();
    records[0].power_ps = NumericField::missing();
    records[1].fuel_type = None;
    records[2].transmission_type = Some("  ".to_string());
    records[3].engine_size_cm3 = (-5.0).into();
    records[4].co2 = NumericField::missing();

    let once = clean_batch(&records);
    let raw_again: Vec<RawRecord> = once.iter().map(RawRecord::from).collect();
    let twice = clean_batch(&raw_again);
    assert_eq!(once, twice);
}

#[test]
fn test_unseen_category_encodes_as_zeros() {
    let cleaned = clean_batch(&fleet());
    let transform = FeatureTransform::fit(&cleaned).unwrap();
    let reading = clean_record(&RawRecord {
        manufacturer: Some("Tesla".to_string()),
        fuel_type: Some("Hydrogen".to_string()),
        engine_size_cm3: 1500.0.into(),
        power_ps: 100.0.into(),
        ..Default::default()
    });

    let row = transform.apply(&reading);
    assert_eq!(row.len(), transform.width());
    for column in [CategoricalColumn::Manufacturer, CategoricalColumn::FuelType] {
        let slots = transform.slot_range(column).unwrap();
        assert!(row[slots].iter().all(|v| *v == 0.0));
    }
    let transmission = transform.slot_range(CategoricalColumn::TransmissionType).unwrap();
    assert_eq!(row[transmission].iter().sum::<f64>(), 1.0);
}
