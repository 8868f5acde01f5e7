//! CLI integration tests

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn emx(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_emx"))
        .args(args)
        .env_remove("EMISSIONS_CONFIG")
        .env_remove("EMISSIONS_STORE")
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute emx")
}

/// Small grid so a full training run stays quick
fn write_config(dir: &Path) -> String {
    let path = dir.join("emissions.toml");
    let store = dir.join("models");
    std::fs::write(
        &path,
        format!(
            r#"
[store]
root = "{}"

[training]
max_rounds = 30

[training.grid]
eta = [0.3]
max_depth = [3]
subsample = [0.9]
colsample_bytree = [0.8]

[anomaly]
n_estimators = 50
"#,
            store.display()
        ),
    )
    .unwrap();
    path.display().to_string()
}

fn write_dataset(dir: &Path) -> String {
    let fuels = ["Petrol", "Diesel", "CNG"];
    let rows: Vec<serde_json::Value> = (0..90)
        .map(|i| {
            let engine = 1000.0 + (i % 10) as f64 * 100.0;
            let power = 60.0 + (i % 9) as f64 * 10.0;
            serde_json::json!({
                "car_id": format!("car-{i}"),
                "manufacturer": "Skoda",
                "fuel_type": fuels[i % 3],
                "transmission_type": if i % 2 == 0 { "Manual" } else { "Automatic" },
                "engine_size_cm3": engine,
                "power_ps": power,
                "co2_emissions_gPERkm": 40.0 + engine * 0.05 + power * 0.4,
            })
        })
        .collect();
    let path = dir.join("fleet.json");
    std::fs::write(&path, serde_json::to_vec(&rows).unwrap()).unwrap();
    path.display().to_string()
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = emx(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Vehicle Emissions"), "Should show app name");
    for command in ["train", "update", "evaluate", "infer", "simulate", "generations", "rollback"] {
        assert!(stdout.contains(command), "Should show {command} command");
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = emx(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("emx"), "Should show binary name");
}

#[test]
fn test_infer_help() {
    let output = emx(&["infer", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Infer help should succeed");
    assert!(stdout.contains("--engine-size"), "Should show engine-size option");
    assert!(stdout.contains("--fuel-type"), "Should show fuel-type option");
    assert!(stdout.contains("--json"), "Should show json option");
}

#[test]
fn test_simulate_help() {
    let output = emx(&["simulate", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Simulate help should succeed");
    assert!(stdout.contains("--limit"), "Should show limit option");
    assert!(stdout.contains("--delay-ms"), "Should show delay-ms option");
}

#[test]
fn test_infer_without_generation_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    let output = emx(&["--config", &config, "infer", "--engine-size", "1200"]);
    assert!(!output.status.success(), "Infer without artifacts should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"), "{stderr}");
}

#[test]
fn test_train_infer_and_list_generations() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let dataset = write_dataset(dir.path());

    let output = emx(&["--config", &config, "--format", "json", "train", &dataset]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let generation = report["generation"].as_str().unwrap().to_string();
    assert_eq!(report["train_rows"].as_u64().unwrap() + report["test_rows"].as_u64().unwrap(), 90);

    let output = emx(&[
        "--config", &config, "--format", "json", "infer", "--engine-size", "1200", "--power", "90",
        "--fuel-type", "Petrol", "--transmission", "Manual",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["anomaly"], false);
    assert!(result["predicted_co2"].is_number());

    let output = emx(&["--config", &config, "--format", "json", "generations"]);
    assert!(output.status.success());
    let listing: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(listing["current"], generation.as_str());
    assert_eq!(listing["generations"].as_array().unwrap().len(), 1);
}

#[test]
fn test_update_then_rollback() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let dataset = write_dataset(dir.path());

    let output = emx(&["--config", &config, "--format", "json", "train", &dataset]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let trained: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();

    let output = emx(&["--config", &config, "--format", "json", "update", &dataset, "--rounds", "5"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let updated: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(updated["parent"], trained["generation"]);
    assert_eq!(updated["rounds_added"], 5);

    let output = emx(&["--config", &config, "--format", "json", "rollback"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let rolled: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rolled["current"], trained["generation"]);
}
