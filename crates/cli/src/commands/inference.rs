//! Single-record inference and dataset replay

use super::{FieldRow, Workspace};
use crate::output::{
    color_action, format_co2, format_days, print_info, print_json, print_table, print_warning, OutputFormat,
};
use anyhow::{Context, Result};
use clap::Args;
use engine_lib::preprocess::load_dataset;
use engine_lib::{infer_from_store, ArtifactCache, InferenceEngine, NumericField, RawRecord};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tabled::Tabled;

/// Reading fields accepted on the command line
#[derive(Debug, Default, Args)]
pub struct RecordArgs {
    /// Full reading as a JSON object; field flags override its values
    #[arg(long)]
    pub json: Option<String>,

    #[arg(long)]
    pub vehicle_id: Option<String>,

    #[arg(long)]
    pub manufacturer: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    /// Petrol, Diesel, CNG, ...
    #[arg(long)]
    pub fuel_type: Option<String>,

    #[arg(long)]
    pub transmission: Option<String>,

    /// Engine displacement in cm³
    #[arg(long)]
    pub engine_size: Option<f64>,

    /// Power in PS
    #[arg(long)]
    pub power: Option<f64>,

    /// Observed CO2 in g/km
    #[arg(long)]
    pub co2: Option<f64>,
}

impl RecordArgs {
    pub fn into_record(self) -> Result<RawRecord> {
        let mut record = match &self.json {
            Some(text) => serde_json::from_str::<RawRecord>(text).context("Invalid --json reading")?,
            None => RawRecord::default(),
        };
        if let Some(v) = self.vehicle_id {
            record.car_id = Some(v);
        }
        if let Some(v) = self.manufacturer {
            record.manufacturer = Some(v);
        }
        if let Some(v) = self.model {
            record.model = Some(v);
        }
        if let Some(v) = self.fuel_type {
            record.fuel_type = Some(v);
        }
        if let Some(v) = self.transmission {
            record.transmission_type = Some(v);
        }
        if let Some(v) = self.engine_size {
            record.engine_size_cm3 = NumericField::from(v);
        }
        if let Some(v) = self.power {
            record.power_ps = NumericField::from(v);
        }
        if let Some(v) = self.co2 {
            record.co2 = NumericField::from(v);
        }
        Ok(record)
    }
}

/// Run one reading through the current generation
pub fn infer(ws: &Workspace, args: RecordArgs) -> Result<()> {
    let record = args.into_record()?;
    let result = infer_from_store(&ws.store, &record, &ws.config.policy).context("Inference failed")?;

    match ws.format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            print_table(vec![
                FieldRow::new("Anomaly", if result.is_anomaly() { "yes" } else { "no" }),
                FieldRow::new("Predicted CO2", format_co2(result.predicted_co2())),
                FieldRow::new("Maintenance", format_days(result.maintenance_days())),
                FieldRow::new("Action", color_action(result.action())),
            ]);
            println!("\n{}", result.action());
        }
    }
    Ok(())
}

/// Row for the simulation table
#[derive(Tabled)]
struct SimulationRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Vehicle")]
    vehicle: String,
    #[tabled(rename = "Anomaly")]
    anomaly: String,
    #[tabled(rename = "Predicted CO2")]
    predicted_co2: String,
    #[tabled(rename = "Maintenance")]
    maintenance: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Latency")]
    latency: String,
}

/// Replay dataset rows as a telemetry stream, one inference per row
pub async fn simulate(ws: &Workspace, dataset: &Path, limit: usize, delay: Duration) -> Result<()> {
    let records = load_dataset(dataset).with_context(|| format!("Failed to load dataset {}", dataset.display()))?;
    let records: Vec<RawRecord> = records.into_iter().take(limit).collect();
    if records.is_empty() {
        print_warning("Dataset has no rows to replay");
        return Ok(());
    }

    let cache = Arc::new(ArtifactCache::new(ws.store.clone()));
    let engine = InferenceEngine::new(cache, ws.config.policy.clone(), "emx-simulate");

    if matches!(ws.format, OutputFormat::Table) {
        print_info(&format!(
            "Replaying {} readings every {} ms",
            records.len(),
            delay.as_millis()
        ));
    }

    let mut outcomes = Vec::with_capacity(records.len());
    let mut rows = Vec::new();
    for (index, record) in records.iter().enumerate() {
        if index > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let outcome = engine
            .infer(record)
            .with_context(|| format!("Inference failed on row {}", index))?;

        if matches!(ws.format, OutputFormat::Table) {
            let row = SimulationRow {
                index,
                vehicle: outcome.vehicle_id.clone().unwrap_or_else(|| "-".to_string()),
                anomaly: if outcome.result.is_anomaly() { "yes" } else { "no" }.to_string(),
                predicted_co2: format_co2(outcome.result.predicted_co2()),
                maintenance: format_days(outcome.result.maintenance_days()),
                action: color_action(outcome.result.action()),
                latency: format!("{:.2} ms", outcome.latency_ms),
            };
            // Delayed replays print each row as it arrives
            if delay.is_zero() {
                rows.push(row);
            } else {
                print_table(vec![row]);
            }
        }
        outcomes.push(outcome);
    }

    match ws.format {
        OutputFormat::Json => print_json(&outcomes)?,
        OutputFormat::Table => {
            if !rows.is_empty() {
                print_table(rows);
            }
            let anomalies = outcomes.iter().filter(|o| o.result.is_anomaly()).count();
            println!("\nTotal: {} readings, {} anomalies", outcomes.len(), anomalies);
        }
    }
    Ok(())
}
