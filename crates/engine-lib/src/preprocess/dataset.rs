//! Dataset loading and splitting
//!
//! Historic readings are read from CSV (header row, original column names)
//! or JSON (an array, or one object per line for `.jsonl`/`.ndjson`).

use crate::error::{EngineError, Result};
use crate::models::RawRecord;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

/// Supported on-disk dataset formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    Csv,
    JsonArray,
    JsonLines,
}

impl DatasetFormat {
    /// Infer the format from the file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(DatasetFormat::Csv),
            "json" => Ok(DatasetFormat::JsonArray),
            "jsonl" | "ndjson" => Ok(DatasetFormat::JsonLines),
            other => Err(EngineError::Dataset(format!(
                "unsupported dataset extension {:?} for {}",
                other,
                path.display()
            ))),
        }
    }
}

/// Load raw readings from a dataset file
pub fn load_dataset(path: &Path) -> Result<Vec<RawRecord>> {
    if !path.exists() {
        return Err(EngineError::Configuration(format!(
            "dataset {} does not exist",
            path.display()
        )));
    }

    let format = DatasetFormat::from_path(path)?;
    let records = match format {
        DatasetFormat::Csv => load_csv(path)?,
        DatasetFormat::JsonArray => {
            let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
            serde_json::from_reader(BufReader::new(file))?
        }
        DatasetFormat::JsonLines => load_json_lines(path)?,
    };

    info!(
        path = %path.display(),
        format = ?format,
        rows = records.len(),
        "Loaded dataset"
    );
    Ok(records)
}

fn load_csv(path: &Path) -> Result<Vec<RawRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| EngineError::Dataset(format!("failed to open {}: {}", path.display(), e)))?;

    let mut records = Vec::new();
    for (line, row) in reader.deserialize::<RawRecord>().enumerate() {
        let record = row.map_err(|e| {
            EngineError::Dataset(format!("{} row {}: {}", path.display(), line + 2, e))
        })?;
        records.push(record);
    }
    Ok(records)
}

fn load_json_lines(path: &Path) -> Result<Vec<RawRecord>> {
    let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| EngineError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: RawRecord = serde_json::from_str(&line).map_err(|e| {
            EngineError::Dataset(format!("{} line {}: {}", path.display(), idx + 1, e))
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Shuffle with a fixed seed and hold out `test_fraction` of the rows.
///
/// The held-out size is rounded up; at least one row always stays in training.
pub fn train_test_split<T: Clone>(rows: &[T], test_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let n = rows.len();
    let fraction = test_fraction.clamp(0.0, 1.0);
    let mut n_test = (n as f64 * fraction).ceil() as usize;
    if n_test >= n {
        n_test = n.saturating_sub(1);
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));

    let test = indices[..n_test].iter().map(|&i| rows[i].clone()).collect();
    let train = indices[n_test..].iter().map(|&i| rows[i].clone()).collect();
    debug!(train = n - n_test, test = n_test, "Split dataset");
    (train, test)
}
