//! Feature transform
//!
//! Maps a cleaned reading to a fixed-width numeric vector: standardized
//! numeric columns first, then one one-hot block per categorical column.
//! The layout is fixed at fit time. Categories never seen during fit encode
//! as an all-zero block.

use crate::error::{EngineError, Result};
use crate::learners::FeatureMatrix;
use crate::models::VehicleReading;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Range;

/// Layout version written into every persisted transform
pub const TRANSFORM_SCHEMA_VERSION: u32 = 1;

/// Numeric input columns, in output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericColumn {
    EngineSizeCm3,
    PowerPs,
}

impl NumericColumn {
    pub const ALL: [NumericColumn; 2] = [NumericColumn::EngineSizeCm3, NumericColumn::PowerPs];

    pub fn name(&self) -> &'static str {
        match self {
            NumericColumn::EngineSizeCm3 => "engine_size_cm3",
            NumericColumn::PowerPs => "power_ps",
        }
    }

    fn value(&self, reading: &VehicleReading) -> f64 {
        match self {
            NumericColumn::EngineSizeCm3 => reading.engine_size_cm3,
            NumericColumn::PowerPs => reading.power_ps,
        }
    }
}

/// Categorical input columns, in output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalColumn {
    FuelType,
    TransmissionType,
    Manufacturer,
}

impl CategoricalColumn {
    pub const ALL: [CategoricalColumn; 3] = [
        CategoricalColumn::FuelType,
        CategoricalColumn::TransmissionType,
        CategoricalColumn::Manufacturer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CategoricalColumn::FuelType => "fuel_type",
            CategoricalColumn::TransmissionType => "transmission_type",
            CategoricalColumn::Manufacturer => "manufacturer",
        }
    }

    fn value<'a>(&self, reading: &'a VehicleReading) -> &'a str {
        match self {
            CategoricalColumn::FuelType => &reading.fuel_type,
            CategoricalColumn::TransmissionType => &reading.transmission_type,
            CategoricalColumn::Manufacturer => &reading.manufacturer,
        }
    }
}

/// Zero-mean, unit-variance scaling fixed at fit time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub column: NumericColumn,
    pub mean: f64,
    /// Population standard deviation; 1.0 for a constant column
    pub scale: f64,
}

impl StandardScaler {
    fn fit(column: NumericColumn, readings: &[VehicleReading]) -> Self {
        let n = readings.len() as f64;
        let mean = readings.iter().map(|r| column.value(r)).sum::<f64>() / n;
        let var = readings
            .iter()
            .map(|r| (column.value(r) - mean).powi(2))
            .sum::<f64>()
            / n;
        let std = var.sqrt();
        Self {
            column,
            mean,
            scale: if std > f64::EPSILON { std } else { 1.0 },
        }
    }

    fn apply(&self, reading: &VehicleReading) -> f64 {
        (self.column.value(reading) - self.mean) / self.scale
    }
}

/// One-hot encoding over the sorted categories seen at fit time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    pub column: CategoricalColumn,
    pub categories: Vec<String>,
}

impl OneHotEncoder {
    fn fit(column: CategoricalColumn, readings: &[VehicleReading]) -> Self {
        let categories: BTreeSet<&str> = readings.iter().map(|r| column.value(r)).collect();
        Self {
            column,
            categories: categories.into_iter().map(str::to_string).collect(),
        }
    }

    fn write(&self, reading: &VehicleReading, out: &mut [f64]) {
        out.iter_mut().for_each(|v| *v = 0.0);
        if let Ok(idx) = self
            .categories
            .binary_search_by(|c| c.as_str().cmp(self.column.value(reading)))
        {
            out[idx] = 1.0;
        }
    }
}

/// Fitted feature transform shared by every downstream model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTransform {
    pub schema_version: u32,
    pub numeric: Vec<StandardScaler>,
    pub categorical: Vec<OneHotEncoder>,
    pub fitted_rows: usize,
}

impl FeatureTransform {
    /// Fit scaling and category vocabularies on a cleaned batch
    pub fn fit(readings: &[VehicleReading]) -> Result<Self> {
        if readings.is_empty() {
            return Err(EngineError::Configuration(
                "cannot fit feature transform on an empty batch".to_string(),
            ));
        }

        Ok(Self {
            schema_version: TRANSFORM_SCHEMA_VERSION,
            numeric: NumericColumn::ALL
                .iter()
                .map(|c| StandardScaler::fit(*c, readings))
                .collect(),
            categorical: CategoricalColumn::ALL
                .iter()
                .map(|c| OneHotEncoder::fit(*c, readings))
                .collect(),
            fitted_rows: readings.len(),
        })
    }

    /// Check a deserialized transform can be applied by this build
    pub fn validate(&self) -> Result<()> {
        if self.schema_version != TRANSFORM_SCHEMA_VERSION {
            return Err(EngineError::StaleTransform(format!(
                "transform schema version {} does not match supported version {}",
                self.schema_version, TRANSFORM_SCHEMA_VERSION
            )));
        }
        let numeric: Vec<_> = self.numeric.iter().map(|s| s.column).collect();
        let categorical: Vec<_> = self.categorical.iter().map(|e| e.column).collect();
        if numeric != NumericColumn::ALL || categorical != CategoricalColumn::ALL {
            return Err(EngineError::StaleTransform(
                "transform column layout does not match the reading schema".to_string(),
            ));
        }
        if let Some(bad) = self
            .numeric
            .iter()
            .find(|s| !s.mean.is_finite() || !s.scale.is_finite() || s.scale <= 0.0)
        {
            return Err(EngineError::StaleTransform(format!(
                "invalid scaling parameters for {}",
                bad.column.name()
            )));
        }
        if let Some(bad) = self
            .categorical
            .iter()
            .find(|e| e.categories.windows(2).any(|w| w[0] >= w[1]))
        {
            return Err(EngineError::StaleTransform(format!(
                "categories for {} are not sorted and unique",
                bad.column.name()
            )));
        }
        Ok(())
    }

    /// Width of the full projection
    pub fn width(&self) -> usize {
        self.numeric_width() + self.categorical.iter().map(|e| e.categories.len()).sum::<usize>()
    }

    /// Width of the numeric-only projection used by the anomaly gate
    pub fn numeric_width(&self) -> usize {
        self.numeric.len()
    }

    /// Output slots occupied by a categorical column
    pub fn slot_range(&self, column: CategoricalColumn) -> Option<Range<usize>> {
        let mut start = self.numeric_width();
        for encoder in &self.categorical {
            let end = start + encoder.categories.len();
            if encoder.column == column {
                return Some(start..end);
            }
            start = end;
        }
        None
    }

    /// Full projection of one reading
    pub fn apply(&self, reading: &VehicleReading) -> Vec<f64> {
        let mut out = vec![0.0; self.width()];
        for (slot, scaler) in out.iter_mut().zip(&self.numeric) {
            *slot = scaler.apply(reading);
        }
        let mut start = self.numeric_width();
        for encoder in &self.categorical {
            let end = start + encoder.categories.len();
            encoder.write(reading, &mut out[start..end]);
            start = end;
        }
        out
    }

    /// Numeric-only projection of one reading
    pub fn apply_numeric(&self, reading: &VehicleReading) -> Vec<f64> {
        self.numeric.iter().map(|s| s.apply(reading)).collect()
    }

    pub fn apply_batch(&self, readings: &[VehicleReading]) -> FeatureMatrix {
        let mut matrix = FeatureMatrix::with_capacity(self.width(), readings.len());
        for reading in readings {
            matrix.push_row(&self.apply(reading));
        }
        matrix
    }

    pub fn apply_numeric_batch(&self, readings: &[VehicleReading]) -> FeatureMatrix {
        let mut matrix = FeatureMatrix::with_capacity(self.numeric_width(), readings.len());
        for reading in readings {
            matrix.push_row(&self.apply_numeric(reading));
        }
        matrix
    }

    /// Output column names, e.g. `num__power_ps`, `cat__fuel_type_Diesel`
    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .numeric
            .iter()
            .map(|s| format!("num__{}", s.column.name()))
            .collect();
        for encoder in &self.categorical {
            for category in &encoder.categories {
                names.push(format!("cat__{}_{}", encoder.column.name(), category));
            }
        }
        names
    }
}
