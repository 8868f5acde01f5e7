//! Generation metadata: manifest, hyperparameter record and ids

use crate::learners::BoosterParams;
use crate::training::EvaluationReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a generation came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationOrigin {
    Training,
    IncrementalUpdate,
}

impl std::fmt::Display for GenerationOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationOrigin::Training => write!(f, "training"),
            GenerationOrigin::IncrementalUpdate => write!(f, "incremental_update"),
        }
    }
}

/// Written last into every committed generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationManifest {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub parent: Option<String>,
    pub origin: GenerationOrigin,
    /// Artifact file name -> hex SHA-256 of its bytes
    pub checksums: BTreeMap<String, String>,
    #[serde(default)]
    pub evaluation: Option<EvaluationReport>,
}

/// Everything needed to continue boosting the regressor without a new search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterRecord {
    pub params: BoosterParams,
    /// Rounds selected by cross-validation for the initial fit
    pub num_boost_round: usize,
    pub cv_rmse: Option<f64>,
    /// Position of the winning point in grid iteration order
    pub grid_index: Option<usize>,
    /// SHA-256 of the transform the regressor was trained against
    pub transform_checksum: String,
    pub trained_at: DateTime<Utc>,
    /// Rounds appended by incremental updates since the initial fit
    #[serde(default)]
    pub incremental_rounds: usize,
}

impl HyperparameterRecord {
    pub fn total_rounds(&self) -> usize {
        self.num_boost_round + self.incremental_rounds
    }
}

/// Generation ids look like `g20250101120000-0003`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct GenerationId {
    stamp: String,
    seq: u32,
}

impl GenerationId {
    pub(crate) fn parse(id: &str) -> Option<Self> {
        let (stamp, seq) = id.strip_prefix('g')?.split_once('-')?;
        if stamp.len() != 14 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            stamp: stamp.to_string(),
            seq: seq.parse().ok()?,
        })
    }

    /// Next id after `latest`, stamped with `now` unless the clock went backwards
    pub(crate) fn next(now: DateTime<Utc>, latest: Option<&GenerationId>) -> Self {
        let stamp = now.format("%Y%m%d%H%M%S").to_string();
        match latest {
            Some(latest) if latest.stamp >= stamp => Self {
                stamp: latest.stamp.clone(),
                seq: latest.seq + 1,
            },
            _ => Self { stamp, seq: 0 },
        }
    }
}

impl std::fmt::Display for GenerationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}-{:04}", self.stamp, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generation_id_parse_and_format() {
        let id = GenerationId::parse("g20250102030405-0007").unwrap();
        assert_eq!(id.to_string(), "g20250102030405-0007");
        assert!(GenerationId::parse("x20250102030405-0007").is_none());
        assert!(GenerationId::parse("g2025-0007").is_none());
        assert!(GenerationId::parse(".staging-g20250102030405-0007").is_none());
    }

    #[test]
    fn test_generation_ids_increase() {
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let first = GenerationId::next(now, None);
        let second = GenerationId::next(now, Some(&first));
        assert!(second > first);
        assert!(second.to_string() > first.to_string());

        let earlier = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap();
        let third = GenerationId::next(earlier, Some(&second));
        assert!(third > second);

        let later = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 6).unwrap();
        let fourth = GenerationId::next(later, Some(&third));
        assert_eq!(fourth.to_string(), "g20250102030406-0000");
    }

    #[test]
    fn test_hyperparameter_record_defaults_incremental_rounds() {
        let json = r#"{
            "params": {"eta": 0.1, "max_depth": 6, "subsample": 0.9, "colsample_bytree": 0.8},
            "num_boost_round": 37,
            "cv_rmse": 4.2,
            "grid_index": 20,
            "transform_checksum": "abc",
            "trained_at": "2025-01-02T03:04:05Z"
        }"#;
        let record: HyperparameterRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.incremental_rounds, 0);
        assert_eq!(record.total_rounds(), 37);
        assert_eq!(record.params.lambda, 1.0);
    }
}
