//! Error taxonomy for training, persistence and inference

use std::path::PathBuf;
use thiserror::Error;

/// Which persisted artifact an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Transform,
    Regressor,
    AnomalyGate,
    MaintenanceEstimator,
    Hyperparameters,
    Manifest,
    /// The `CURRENT` pointer naming the committed generation
    CurrentPointer,
}

impl ArtifactKind {
    /// File name of the artifact inside a generation directory
    pub fn file_name(&self) -> &'static str {
        match self {
            ArtifactKind::Transform => "transform.json",
            ArtifactKind::Regressor => "regressor.json",
            ArtifactKind::AnomalyGate => "anomaly_gate.json",
            ArtifactKind::MaintenanceEstimator => "maintenance.json",
            ArtifactKind::Hyperparameters => "hyperparameters.json",
            ArtifactKind::Manifest => "manifest.json",
            ArtifactKind::CurrentPointer => "CURRENT",
        }
    }

    /// The artifacts every committed generation must contain
    pub const REQUIRED: [ArtifactKind; 5] = [
        ArtifactKind::Transform,
        ArtifactKind::Regressor,
        ArtifactKind::AnomalyGate,
        ArtifactKind::MaintenanceEstimator,
        ArtifactKind::Hyperparameters,
    ];
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Transform => write!(f, "feature transform"),
            ArtifactKind::Regressor => write!(f, "co2 regressor"),
            ArtifactKind::AnomalyGate => write!(f, "anomaly gate"),
            ArtifactKind::MaintenanceEstimator => write!(f, "maintenance estimator"),
            ArtifactKind::Hyperparameters => write!(f, "hyperparameter record"),
            ArtifactKind::Manifest => write!(f, "generation manifest"),
            ArtifactKind::CurrentPointer => write!(f, "current generation pointer"),
        }
    }
}

/// Errors surfaced by the engine library
#[derive(Debug, Error)]
pub enum EngineError {
    /// Training input missing or empty; raised before any artifact is touched
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{artifact} not found at {}", path.display())]
    ArtifactMissing { artifact: ArtifactKind, path: PathBuf },

    /// New data cannot be projected through the persisted feature transform
    #[error("stale feature transform: {0}")]
    StaleTransform(String),

    #[error("{artifact} is corrupt: {reason}")]
    Corrupt { artifact: ArtifactKind, reason: String },

    #[error("another writer holds the artifact store lock at {}", .0.display())]
    WriterBusy(PathBuf),

    #[error("inference timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A non-anomalous decision was requested without both predictions
    #[error("incomplete prediction: {0}")]
    IncompletePrediction(&'static str),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("dataset error: {0}")]
    Dataset(String),
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Transient failures may be retried by the caller; everything else is fatal for the call
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Timeout(_) | EngineError::WriterBusy(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
