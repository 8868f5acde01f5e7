//! Vehicle emissions predictive engine
//!
//! This crate provides the core functionality for:
//! - Cleaning and feature transformation of vehicle readings
//! - CO2 regression with grid-searched gradient boosting and incremental updates
//! - Anomaly gating and maintenance estimation
//! - The decision policy and the real-time inference orchestrator
//! - A versioned artifact store with atomic generation swaps
//! - Health checks and observability

pub mod anomaly;
pub mod config;
pub mod error;
pub mod health;
pub mod inference;
pub mod learners;
pub mod maintenance;
pub mod models;
pub mod observability;
pub mod policy;
pub mod preprocess;
pub mod scheduler;
pub mod store;
pub mod training;
pub mod transform;

pub use config::EngineConfig;
pub use error::{ArtifactKind, EngineError, Result};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse};
pub use inference::{infer, infer_from_store, InferenceEngine, InferenceOutcome};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use policy::{decide, Thresholds};
pub use store::{ArtifactCache, ArtifactSet, ArtifactStore};
pub use training::{evaluate, incremental_update, EvaluationReport, TrainingPipeline};
