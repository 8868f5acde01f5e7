//! Anomaly detection for incoming vehicle readings
//!
//! This module provides:
//! - An isolation-forest gate over standardized numeric features
//! - A pre-filter that stops regression on out-of-distribution readings

mod gate;

pub use gate::AnomalyGate;
