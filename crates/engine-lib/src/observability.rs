//! Observability for the emissions engine
//!
//! Provides:
//! - Prometheus metrics (inference latency, action counters, active generation)
//! - Structured logging of pipeline events with tracing

use crate::models::{Action, InferenceResult};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    GaugeVec, Histogram, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for inference latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00005, 0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5, 1.0, 2.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    inference_latency_seconds: Histogram,
    inferences: IntCounterVec,
    anomalies_flagged: IntCounter,
    non_compliance_alerts: IntCounter,
    maintenance_notices: IntCounter,
    inference_errors: IntCounter,
    inference_timeouts: IntCounter,
    rows_dropped: IntCounter,
    generation_info: GaugeVec,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            inference_latency_seconds: register_histogram!(
                "emissions_inference_latency_seconds",
                "Time spent in one transform, gate, predict and decide pass",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register inference_latency_seconds"),

            inferences: register_int_counter_vec!(
                "emissions_inferences_total",
                "Completed inferences by resulting action",
                &["action"]
            )
            .expect("Failed to register inferences_total"),

            anomalies_flagged: register_int_counter!(
                "emissions_anomalies_flagged_total",
                "Readings short-circuited by the anomaly gate"
            )
            .expect("Failed to register anomalies_flagged_total"),

            non_compliance_alerts: register_int_counter!(
                "emissions_non_compliance_alerts_total",
                "Predictions above the fuel-type compliance limit"
            )
            .expect("Failed to register non_compliance_alerts_total"),

            maintenance_notices: register_int_counter!(
                "emissions_maintenance_notices_total",
                "Maintenance notices issued"
            )
            .expect("Failed to register maintenance_notices_total"),

            inference_errors: register_int_counter!(
                "emissions_inference_errors_total",
                "Inference calls that failed"
            )
            .expect("Failed to register inference_errors_total"),

            inference_timeouts: register_int_counter!(
                "emissions_inference_timeouts_total",
                "Inference calls abandoned after the configured timeout"
            )
            .expect("Failed to register inference_timeouts_total"),

            rows_dropped: register_int_counter!(
                "emissions_training_rows_dropped_total",
                "Training rows dropped for a missing target"
            )
            .expect("Failed to register training_rows_dropped_total"),

            generation_info: register_gauge_vec!(
                "emissions_artifact_generation_info",
                "Currently active artifact generation",
                &["generation"]
            )
            .expect("Failed to register artifact_generation_info"),
        }
    }
}

/// Handle to the global engine metrics; clones share the same series
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new)
    }

    pub fn observe_inference_latency(&self, duration_secs: f64) {
        self.inner().inference_latency_seconds.observe(duration_secs);
    }

    /// Count one completed inference under its action
    pub fn record_result(&self, result: &InferenceResult) {
        let inner = self.inner();
        inner
            .inferences
            .with_label_values(&[result.action().label()])
            .inc();
        match result.action() {
            Action::ManualInspection => inner.anomalies_flagged.inc(),
            Action::NonComplianceAlert { .. } => inner.non_compliance_alerts.inc(),
            Action::MaintenanceNotice { .. } => inner.maintenance_notices.inc(),
            Action::Ok => {}
        }
    }

    pub fn inc_inference_errors(&self) {
        self.inner().inference_errors.inc();
    }

    pub fn inc_inference_timeouts(&self) {
        self.inner().inference_timeouts.inc();
    }

    pub fn add_rows_dropped(&self, rows: usize) {
        self.inner().rows_dropped.inc_by(rows as u64);
    }

    pub fn set_generation(&self, generation: &str) {
        self.inner().generation_info.reset();
        self.inner()
            .generation_info
            .with_label_values(&[generation])
            .set(1.0);
    }

    pub fn anomalies_flagged(&self) -> u64 {
        self.inner().anomalies_flagged.get()
    }
}

/// Fixed-schema events for pipeline milestones
#[derive(Clone)]
pub struct StructuredLogger {
    source: String,
}

impl StructuredLogger {
    /// `source` names the emitting process, e.g. the agent host or `cli`
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn log_inference(&self, vehicle: Option<&str>, generation: &str, result: &InferenceResult, latency_ms: f64) {
        let vehicle = vehicle.unwrap_or("-");
        info!(
            event = "inference_completed",
            source = %self.source,
            vehicle = %vehicle,
            generation = %generation,
            anomaly = result.is_anomaly(),
            predicted_co2 = ?result.predicted_co2(),
            maintenance_days = ?result.maintenance_days(),
            action = result.action().label(),
            latency_ms = latency_ms,
            "Inference completed"
        );

        match result.action() {
            Action::ManualInspection => warn!(
                event = "anomaly_flagged",
                source = %self.source,
                vehicle = %vehicle,
                generation = %generation,
                "Reading outside the training distribution, manual inspection requested"
            ),
            Action::NonComplianceAlert { predicted_co2, limit } => warn!(
                event = "non_compliance_alert",
                source = %self.source,
                vehicle = %vehicle,
                predicted_co2 = predicted_co2,
                limit = limit,
                "Predicted CO2 above compliance limit"
            ),
            Action::MaintenanceNotice { days } => info!(
                event = "maintenance_notice",
                source = %self.source,
                vehicle = %vehicle,
                days = days,
                "Maintenance recommended"
            ),
            Action::Ok => {}
        }
    }

    /// Rows without a target dropped from a training batch
    pub fn log_rows_dropped(&self, dropped: usize, kept: usize) {
        warn!(
            event = "rows_dropped_missing_target",
            source = %self.source,
            dropped = dropped,
            kept = kept,
            "Dropped training rows with missing CO2 target"
        );
    }

    pub fn log_training_completed(&self, generation: &str, rows: usize, rounds: usize, cv_rmse: Option<f64>) {
        info!(
            event = "training_completed",
            source = %self.source,
            generation = %generation,
            rows = rows,
            rounds = rounds,
            cv_rmse = ?cv_rmse,
            "Training completed"
        );
    }

    pub fn log_generation_committed(&self, generation: &str, parent: Option<&str>, origin: &str) {
        info!(
            event = "generation_committed",
            source = %self.source,
            generation = %generation,
            parent = ?parent,
            origin = %origin,
            "Artifact generation committed"
        );
    }

    pub fn log_startup(&self, version: &str, generation: Option<&str>) {
        info!(
            event = "agent_started",
            source = %self.source,
            agent_version = %version,
            generation = ?generation,
            "Emissions agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            source = %self.source,
            reason = %reason,
            "Emissions agent shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_record_actions() {
        let metrics = EngineMetrics::new();
        let before = metrics.anomalies_flagged();
        metrics.observe_inference_latency(0.0004);
        metrics.record_result(&InferenceResult::Anomaly {
            action: Action::ManualInspection,
        });
        metrics.record_result(&InferenceResult::Full {
            predicted_co2: 120.0,
            maintenance_days: 90,
            action: Action::Ok,
        });
        metrics.set_generation("g20250101000000-0000");
        metrics.add_rows_dropped(3);
        assert!(metrics.anomalies_flagged() > before);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-host");
        assert_eq!(logger.source, "test-host");
        logger.log_rows_dropped(2, 98);
    }
}
