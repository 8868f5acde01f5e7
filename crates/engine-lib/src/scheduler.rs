//! Per-vehicle inference scheduling loop
//!
//! Buffers readings per vehicle stream and runs the inference engine for
//! each stream at most once per interval, and only when a reading arrived
//! since the last completed attempt. Every call runs on the blocking pool
//! under a timeout; a timeout is reported as a skipped outcome and the
//! stream is retried once the timed-out call has returned.

use crate::config::SchedulerConfig;
use crate::error::{EngineError, Result};
use crate::inference::{InferenceEngine, InferenceOutcome};
use crate::models::RawRecord;
use crate::observability::EngineMetrics;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Readings retained per vehicle (one day at the default cadence)
const MAX_BUFFERED_READINGS: usize = 96;

/// Scheduler timing
#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    /// Minimum time between inferences for one vehicle
    pub interval: Duration,
    /// How often due vehicles are checked
    pub tick: Duration,
    pub inference_timeout: Duration,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for ScheduleSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            interval: config.interval(),
            tick: config.tick(),
            inference_timeout: config.inference_timeout(),
        }
    }
}

#[derive(Debug)]
struct VehicleBuffer {
    readings: Vec<RawRecord>,
    /// Readings received so far, including ones already evicted
    received: u64,
    /// Value of `received` at the last completed attempt
    attempted: u64,
    /// Set while a call for this vehicle runs on the blocking pool
    in_flight: Arc<AtomicBool>,
    last_inference: Option<Instant>,
    last_outcome: Option<InferenceOutcome>,
}

impl VehicleBuffer {
    fn new() -> Self {
        Self {
            readings: Vec::new(),
            received: 0,
            attempted: 0,
            in_flight: Arc::new(AtomicBool::new(false)),
            last_inference: None,
            last_outcome: None,
        }
    }

    fn push(&mut self, reading: RawRecord) {
        self.received += 1;
        self.readings.push(reading);
        if self.readings.len() > MAX_BUFFERED_READINGS {
            self.readings.drain(0..self.readings.len() - MAX_BUFFERED_READINGS);
        }
    }

    fn is_due(&self, interval: Duration) -> bool {
        if self.received == self.attempted || self.in_flight.load(Ordering::Acquire) {
            return false;
        }
        match self.last_inference {
            None => true,
            Some(last) => last.elapsed() >= interval,
        }
    }
}

/// Clears a vehicle's in-flight flag when the blocking call ends, panics included
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Result of one scheduled attempt for a vehicle
#[derive(Debug, Clone)]
pub struct ScheduledOutcome {
    pub vehicle_id: String,
    pub outcome: Option<InferenceOutcome>,
    pub skipped_reason: Option<String>,
    pub duration_us: u64,
}

pub struct InferenceScheduler {
    engine: Arc<InferenceEngine>,
    settings: ScheduleSettings,
    buffers: RwLock<HashMap<String, VehicleBuffer>>,
    outcome_tx: mpsc::Sender<ScheduledOutcome>,
    metrics: EngineMetrics,
}

impl InferenceScheduler {
    pub fn new(
        engine: Arc<InferenceEngine>,
        settings: ScheduleSettings,
    ) -> (Self, mpsc::Receiver<ScheduledOutcome>) {
        let (tx, rx) = mpsc::channel(100);
        let scheduler = Self {
            engine,
            settings,
            buffers: RwLock::new(HashMap::new()),
            outcome_tx: tx,
            metrics: EngineMetrics::new(),
        };
        (scheduler, rx)
    }

    /// Buffer a reading under its vehicle id; readings without one are rejected
    pub async fn submit(&self, reading: RawRecord) -> Result<String> {
        let vehicle_id = reading
            .stream_key()
            .ok_or_else(|| EngineError::Configuration("reading has no vehicle id".to_string()))?
            .to_string();
        let mut buffers = self.buffers.write().await;
        buffers
            .entry(vehicle_id.clone())
            .or_insert_with(VehicleBuffer::new)
            .push(reading);
        Ok(vehicle_id)
    }

    /// Run the scheduling loop until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            tick_secs = self.settings.tick.as_secs(),
            timeout_ms = self.settings.inference_timeout.as_millis() as u64,
            "Starting inference scheduler"
        );

        let mut ticker = interval(self.settings.tick);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_due().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down inference scheduler");
                    break;
                }
            }
        }
    }

    async fn run_due(&self) {
        let vehicle_ids: Vec<String> = {
            let buffers = self.buffers.read().await;
            buffers.keys().cloned().collect()
        };

        for vehicle_id in vehicle_ids {
            self.infer_vehicle(&vehicle_id).await;
        }
    }

    /// Infer the latest reading of one vehicle if it is due
    async fn infer_vehicle(&self, vehicle_id: &str) {
        let start = Instant::now();

        let (latest, received, in_flight) = {
            let buffers = self.buffers.read().await;
            match buffers.get(vehicle_id) {
                Some(buffer) if buffer.is_due(self.settings.interval) => (
                    buffer.readings.last().cloned(),
                    buffer.received,
                    Arc::clone(&buffer.in_flight),
                ),
                _ => return,
            }
        };

        let Some(reading) = latest else {
            self.emit(vehicle_id, None, Some("No buffered readings".to_string()), start)
                .await;
            return;
        };

        if in_flight.swap(true, Ordering::AcqRel) {
            return;
        }
        let engine = Arc::clone(&self.engine);
        let call = tokio::task::spawn_blocking(move || {
            let _guard = InFlightGuard(in_flight);
            engine.infer(&reading)
        });
        let attempt = tokio::time::timeout(self.settings.inference_timeout, call).await;

        let (outcome, skipped_reason, completed) = match attempt {
            Ok(Ok(Ok(outcome))) => (Some(outcome), None, true),
            Ok(Ok(Err(e))) => {
                warn!(vehicle = %vehicle_id, error = %e, "Scheduled inference failed");
                (None, Some(e.to_string()), !e.is_transient())
            }
            Ok(Err(join_error)) => {
                warn!(vehicle = %vehicle_id, error = %join_error, "Inference task failed");
                self.metrics.inc_inference_errors();
                (None, Some(format!("Inference task failed: {join_error}")), true)
            }
            Err(_) => {
                let err = EngineError::Timeout(self.settings.inference_timeout);
                warn!(vehicle = %vehicle_id, error = %err, "Inference timeout");
                self.metrics.inc_inference_timeouts();
                (None, Some(err.to_string()), false)
            }
        };

        if completed {
            let mut buffers = self.buffers.write().await;
            if let Some(buffer) = buffers.get_mut(vehicle_id) {
                buffer.attempted = received;
                buffer.last_inference = Some(Instant::now());
                if outcome.is_some() {
                    buffer.last_outcome = outcome.clone();
                }
            }
        }

        self.emit(vehicle_id, outcome, skipped_reason, start).await;
    }

    async fn emit(
        &self,
        vehicle_id: &str,
        outcome: Option<InferenceOutcome>,
        skipped_reason: Option<String>,
        start: Instant,
    ) {
        let result = ScheduledOutcome {
            vehicle_id: vehicle_id.to_string(),
            outcome,
            skipped_reason,
            duration_us: start.elapsed().as_micros() as u64,
        };
        debug!(
            vehicle = %vehicle_id,
            duration_us = result.duration_us,
            has_outcome = result.outcome.is_some(),
            "Scheduled inference completed"
        );
        let _ = self.outcome_tx.send(result).await;
    }

    /// Most recent successful outcome for a vehicle
    pub async fn last_outcome(&self, vehicle_id: &str) -> Option<InferenceOutcome> {
        let buffers = self.buffers.read().await;
        buffers.get(vehicle_id).and_then(|b| b.last_outcome.clone())
    }

    pub async fn stats(&self) -> SchedulerStats {
        let buffers = self.buffers.read().await;
        SchedulerStats {
            total_vehicles: buffers.len(),
            vehicles_with_outcomes: buffers.values().filter(|b| b.last_outcome.is_some()).count(),
            buffered_readings: buffers.values().map(|b| b.readings.len()).sum(),
        }
    }

    /// Drop a vehicle's buffer; false when the vehicle was unknown
    pub async fn remove_vehicle(&self, vehicle_id: &str) -> bool {
        let mut buffers = self.buffers.write().await;
        buffers.remove(vehicle_id).is_some()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerStats {
    pub total_vehicles: usize,
    pub vehicles_with_outcomes: usize,
    pub buffered_readings: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Thresholds;
    use crate::store::{ArtifactCache, ArtifactStore};
    use tempfile::TempDir;

    fn reading(vehicle: &str) -> RawRecord {
        RawRecord {
            car_id: Some(vehicle.to_string()),
            engine_size_cm3: 1200.0.into(),
            power_ps: 90.0.into(),
            fuel_type: Some("Petrol".to_string()),
            ..Default::default()
        }
    }

    fn empty_engine(dir: &TempDir) -> Arc<InferenceEngine> {
        let store = ArtifactStore::open(dir.path(), 5).unwrap();
        let cache = Arc::new(ArtifactCache::new(store));
        Arc::new(InferenceEngine::new(cache, Thresholds::default(), "test"))
    }

    #[tokio::test]
    async fn test_submit_buffers_by_vehicle() {
        let dir = TempDir::new().unwrap();
        let (scheduler, _rx) = InferenceScheduler::new(empty_engine(&dir), ScheduleSettings::default());

        scheduler.submit(reading("car-1")).await.unwrap();
        scheduler.submit(reading("car-1")).await.unwrap();
        scheduler.submit(reading("car-2")).await.unwrap();

        let stats = scheduler.stats().await;
        assert_eq!(stats.total_vehicles, 2);
        assert_eq!(stats.buffered_readings, 3);
    }

    #[tokio::test]
    async fn test_submit_without_vehicle_id_rejected() {
        let dir = TempDir::new().unwrap();
        let (scheduler, _rx) = InferenceScheduler::new(empty_engine(&dir), ScheduleSettings::default());
        let err = scheduler.submit(RawRecord::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_buffer_is_bounded() {
        let dir = TempDir::new().unwrap();
        let (scheduler, _rx) = InferenceScheduler::new(empty_engine(&dir), ScheduleSettings::default());
        for _ in 0..(MAX_BUFFERED_READINGS + 10) {
            scheduler.submit(reading("car-1")).await.unwrap();
        }
        assert_eq!(scheduler.stats().await.buffered_readings, MAX_BUFFERED_READINGS);
    }

    #[tokio::test]
    async fn test_missing_artifacts_reported_as_skipped() {
        let dir = TempDir::new().unwrap();
        let (scheduler, mut rx) = InferenceScheduler::new(empty_engine(&dir), ScheduleSettings::default());
        scheduler.submit(reading("car-1")).await.unwrap();

        scheduler.infer_vehicle("car-1").await;

        let result = rx.try_recv().unwrap();
        assert_eq!(result.vehicle_id, "car-1");
        assert!(result.outcome.is_none());
        assert!(result.skipped_reason.unwrap().contains("not found"));
        assert!(scheduler.last_outcome("car-1").await.is_none());
    }

    #[tokio::test]
    async fn test_not_due_vehicle_is_skipped_silently() {
        let dir = TempDir::new().unwrap();
        let (scheduler, mut rx) = InferenceScheduler::new(empty_engine(&dir), ScheduleSettings::default());
        scheduler.submit(reading("car-1")).await.unwrap();

        // Fatal failure counts as an attempt; the next call is inside the interval
        scheduler.infer_vehicle("car-1").await;
        let _ = rx.try_recv().unwrap();
        scheduler.infer_vehicle("car-1").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove_vehicle() {
        let dir = TempDir::new().unwrap();
        let (scheduler, _rx) = InferenceScheduler::new(empty_engine(&dir), ScheduleSettings::default());
        scheduler.submit(reading("car-1")).await.unwrap();
        assert_eq!(scheduler.stats().await.total_vehicles, 1);
        assert!(scheduler.remove_vehicle("car-1").await);
        assert_eq!(scheduler.stats().await.total_vehicles, 0);
        assert!(!scheduler.remove_vehicle("car-1").await);
    }

    #[tokio::test]
    async fn test_vehicle_without_new_reading_is_not_reinferred() {
        let dir = TempDir::new().unwrap();
        let settings = ScheduleSettings {
            interval: Duration::ZERO,
            ..ScheduleSettings::default()
        };
        let (scheduler, mut rx) = InferenceScheduler::new(empty_engine(&dir), settings);
        scheduler.submit(reading("car-1")).await.unwrap();

        scheduler.infer_vehicle("car-1").await;
        assert!(rx.try_recv().is_ok());

        // Interval has elapsed but nothing new arrived
        scheduler.infer_vehicle("car-1").await;
        assert!(rx.try_recv().is_err());

        scheduler.submit(reading("car-1")).await.unwrap();
        scheduler.infer_vehicle("car-1").await;
        assert_eq!(rx.try_recv().unwrap().vehicle_id, "car-1");
    }

    #[tokio::test]
    async fn test_vehicle_with_call_in_flight_is_skipped() {
        let dir = TempDir::new().unwrap();
        let settings = ScheduleSettings {
            interval: Duration::ZERO,
            ..ScheduleSettings::default()
        };
        let (scheduler, mut rx) = InferenceScheduler::new(empty_engine(&dir), settings);
        scheduler.submit(reading("car-1")).await.unwrap();

        let in_flight = {
            let buffers = scheduler.buffers.read().await;
            Arc::clone(&buffers["car-1"].in_flight)
        };
        in_flight.store(true, Ordering::Release);
        scheduler.infer_vehicle("car-1").await;
        assert!(rx.try_recv().is_err());

        in_flight.store(false, Ordering::Release);
        scheduler.infer_vehicle("car-1").await;
        assert!(rx.try_recv().is_ok());
    }
}
