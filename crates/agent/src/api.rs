//! HTTP API: health checks, Prometheus metrics and inference endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use engine_lib::{
    health::{components, ComponentStatus, HealthRegistry},
    inference::{InferenceEngine, InferenceOutcome},
    observability::EngineMetrics,
    scheduler::InferenceScheduler,
    EngineError, RawRecord,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: EngineMetrics,
    pub engine: Arc<InferenceEngine>,
    pub scheduler: Arc<InferenceScheduler>,
    pub inference_timeout: Duration,
}

/// Engine error mapped onto an HTTP status
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Configuration(_) | EngineError::Dataset(_) => StatusCode::BAD_REQUEST,
            EngineError::ArtifactMissing { .. } | EngineError::WriterBusy(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "error": self.0.to_string(),
            "transient": self.0.is_transient(),
        });
        (status, Json(body)).into_response()
    }
}

/// Health check response - returns 200 if operational, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

/// Readiness check response - returns 200 once a generation is loaded
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Run one reading through the engine immediately
async fn infer(
    State(state): State<Arc<AppState>>,
    Json(record): Json<RawRecord>,
) -> Result<Json<InferenceOutcome>, ApiError> {
    let engine = Arc::clone(&state.engine);
    let call = tokio::task::spawn_blocking(move || engine.infer(&record));

    match tokio::time::timeout(state.inference_timeout, call).await {
        Ok(Ok(Ok(outcome))) => {
            state.health_registry.set_healthy(components::INFERENCE).await;
            state
                .health_registry
                .set_generation(Some(outcome.generation.clone()))
                .await;
            Ok(Json(outcome))
        }
        Ok(Ok(Err(e))) => {
            if matches!(e, EngineError::Corrupt { .. } | EngineError::StaleTransform(_)) {
                state
                    .health_registry
                    .set_unhealthy(components::ARTIFACTS, e.to_string())
                    .await;
            }
            Err(e.into())
        }
        Ok(Err(join_error)) => {
            warn!(error = %join_error, "Inference task failed");
            state.metrics.inc_inference_errors();
            Err(ApiError(EngineError::Configuration(format!(
                "inference task failed: {join_error}"
            ))))
        }
        Err(_) => {
            state.metrics.inc_inference_timeouts();
            state
                .health_registry
                .set_degraded(components::INFERENCE, "inference timed out")
                .await;
            Err(EngineError::Timeout(state.inference_timeout).into())
        }
    }
}

/// Buffer a telemetry reading for scheduled inference
async fn submit_reading(
    State(state): State<Arc<AppState>>,
    Json(record): Json<RawRecord>,
) -> Result<impl IntoResponse, ApiError> {
    let vehicle_id = state.scheduler.submit(record).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "vehicle_id": vehicle_id }))))
}

/// Latest scheduled outcome for one vehicle
async fn vehicle_outcome(State(state): State<Arc<AppState>>, Path(vehicle_id): Path<String>) -> Response {
    match state.scheduler.last_outcome(&vehicle_id).await {
        Some(outcome) => Json(outcome).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no outcome for vehicle {vehicle_id}") })),
        )
            .into_response(),
    }
}

/// Stop tracking a vehicle stream and drop its buffered readings
async fn remove_vehicle(State(state): State<Arc<AppState>>, Path(vehicle_id): Path<String>) -> Response {
    if state.scheduler.remove_vehicle(&vehicle_id).await {
        info!(vehicle = %vehicle_id, "Vehicle removed from scheduler");
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown vehicle {vehicle_id}") })),
        )
            .into_response()
    }
}

async fn scheduler_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scheduler.stats().await)
}

/// Drop the cached generation and load whatever `CURRENT` names now
async fn reload(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let cache = Arc::clone(state.engine.cache());
    cache.invalidate();
    let loaded = tokio::task::spawn_blocking(move || cache.get())
        .await
        .map_err(|e| ApiError(EngineError::Configuration(format!("reload task failed: {e}"))))?;

    match loaded {
        Ok(set) => {
            info!(generation = %set.generation, "Artifacts reloaded");
            state.metrics.set_generation(&set.generation);
            state.health_registry.set_healthy(components::ARTIFACTS).await;
            state
                .health_registry
                .set_generation(Some(set.generation.clone()))
                .await;
            Ok(Json(json!({ "generation": set.generation })))
        }
        Err(e) => {
            warn!(error = %e, "Artifact reload failed");
            state
                .health_registry
                .set_unhealthy(components::ARTIFACTS, e.to_string())
                .await;
            state.health_registry.set_generation(None).await;
            Err(e.into())
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/infer", post(infer))
        .route("/v1/readings", post(submit_reading))
        .route("/v1/vehicles/:vehicle_id", get(vehicle_outcome).delete(remove_vehicle))
        .route("/v1/scheduler", get(scheduler_stats))
        .route("/v1/reload", post(reload))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
