//! Emissions Agent - real-time vehicle emissions inference service
//!
//! Loads the committed artifact generation, runs scheduled per-vehicle
//! inference and serves the inference, health and metrics endpoints.

use anyhow::{Context, Result};
use engine_lib::{
    health::{components, HealthRegistry},
    inference::InferenceEngine,
    observability::{EngineMetrics, StructuredLogger},
    scheduler::{InferenceScheduler, ScheduleSettings, ScheduledOutcome},
    ArtifactCache, ArtifactStore,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting emissions-agent");

    let config = config::AgentConfig::load()?;
    let engine_config = &config.engine;
    info!(
        source = %config.source,
        store = %engine_config.store.root.display(),
        port = engine_config.server.port,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::ARTIFACTS).await;
    health_registry.register(components::SCHEDULER).await;
    health_registry.register(components::INFERENCE).await;

    let metrics = EngineMetrics::new();
    let logger = StructuredLogger::new(&config.source);

    let store = ArtifactStore::open(&engine_config.store.root, engine_config.store.generations_to_keep)
        .with_context(|| format!("Failed to open artifact store at {}", engine_config.store.root.display()))?;
    let cache = Arc::new(ArtifactCache::new(store));

    // Serve without a generation; readiness stays false until one loads
    let generation = match cache.get() {
        Ok(set) => {
            metrics.set_generation(&set.generation);
            health_registry.set_generation(Some(set.generation.clone())).await;
            Some(set.generation.clone())
        }
        Err(e) => {
            warn!(error = %e, "No usable artifact generation at startup");
            health_registry
                .set_degraded(components::ARTIFACTS, e.to_string())
                .await;
            None
        }
    };
    logger.log_startup(AGENT_VERSION, generation.as_deref());

    let engine = Arc::new(InferenceEngine::new(
        Arc::clone(&cache),
        engine_config.policy.clone(),
        config.source.clone(),
    ));
    let (scheduler, outcomes) = InferenceScheduler::new(
        Arc::clone(&engine),
        ScheduleSettings::from(&engine_config.scheduler),
    );
    let scheduler = Arc::new(scheduler);

    let app_state = Arc::new(api::AppState {
        health_registry: health_registry.clone(),
        metrics: metrics.clone(),
        engine,
        scheduler: Arc::clone(&scheduler),
        inference_timeout: engine_config.scheduler.inference_timeout(),
    });

    let (shutdown_tx, _) = broadcast::channel(1);
    let scheduler_handle = tokio::spawn(Arc::clone(&scheduler).run(shutdown_tx.subscribe()));
    let outcome_handle = tokio::spawn(track_outcomes(outcomes, health_registry.clone()));
    let api_handle = tokio::spawn(api::serve(engine_config.server.port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            let reason = match result {
                Ok(Ok(())) => "API server stopped".to_string(),
                Ok(Err(e)) => format!("API server failed: {e}"),
                Err(e) => format!("API server task panicked: {e}"),
            };
            logger.log_shutdown(&reason);
        }
    }

    let _ = shutdown_tx.send(());
    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "Scheduler task ended abnormally");
    }
    outcome_handle.abort();
    info!("Shutting down");

    Ok(())
}

/// Reflect scheduled outcomes in component health
async fn track_outcomes(mut outcomes: mpsc::Receiver<ScheduledOutcome>, health: HealthRegistry) {
    while let Some(scheduled) = outcomes.recv().await {
        match (&scheduled.outcome, &scheduled.skipped_reason) {
            (Some(outcome), _) => {
                health.set_healthy(components::SCHEDULER).await;
                health.set_generation(Some(outcome.generation.clone())).await;
            }
            (None, Some(reason)) => {
                health.set_degraded(components::SCHEDULER, reason.clone()).await;
            }
            (None, None) => {}
        }
    }
}
