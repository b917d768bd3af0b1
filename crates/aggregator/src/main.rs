//! Prediction aggregator
//!
//! Consumes vehicle monitor results and inference responses from the message
//! bus and publishes predicted trip updates.

use aggregator_lib::{
    bus::{InMemoryBus, MessageBus},
    engine::{run_sweeper, AggregatorEngine, BusPublisher, EngineParts, Listeners},
    health::{components, HealthRegistry},
    holiday::FixedHolidayCalendar,
    observability::StructuredLogger,
    registry::{ModelRegistry, StaticModelRegistry},
    schedule::StaticScheduleProvider,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGGREGATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting prediction-aggregator");

    let config = config::AggregatorConfig::load()?;
    info!(instance = %config.instance, api_port = config.api_port, "Aggregator configured");

    let schedule = match &config.schedule_file {
        Some(path) => StaticScheduleProvider::from_json_file(path)?,
        None => StaticScheduleProvider::default(),
    };
    let models = match &config.models_file {
        Some(path) => StaticModelRegistry::from_json_file(path)?,
        None => StaticModelRegistry::default(),
    };
    let model_count = models.current_models().len();
    let trip_count = schedule.len();
    let holidays = FixedHolidayCalendar::new(config.holiday_dates()?);

    let health_registry = HealthRegistry::new();
    for name in components::ALL {
        health_registry.register(name).await;
    }

    let logger = StructuredLogger::new(&config.instance);
    logger.log_startup(AGGREGATOR_VERSION, model_count, trip_count);

    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
    let engine_config = config.engine_config()?;
    let publisher = Arc::new(BusPublisher::new(
        bus.clone(),
        engine_config.subjects.trip_updates.clone(),
    ));
    let subjects = engine_config.subjects.clone();
    let engine = Arc::new(AggregatorEngine::new(
        engine_config,
        EngineParts {
            schedule: Arc::new(schedule),
            models: Arc::new(models),
            holidays: Arc::new(holidays),
            bus: bus.clone(),
            publisher,
        },
    )
    .with_health(health_registry.clone()));

    // Without its subscriptions the aggregator cannot do anything useful
    let listeners = Listeners::subscribe(bus.as_ref(), &subjects, config.listener_config())
        .await
        .context("Failed to subscribe to inbound subjects")?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut handles = listeners.spawn(engine.clone(), health_registry.clone(), &shutdown_tx);
    handles.push(tokio::spawn(run_sweeper(
        engine.clone(),
        config.sweep_config(),
        health_registry.clone(),
        shutdown_tx.subscribe(),
    )));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        engine.clone(),
        bus.clone(),
    ));
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Ok(())) => logger.log_shutdown("API server stopped"),
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
            }
        }
    }

    health_registry.set_ready(false).await;
    // No receivers left only means every task already stopped
    let _ = shutdown_tx.send(());
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Background task failed");
        }
    }
    info!("Shutdown complete");

    Ok(())
}
