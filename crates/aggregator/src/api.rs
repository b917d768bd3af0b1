//! HTTP API for probes, Prometheus metrics and operational debugging

use aggregator_lib::{
    bus::{BusError, MessageBus},
    engine::AggregatorEngine,
    health::{ComponentStatus, HealthRegistry},
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub engine: Arc<AggregatorEngine>,
    pub bus: Arc<dyn MessageBus>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, engine: Arc<AggregatorEngine>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            health_registry,
            engine,
            bus,
        }
    }
}

/// 200 while operational (degraded included), 503 otherwise
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(readiness))
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, [("content-type", "text/plain; charset=utf-8")], Vec::new());
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.status().await)
}

async fn pending(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.pending_summaries().await)
}

/// Inject a raw JSON message into the in-process bus
async fn publish(
    State(state): State<Arc<AppState>>,
    Path(subject): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    if let Err(e) = serde_json::from_slice::<serde_json::Value>(&body) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("body is not JSON: {}", e) })),
        );
    }

    match state.bus.publish(&subject, body.to_vec()).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({ "subject": subject, "bytes": body.len() })),
        ),
        Err(e @ BusError::InvalidSubject(_)) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/status", get(status))
        .route("/api/v1/pending", get(pending))
        .route("/api/v1/bus/:subject", post(publish))
        .with_state(state)
}

pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
