//! HTTP API for health checks, Prometheus metrics and scheduler state

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use scheduler_lib::{
    adjuster::{AllocationConfig, CapacityAdjuster, UsageStats},
    balancer::{BalancerStats, TaskBalancer},
    detector::{CapabilityDetector, DetectorStats},
    events::{EventType, RecentEvents},
    health::{ComponentStatus, HealthRegistry},
    models::Capabilities,
    monitor::ResourceMonitor,
    observability::SchedulerMetrics,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: SchedulerMetrics,
    pub detector: Arc<CapabilityDetector>,
    pub adjuster: Arc<CapacityAdjuster>,
    pub monitor: Arc<ResourceMonitor>,
    pub balancer: Arc<TaskBalancer>,
    pub events: Arc<RecentEvents>,
}

/// Body of `/v1/stats`
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub current_units: u32,
    pub capabilities: Option<Capabilities>,
    pub detector: DetectorStats,
    pub allocation: AllocationConfig,
    pub usage: UsageStats,
    pub balancer: BalancerStats,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    #[serde(rename = "type")]
    pub event_type: Option<EventType>,
    /// Return only the newest `limit` events
    pub limit: Option<usize>,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
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
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            e.to_string().into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Latest monitor snapshot, taken on demand when none is cached
async fn snapshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state
        .monitor
        .latest_snapshot()
        .unwrap_or_else(|| state.monitor.create_snapshot());
    Json(snapshot)
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatsResponse {
        current_units: state.adjuster.current_units(),
        capabilities: state.detector.peek(),
        detector: state.detector.stats(),
        allocation: state.adjuster.config(),
        usage: state.adjuster.stats(),
        balancer: state.balancer.stats(),
    })
}

/// Recent monitor events, oldest first
async fn events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let mut events = match query.event_type {
        Some(event_type) => state.events.of_type(event_type),
        None => state.events.list(),
    };
    if let Some(limit) = query.limit {
        let skip = events.len().saturating_sub(limit);
        events.drain(..skip);
    }
    Json(events)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/snapshot", get(snapshot))
        .route("/v1/stats", get(stats))
        .route("/v1/events", get(events))
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
