//! HTTP API for health checks, metrics, scaling control and event intake

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use scaler_lib::{
    health::{ComponentStatus, HealthRegistry},
    router::{ErrorResponse, LoadRouter, RouteOutcome},
    scaling::{ScaleError, ScaleOutcome, ScaleRequest, ScalingEngine, ScalingState},
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub router: Arc<LoadRouter>,
    /// Absent when no scaling target was found at startup
    pub engine: Option<Arc<ScalingEngine>>,
    pub scaling_state: ScalingState,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        router: Arc<LoadRouter>,
        engine: Option<Arc<ScalingEngine>>,
        scaling_state: ScalingState,
    ) -> Self {
        Self {
            health_registry,
            router,
            engine,
            scaling_state,
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK,
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
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn get_scaling(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scaling_state.snapshot())
}

async fn post_scaling(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScaleRequest>,
) -> Response {
    let Some(engine) = &state.engine else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Scaling subsystem is not running",
        );
    };

    match engine.request(&request).await {
        Ok(ScaleOutcome::InProgress) => (
            StatusCode::CONFLICT,
            Json(json!({ "info": "Scaling in progress, try again later." })),
        )
            .into_response(),
        Ok(outcome) => {
            info!(outcome = ?outcome, "Manual scaling request handled");
            (StatusCode::OK, Json(outcome)).into_response()
        }
        Err(e @ (ScaleError::StrategyMismatch { .. } | ScaleError::InvalidRequest(_))) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            warn!(error = %e, "Manual scaling request failed");
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

/// Route one event exactly like a stream record
async fn post_event(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match state.router.handle_payload(&body).await {
        Ok(RouteOutcome::Dispatched(prediction)) => (StatusCode::OK, Json(prediction)).into_response(),
        Ok(RouteOutcome::Shed {
            partition,
            replicas,
        }) => (
            StatusCode::ACCEPTED,
            Json(json!({ "shed": true, "partition": partition, "replicas": replicas })),
        )
            .into_response(),
        Err(e) => {
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(ErrorResponse::from(&e))).into_response()
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/scaling", get(get_scaling).post(post_scaling))
        .route("/events", axum::routing::post(post_event))
        .with_state(state)
}

/// Start the API server
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
