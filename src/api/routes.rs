use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::middleware::{idempotency_middleware, track_metrics, IdempotencyLayerState};
use crate::idempotency::IdempotencyGuard;
use crate::observability::HealthChecker;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub idempotency: IdempotencyLayerState,
    pub health_checker: Arc<HealthChecker>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(guard: Arc<IdempotencyGuard>, health_checker: Arc<HealthChecker>) -> Self {
        Self {
            idempotency: IdempotencyLayerState::new(guard),
            health_checker,
            metrics_handle: None,
        }
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Caps how much of a downstream body is buffered for caching.
    pub fn with_max_response_body_bytes(mut self, limit: usize) -> Self {
        self.idempotency = self.idempotency.with_max_body_bytes(limit);
        self
    }

    /// Sets the request headers folded into every fingerprint.
    pub fn with_discriminator_headers(mut self, headers: Vec<String>) -> Self {
        self.idempotency = self.idempotency.with_discriminator_headers(headers);
        self
    }
}

/// Creates the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        // Metrics endpoint
        .route("/metrics", get(handlers::metrics_endpoint))
        // Guarded endpoints
        .route("/operations", post(handlers::create_operation))
        .layer(middleware::from_fn_with_state(
            state.idempotency.clone(),
            idempotency_middleware,
        ))
        .layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
