//! HTTP adapter for the idempotency guard.
//!
//! Guarded requests are translated into an [`Operation`], the downstream
//! service runs as the guard's handler, and its buffered response becomes an
//! [`Outcome`] that can be stored and replayed byte for byte.

use anyhow::Context;
use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::sync::Arc;

use crate::idempotency::{
    CallOptions, Headers, IdempotencyGuard, Operation, OperationRequest, Outcome,
};
use crate::observability::{LatencyTimer, Metrics};

/// Largest downstream body buffered for caching unless configured otherwise.
pub const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 2 * 1024 * 1024;

/// State handed to [`idempotency_middleware`].
#[derive(Clone)]
pub struct IdempotencyLayerState {
    pub guard: Arc<IdempotencyGuard>,
    /// Request headers whose values are added to the fingerprint, in order.
    pub discriminator_headers: Arc<[String]>,
    /// Downstream bodies larger than this are answered with a 500.
    pub max_body_bytes: usize,
}

impl IdempotencyLayerState {
    pub fn new(guard: Arc<IdempotencyGuard>) -> Self {
        Self {
            guard,
            discriminator_headers: Arc::from(Vec::new()),
            max_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn with_discriminator_headers(mut self, headers: Vec<String>) -> Self {
        self.discriminator_headers = Arc::from(headers);
        self
    }

    /// Values of the configured discriminator headers. Missing headers count as empty.
    pub fn discriminators(&self, operation: &Operation) -> Vec<String> {
        self.discriminator_headers
            .iter()
            .map(|name| operation.header(name).unwrap_or_default().to_string())
            .collect()
    }
}

/// Runs the rest of the stack at most once per idempotency key.
pub async fn idempotency_middleware(
    State(state): State<IdempotencyLayerState>,
    request: Request,
    next: Next,
) -> Response {
    let operation = operation_from_request(&request);
    let options = CallOptions::new().with_discriminators(state.discriminators(&operation));
    let limit = state.max_body_bytes;

    let result = state
        .guard
        .execute(&operation, &options, || async move {
            let response = next.run(request).await;
            outcome_from_response(response, limit).await
        })
        .await;

    match result {
        Ok(outcome) => outcome_into_response(outcome),
        Err(e) => {
            tracing::error!(
                method = %operation.method(),
                path = %operation.path(),
                error = %e,
                "Failed to capture downstream response"
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Records request count and latency for every route.
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let timer = LatencyTimer::new();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    Metrics::new().record_http_request(&method, &path, response.status().as_u16(), timer.elapsed_ms());
    response
}

/// Builds the guard's view of a request. Repeated header values are joined with `", "`.
pub fn operation_from_request(request: &Request) -> Operation {
    collect_headers(request.headers())
        .into_iter()
        .fold(
            Operation::new(request.method().as_str(), request.uri().path()),
            |operation, (name, value)| operation.with_header(name, value),
        )
}

/// Buffers a downstream response into an outcome. Fails when the body exceeds `limit` bytes.
pub async fn outcome_from_response(response: Response, limit: usize) -> anyhow::Result<Outcome> {
    let (parts, body) = response.into_parts();
    let body = axum::body::to_bytes(body, limit)
        .await
        .with_context(|| format!("failed to buffer response body within {} bytes", limit))?;

    Ok(Outcome::new(
        parts.status.as_u16(),
        collect_headers(&parts.headers),
        body.to_vec(),
    ))
}

/// Rebuilds an HTTP response from an outcome, skipping headers that are not valid on the wire.
pub fn outcome_into_response(outcome: Outcome) -> Response {
    let status = StatusCode::from_u16(outcome.status).unwrap_or_else(|_| {
        tracing::warn!(status = outcome.status, "Invalid status in outcome");
        StatusCode::INTERNAL_SERVER_ERROR
    });

    let mut response = Response::new(Body::from(outcome.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in &outcome.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping invalid header in outcome"),
        }
    }

    response
}

fn collect_headers(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for name in map.keys() {
        let values: Vec<&str> = map
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        if !values.is_empty() {
            headers.insert(name.as_str().to_string(), values.join(", "));
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::{IdempotencyConfig, InMemoryBackend, IDEMPOTENCY_KEY_HEADER};

    #[test]
    fn test_operation_from_request_joins_repeated_headers() {
        let request = http::Request::builder()
            .method("POST")
            .uri("/orders?dry_run=true")
            .header("Idempotency-Key", "abc")
            .header("X-Tag", "a")
            .header("X-Tag", "b")
            .body(Body::empty())
            .unwrap();

        let operation = operation_from_request(&request);
        assert_eq!(operation.method(), "POST");
        assert_eq!(operation.path(), "/orders");
        assert_eq!(operation.header(IDEMPOTENCY_KEY_HEADER), Some("abc"));
        assert_eq!(operation.header("x-tag"), Some("a, b"));
    }

    #[test]
    fn test_discriminators_follow_configured_order() {
        let guard = IdempotencyGuard::new(
            Arc::new(InMemoryBackend::new()),
            IdempotencyConfig::default(),
        );
        let state = IdempotencyLayerState::new(Arc::new(guard))
            .with_discriminator_headers(vec!["X-Tenant-Id".to_string(), "X-Region".to_string()]);

        let operation = Operation::new("POST", "/orders").with_header("x-tenant-id", "t1");
        assert_eq!(state.discriminators(&operation), vec!["t1", ""]);
    }

    #[tokio::test]
    async fn test_outcome_from_response() {
        let response = (
            StatusCode::CREATED,
            [("content-type", "application/json")],
            "{\"id\":1}",
        )
            .into_response();

        let outcome = outcome_from_response(response, DEFAULT_MAX_RESPONSE_BODY_BYTES)
            .await
            .unwrap();
        assert_eq!(outcome.status, 201);
        assert_eq!(outcome.header("Content-Type"), Some("application/json"));
        assert_eq!(outcome.body_str(), Some("{\"id\":1}"));
    }

    #[tokio::test]
    async fn test_outcome_from_response_enforces_limit() {
        let exact = (StatusCode::OK, "0123456789").into_response();
        let outcome = outcome_from_response(exact, 10).await.unwrap();
        assert_eq!(outcome.body.len(), 10);

        let oversized = (StatusCode::OK, "0123456789a").into_response();
        let err = outcome_from_response(oversized, 10).await.unwrap_err();
        assert!(err.to_string().contains("10 bytes"));
    }

    #[tokio::test]
    async fn test_outcome_into_response_skips_invalid_headers() {
        let outcome = Outcome::with_status(202, "ok")
            .with_header("X-Good", "yes")
            .with_header("Bad Header", "no")
            .with_header("X-Bad-Value", "line\nbreak");

        let response = outcome_into_response(outcome);
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers().get("x-good").unwrap(), "yes");
        assert_eq!(response.headers().len(), 1);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"ok");
    }
}
