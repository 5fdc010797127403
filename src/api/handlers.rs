use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use uuid::Uuid;

use crate::api::requests::CreateOperationRequest;
use crate::api::responses::{
    ApiResponse, ErrorResponse, HealthResponse, OperationResponse, ValidationErrorDetail,
};

use super::routes::AppState;

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let health = state.health_checker.check_all().await;
    Json(ApiResponse::success(HealthResponse::from(health)))
}

/// Readiness check endpoint.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    if state.health_checker.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Liveness check endpoint.
pub async fn liveness_check(State(state): State<AppState>) -> StatusCode {
    if state.health_checker.is_alive() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus scrape endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics_handle {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics recorder not installed".to_string(),
        ),
    }
}

/// Create an operation.
///
/// Each successful call mints a fresh id, so a replay from the idempotency
/// layer is visible as an identical id.
pub async fn create_operation(
    Json(request): Json<CreateOperationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OperationResponse>>), (StatusCode, Json<ApiResponse<()>>)> {
    if let Err(errors) = request.validate() {
        let details: Vec<ValidationErrorDetail> = errors
            .iter()
            .map(|e| ValidationErrorDetail {
                field: e.field.clone(),
                message: e.message.clone(),
            })
            .collect();

        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::error(
                ErrorResponse::new("VALIDATION_ERROR", "Request validation failed")
                    .with_details(details),
            )),
        ));
    }

    let operation = OperationResponse {
        id: Uuid::new_v4(),
        reference: request.reference,
        payload: request.payload,
        created_at: chrono::Utc::now(),
    };
    tracing::info!(operation_id = %operation.id, reference = %operation.reference, "Operation created");

    Ok((StatusCode::CREATED, Json(ApiResponse::success(operation))))
}
