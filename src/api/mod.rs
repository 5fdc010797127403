pub mod handlers;
pub mod middleware;
pub mod requests;
pub mod responses;
pub mod routes;

pub use middleware::{idempotency_middleware, IdempotencyLayerState, DEFAULT_MAX_RESPONSE_BODY_BYTES};
pub use routes::{create_router, AppState};
