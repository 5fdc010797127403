use request_idempotency::api::{create_router, AppState};
use request_idempotency::config::Settings;
use request_idempotency::idempotency::{IdempotencyGuard, KeyValueBackend, RedisBackend};
use request_idempotency::observability::{
    init_logging, init_metrics, HealthChecker, Metrics, MetricsEventSink,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;
    init_logging(&settings.application.log_config());
    info!("Configuration loaded");

    let metrics_handle = init_metrics()?;
    let idempotency_config = settings.idempotency.to_config()?;

    // Connect to Redis
    info!("Connecting to Redis at {}...", settings.redis.url);
    let backend: Arc<dyn KeyValueBackend> = Arc::new(RedisBackend::open(&settings.redis.url)?);
    backend.ping().await?;
    info!("Redis connection established");

    let metrics = match &settings.idempotency.metrics_namespace {
        Some(namespace) => Metrics::with_namespace(namespace.clone()),
        None => Metrics::new(),
    };
    let guard = IdempotencyGuard::new(Arc::clone(&backend), idempotency_config)
        .with_event_sink(Arc::new(MetricsEventSink::new(metrics)));

    let state = AppState::new(Arc::new(guard), Arc::new(HealthChecker::new(backend)))
        .with_metrics(metrics_handle)
        .with_discriminator_headers(settings.idempotency.discriminator_headers.clone())
        .with_max_response_body_bytes(settings.idempotency.max_response_body_bytes);

    let address = settings.application.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Listening on {}", address);

    axum::serve(listener, create_router(state)).await?;

    Ok(())
}
