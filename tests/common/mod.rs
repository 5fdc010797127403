#![allow(dead_code)]

use request_idempotency::idempotency::{
    EventCounters, IdempotencyConfig, IdempotencyGuard, InMemoryBackend, RedisBackend,
};
use std::sync::Arc;

pub fn redis_url() -> String {
    dotenvy::dotenv().ok();
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

pub fn setup_redis_backend() -> RedisBackend {
    RedisBackend::open(&redis_url()).expect("Failed to create Redis client")
}

/// Guard over a fresh in-memory store with counting event sink.
pub fn setup_guard(config: IdempotencyConfig) -> (IdempotencyGuard, InMemoryBackend, Arc<EventCounters>) {
    let backend = InMemoryBackend::new();
    let counters = Arc::new(EventCounters::new());
    let guard = IdempotencyGuard::new(Arc::new(backend.clone()), config)
        .with_event_sink(counters.clone());
    (guard, backend, counters)
}

/// A key unique to this test run, so Redis tests do not see each other's state.
pub fn unique_key(label: &str) -> String {
    format!("{}-{}", label, uuid::Uuid::new_v4().simple())
}
