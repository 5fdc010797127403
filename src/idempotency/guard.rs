use crate::error::{AppError, Result};
use crate::idempotency::backend::KeyValueBackend;
use crate::idempotency::cache::ResponseCache;
use crate::idempotency::events::{EventMetadata, EventSink, IdempotencyEvent, NoopEventSink};
use crate::idempotency::fingerprint::{fingerprint, IdempotencyToken, IDEMPOTENCY_KEY_HEADER};
use crate::idempotency::lock::{Lease, LockManager};
use crate::idempotency::outcome::{Headers, Outcome};
use crate::observability::mask_sensitive;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Status returned when another execution holds the lease.
pub const CONFLICT_STATUS: u16 = 409;

pub const DEFAULT_CONFLICT_BODY: &str =
    r#"{"errors":[{"message":"Request conflicts with another likely concurrent request."}]}"#;

/// Inclusive range of status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRange {
    pub start: u16,
    pub end: u16,
}

impl StatusRange {
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, status: u16) -> bool {
        (self.start..=self.end).contains(&status)
    }
}

/// What to do when the store cannot be reached while acquiring a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFailurePolicy {
    /// Answer with the conflict outcome; the handler does not run.
    #[default]
    FailClosed,
    /// Run the handler without a lease.
    FailOpen,
}

/// Settings for the guard, built once at startup and handed to [`IdempotencyGuard::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// Lease duration when the call does not specify one. Pick it at or above
    /// the worst-case handler latency, or a slow handler may overlap with a retry.
    pub default_lock_duration: Duration,
    pub idempotent_methods: Vec<String>,
    pub cacheable_statuses: Vec<StatusRange>,
    pub conflict_body: String,
    /// Lifetime of a cached outcome.
    pub response_retention: Duration,
    pub backend_failure_policy: BackendFailurePolicy,
    pub key_prefix: String,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            default_lock_duration: Duration::from_secs(300), // 5 minutes
            idempotent_methods: ["POST", "PUT", "PATCH", "DELETE"]
                .into_iter()
                .map(String::from)
                .collect(),
            cacheable_statuses: vec![StatusRange::new(200, 299), StatusRange::new(400, 499)],
            conflict_body: DEFAULT_CONFLICT_BODY.to_string(),
            response_retention: Duration::from_secs(86_400), // 24 hours
            backend_failure_policy: BackendFailurePolicy::FailClosed,
            key_prefix: "idempotency".to_string(),
        }
    }
}

impl IdempotencyConfig {
    pub fn is_idempotent_method(&self, method: &str) -> bool {
        self.idempotent_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
    }

    pub fn is_cacheable(&self, status: u16) -> bool {
        self.cacheable_statuses.iter().any(|range| range.contains(status))
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_lock_duration.is_zero() {
            return Err(AppError::Validation(
                "default lock duration must be positive".to_string(),
            ));
        }
        if self.response_retention.is_zero() {
            return Err(AppError::Validation(
                "response retention must be positive".to_string(),
            ));
        }
        if let Some(range) = self.cacheable_statuses.iter().find(|r| r.start > r.end) {
            return Err(AppError::Validation(format!(
                "invalid cacheable status range {}..={}",
                range.start, range.end
            )));
        }
        if self.key_prefix.trim().is_empty() {
            return Err(AppError::Validation("key prefix must not be empty".to_string()));
        }
        Ok(())
    }
}

/// The parts of an inbound request the guard needs.
pub trait OperationRequest {
    /// Uppercase HTTP verb.
    fn method(&self) -> &str;
    fn path(&self) -> &str;
    fn header(&self, name: &str) -> Option<&str>;
}

/// Plain-data operation descriptor.
#[derive(Debug, Clone, Default)]
pub struct Operation {
    method: String,
    path: String,
    headers: Headers,
}

impl Operation {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: Headers::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_idempotency_key(self, key: impl Into<String>) -> Self {
        self.with_header(IDEMPOTENCY_KEY_HEADER, key)
    }
}

impl OperationRequest for Operation {
    fn method(&self) -> &str {
        &self.method
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Extra identity inputs, in a stable order.
    pub discriminators: Vec<String>,
    /// Overrides the configured default lease duration.
    pub lock_duration: Option<Duration>,
    /// Name reported with events. Defaults to `METHOD:path`.
    pub action: Option<String>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_discriminator(mut self, discriminator: impl Into<String>) -> Self {
        self.discriminators.push(discriminator.into());
        self
    }

    pub fn with_discriminators<I, S>(mut self, discriminators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.discriminators
            .extend(discriminators.into_iter().map(Into::into));
        self
    }

    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = Some(duration);
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

/// Runs handlers at most once per fingerprint and replays their outcomes.
pub struct IdempotencyGuard {
    config: Arc<IdempotencyConfig>,
    cache: ResponseCache,
    locks: LockManager,
    events: Arc<dyn EventSink>,
}

impl IdempotencyGuard {
    pub fn new(backend: Arc<dyn KeyValueBackend>, config: IdempotencyConfig) -> Self {
        let cache = ResponseCache::new(
            Arc::clone(&backend),
            config.key_prefix.clone(),
            config.response_retention,
        );
        let locks = LockManager::new(backend, config.key_prefix.clone());

        Self {
            config: Arc::new(config),
            cache,
            locks,
            events: Arc::new(NoopEventSink),
        }
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// The outcome returned when a duplicate is already in flight.
    pub fn conflict_outcome(&self) -> Outcome {
        Outcome::with_status(CONFLICT_STATUS, self.config.conflict_body.clone())
    }

    /// Runs `handler` under the idempotency protocol.
    ///
    /// Requests whose method is not idempotent-guarded go straight to the
    /// handler. Otherwise a stored outcome for the same fingerprint is
    /// replayed; if none exists the handler runs once under a lease and its
    /// outcome is stored when its status is cacheable. A concurrent duplicate
    /// gets the conflict outcome. Handler errors are returned unchanged after
    /// the lease is released.
    pub async fn execute<R, F, Fut, E>(
        &self,
        request: &R,
        options: &CallOptions,
        handler: F,
    ) -> std::result::Result<Outcome, E>
    where
        R: OperationRequest + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Outcome, E>>,
    {
        let method = request.method();
        let path = request.path();

        if !self.config.is_idempotent_method(method) {
            tracing::debug!(method = %method, path = %path, "Method not guarded, bypassing idempotency");
            return handler().await;
        }

        let started = Instant::now();
        let token = IdempotencyToken::resolve(request.header(IDEMPOTENCY_KEY_HEADER));
        let fp = fingerprint(&token, path, method, &options.discriminators);
        let action = options
            .action
            .clone()
            .unwrap_or_else(|| format!("{}:{}", method, path));

        if let Some(mut cached) = self.cache.get(&fp).await {
            cached.set_idempotency_key(token.as_str());
            tracing::debug!(
                fingerprint = %fp,
                idempotency_key = %mask_sensitive(token.as_str(), 4),
                status = cached.status,
                "Replaying cached response"
            );
            self.emit(IdempotencyEvent::CacheHit, &action, method, path, started);
            return Ok(cached);
        }
        self.emit(IdempotencyEvent::CacheMiss, &action, method, path, started);

        let duration = options
            .lock_duration
            .unwrap_or(self.config.default_lock_duration);

        let lease = match self.locks.acquire(&fp, duration).await {
            Ok(lease) => Some(lease),
            Err(AppError::LockConflict(_)) => {
                tracing::info!(
                    fingerprint = %fp,
                    method = %method,
                    path = %path,
                    "Concurrent duplicate request rejected"
                );
                self.emit(IdempotencyEvent::LockConflict, &action, method, path, started);
                return Ok(self.conflict_outcome());
            }
            Err(e) => match self.config.backend_failure_policy {
                BackendFailurePolicy::FailClosed => {
                    tracing::warn!(
                        fingerprint = %fp,
                        error = %e,
                        "Lease acquisition failed, rejecting request"
                    );
                    self.emit(IdempotencyEvent::LockConflict, &action, method, path, started);
                    return Ok(self.conflict_outcome());
                }
                BackendFailurePolicy::FailOpen => {
                    tracing::warn!(
                        fingerprint = %fp,
                        error = %e,
                        "Lease acquisition failed, running handler without a lease"
                    );
                    None
                }
            },
        };

        let mut result = handler().await;

        if let Ok(outcome) = result.as_mut() {
            if self.config.is_cacheable(outcome.status) {
                if let Err(e) = self.cache.set(&fp, outcome).await {
                    tracing::warn!(
                        fingerprint = %fp,
                        error = %e,
                        "Failed to cache response, a retry will run the handler again"
                    );
                }
                outcome.set_idempotency_key(token.as_str());
            } else {
                tracing::debug!(
                    fingerprint = %fp,
                    status = outcome.status,
                    "Response status not cacheable"
                );
            }
        }

        if let Some(lease) = lease {
            self.release(lease).await;
        }

        result
    }

    async fn release(&self, lease: Lease) {
        let fingerprint = lease.fingerprint().clone();
        match lease.release().await {
            Ok(()) => {}
            Err(e) if e.is_lock_conflict() => {
                tracing::warn!(
                    fingerprint = %fingerprint,
                    "Lease expired before release; the handler outlived its lock duration"
                );
            }
            Err(e) => {
                tracing::warn!(
                    fingerprint = %fingerprint,
                    error = %e,
                    "Failed to release lease, it will expire on its own"
                );
            }
        }
    }

    fn emit(
        &self,
        event: IdempotencyEvent,
        action: &str,
        method: &str,
        path: &str,
        started: Instant,
    ) {
        let metadata = EventMetadata {
            action: action.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            duration: started.elapsed(),
        };
        self.events.record(event, &metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::backend::MockKeyValueBackend;
    use crate::idempotency::memory::InMemoryBackend;

    #[test]
    fn test_default_config() {
        let config = IdempotencyConfig::default();
        assert_eq!(config.default_lock_duration, Duration::from_secs(300));
        assert_eq!(config.response_retention, Duration::from_secs(86_400));
        assert_eq!(config.key_prefix, "idempotency");
        assert_eq!(config.backend_failure_policy, BackendFailurePolicy::FailClosed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_idempotent_methods_case_insensitive() {
        let config = IdempotencyConfig::default();
        assert!(config.is_idempotent_method("POST"));
        assert!(config.is_idempotent_method("patch"));
        assert!(!config.is_idempotent_method("GET"));
        assert!(!config.is_idempotent_method("HEAD"));
    }

    #[test]
    fn test_cacheable_statuses() {
        let config = IdempotencyConfig::default();
        for status in [200, 201, 204, 299, 400, 404, 422, 499] {
            assert!(config.is_cacheable(status), "{} should be cacheable", status);
        }
        for status in [100, 301, 302, 500, 502, 503] {
            assert!(!config.is_cacheable(status), "{} should not be cacheable", status);
        }
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        let config = IdempotencyConfig {
            default_lock_duration: Duration::ZERO,
            ..IdempotencyConfig::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Validation(_))));

        let config = IdempotencyConfig {
            cacheable_statuses: vec![StatusRange::new(299, 200)],
            ..IdempotencyConfig::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Validation(_))));

        let config = IdempotencyConfig {
            key_prefix: " ".to_string(),
            ..IdempotencyConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_operation_header_lookup() {
        let op = Operation::new("POST", "/orders").with_idempotency_key("\"abc\"");
        assert_eq!(op.header("idempotency-key"), Some("\"abc\""));
        assert_eq!(op.header("X-Missing"), None);
    }

    #[test]
    fn test_call_options_builder() {
        let options = CallOptions::new()
            .with_discriminator("tenant-1")
            .with_discriminators(["order-9", "line-2"])
            .with_lock_duration(Duration::from_secs(10))
            .with_action("orders#create");

        assert_eq!(options.discriminators, vec!["tenant-1", "order-9", "line-2"]);
        assert_eq!(options.lock_duration, Some(Duration::from_secs(10)));
        assert_eq!(options.action.as_deref(), Some("orders#create"));
    }

    #[tokio::test]
    async fn test_conflict_outcome_shape() {
        let guard = IdempotencyGuard::new(
            Arc::new(InMemoryBackend::new()),
            IdempotencyConfig::default(),
        );
        let outcome = guard.conflict_outcome();
        assert_eq!(outcome.status, 409);
        assert!(outcome.headers.is_empty());
        assert_eq!(outcome.body_str(), Some(DEFAULT_CONFLICT_BODY));
    }

    #[tokio::test]
    async fn test_handler_error_releases_lease() {
        let backend = InMemoryBackend::new();
        let guard = IdempotencyGuard::new(Arc::new(backend.clone()), IdempotencyConfig::default());
        let op = Operation::new("POST", "/orders").with_idempotency_key("k1");

        let result: std::result::Result<Outcome, &str> = guard
            .execute(&op, &CallOptions::new(), || async { Err("boom") })
            .await;

        assert_eq!(result.unwrap_err(), "boom");
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_returns_outcome() {
        let mut mock = MockKeyValueBackend::new();
        mock.expect_get().returning(|_| Ok(None));
        mock.expect_set_if_absent()
            .withf(|key, _, _| key.starts_with("idempotency:lock:"))
            .times(1)
            .returning(|_, _, _| Ok(true));
        mock.expect_set()
            .withf(|key, _, _| key.starts_with("idempotency:cached_response:"))
            .times(1)
            .returning(|_, _, _| Err(AppError::BackendUnavailable("write failed".to_string())));
        mock.expect_compare_and_delete()
            .withf(|key, _| key.starts_with("idempotency:lock:"))
            .times(1)
            .returning(|_, _| Ok(true));

        let guard = IdempotencyGuard::new(Arc::new(mock), IdempotencyConfig::default());
        let op = Operation::new("POST", "/orders").with_idempotency_key("k");

        let outcome = guard
            .execute(&op, &CallOptions::new(), || async {
                Ok::<_, std::convert::Infallible>(Outcome::with_status(201, "{\"id\":1}"))
            })
            .await
            .unwrap();

        assert_eq!(outcome.status, 201);
        assert_eq!(outcome.idempotency_key(), Some("k"));
        assert_eq!(outcome.body_str(), Some("{\"id\":1}"));
    }
}
