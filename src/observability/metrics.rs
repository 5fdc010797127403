use crate::idempotency::{EventMetadata, EventSink, IdempotencyEvent};
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Mutex;
use std::time::Instant;

static METRICS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Metric names for each guard event.
pub fn event_metric_name(event: IdempotencyEvent) -> &'static str {
    match event {
        IdempotencyEvent::CacheHit => "idempotency_cache_hit_count",
        IdempotencyEvent::CacheMiss => "idempotency_cache_miss_count",
        IdempotencyEvent::LockConflict => "idempotency_lock_conflict_count",
    }
}

/// Metrics recorder for the idempotency service.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    namespace: Option<String>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `namespace` label to every guard event metric.
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn record_event(&self, event: IdempotencyEvent, action: &str, duration_secs: f64) {
        let metric = event_metric_name(event);
        let mut labels = vec![("action", action.to_string())];
        if let Some(namespace) = &self.namespace {
            labels.push(("namespace", namespace.clone()));
        }

        counter!(metric, &labels).increment(1);

        labels.push(("metric", metric.to_string()));
        histogram!("idempotency_cache_duration_seconds", &labels).record(duration_secs);
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_ms: f64) {
        counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string()).increment(1);
        histogram!("http_request_duration_ms", "method" => method.to_string(), "path" => path.to_string()).record(duration_ms);
    }

    pub fn record_redis_operation(&self, operation: &str, duration_ms: f64, success: bool) {
        counter!("redis_operations_total", "operation" => operation.to_string(), "success" => success.to_string()).increment(1);
        histogram!("redis_operation_duration_ms", "operation" => operation.to_string()).record(duration_ms);
    }
}

/// Event sink that exports guard events as Prometheus metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsEventSink {
    metrics: Metrics,
}

impl MetricsEventSink {
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }
}

impl EventSink for MetricsEventSink {
    fn record(&self, event: IdempotencyEvent, metadata: &EventMetadata) {
        self.metrics
            .record_event(event, &metadata.action, metadata.duration.as_secs_f64());
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder once and returns its handle.
///
/// Safe to call from several threads; every caller gets the same handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let mut slot = METRICS_HANDLE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();

    *slot = Some(handle.clone());
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!("idempotency_cache_hit_count", Unit::Count, "Requests answered from the response cache");
    describe_counter!("idempotency_cache_miss_count", Unit::Count, "Guarded requests with no cached response");
    describe_counter!("idempotency_lock_conflict_count", Unit::Count, "Requests rejected because a duplicate was in flight");
    describe_histogram!("idempotency_cache_duration_seconds", Unit::Seconds, "Time from guard entry to the reported event");

    describe_counter!("http_requests_total", Unit::Count, "Total HTTP requests");
    describe_histogram!("http_request_duration_ms", Unit::Milliseconds, "HTTP request latency in milliseconds");

    describe_counter!("redis_operations_total", Unit::Count, "Total Redis operations");
    describe_histogram!("redis_operation_duration_ms", Unit::Milliseconds, "Redis operation latency in milliseconds");
}
