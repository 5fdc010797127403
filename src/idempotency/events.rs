use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Transition points the guard reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyEvent {
    CacheHit,
    CacheMiss,
    LockConflict,
}

impl IdempotencyEvent {
    pub const ALL: [IdempotencyEvent; 3] = [
        IdempotencyEvent::CacheHit,
        IdempotencyEvent::CacheMiss,
        IdempotencyEvent::LockConflict,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyEvent::CacheHit => "cache_hit",
            IdempotencyEvent::CacheMiss => "cache_miss",
            IdempotencyEvent::LockConflict => "lock_conflict",
        }
    }
}

impl fmt::Display for IdempotencyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context attached to every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMetadata {
    /// Caller-supplied action name, or `METHOD:path`.
    pub action: String,
    pub method: String,
    pub path: String,
    /// Time since the guard started handling the call.
    pub duration: Duration,
}

/// Receives guard events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn record(&self, event: IdempotencyEvent, metadata: &EventMetadata);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn record(&self, _event: IdempotencyEvent, _metadata: &EventMetadata) {}
}

/// Counts events in process. Useful for tests and for a quick local hit rate.
#[derive(Debug, Default)]
pub struct EventCounters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    lock_conflicts: AtomicU64,
}

impl EventCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> EventSnapshot {
        EventSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            lock_conflicts: self.lock_conflicts.load(Ordering::Relaxed),
        }
    }
}

impl EventSink for EventCounters {
    fn record(&self, event: IdempotencyEvent, _metadata: &EventMetadata) {
        let counter = match event {
            IdempotencyEvent::CacheHit => &self.cache_hits,
            IdempotencyEvent::CacheMiss => &self.cache_misses,
            IdempotencyEvent::LockConflict => &self.lock_conflicts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub lock_conflicts: u64,
}

impl EventSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let names: Vec<&str> = IdempotencyEvent::ALL.iter().map(|e| e.as_str()).collect();
        assert_eq!(names, vec!["cache_hit", "cache_miss", "lock_conflict"]);
        assert_eq!(
            serde_json::to_string(&IdempotencyEvent::LockConflict).unwrap(),
            "\"lock_conflict\""
        );
    }

    #[test]
    fn test_event_counters_snapshot() {
        let counters = EventCounters::new();
        let metadata = EventMetadata {
            action: "POST:/orders".to_string(),
            method: "POST".to_string(),
            path: "/orders".to_string(),
            duration: Duration::ZERO,
        };

        counters.record(IdempotencyEvent::CacheMiss, &metadata);
        counters.record(IdempotencyEvent::CacheHit, &metadata);
        counters.record(IdempotencyEvent::CacheHit, &metadata);
        counters.record(IdempotencyEvent::CacheMiss, &metadata);
        counters.record(IdempotencyEvent::LockConflict, &metadata);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.cache_hits, 2);
        assert_eq!(snapshot.cache_misses, 2);
        assert_eq!(snapshot.lock_conflicts, 1);
        assert_eq!(snapshot.hit_rate(), 0.5);
    }

    #[test]
    fn test_noop_sink_accepts_events() {
        let sink = NoopEventSink;
        let metadata = EventMetadata {
            action: "POST:/orders".to_string(),
            method: "POST".to_string(),
            path: "/orders".to_string(),
            duration: Duration::from_millis(3),
        };
        for event in IdempotencyEvent::ALL {
            sink.record(event, &metadata);
        }
    }
}
