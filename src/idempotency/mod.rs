pub mod backend;
pub mod cache;
pub mod events;
pub mod fingerprint;
pub mod guard;
pub mod lock;
pub mod memory;
pub mod outcome;

pub use backend::{KeyValueBackend, RedisBackend, COMPARE_AND_DELETE_SCRIPT};
pub use cache::ResponseCache;
pub use events::{
    EventCounters, EventMetadata, EventSink, EventSnapshot, IdempotencyEvent, NoopEventSink,
};
pub use fingerprint::{fingerprint, Fingerprint, IdempotencyToken, IDEMPOTENCY_KEY_HEADER};
pub use guard::{
    BackendFailurePolicy, CallOptions, IdempotencyConfig, IdempotencyGuard, Operation,
    OperationRequest, StatusRange, CONFLICT_STATUS, DEFAULT_CONFLICT_BODY,
};
pub use lock::{Lease, LockManager};
pub use memory::InMemoryBackend;
pub use outcome::{Headers, Outcome};
