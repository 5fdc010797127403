use crate::error::Result;
use crate::idempotency::backend::KeyValueBackend;
use crate::idempotency::fingerprint::Fingerprint;
use crate::idempotency::outcome::Outcome;
use std::sync::Arc;
use std::time::Duration;

/// Stores completed outcomes keyed by fingerprint.
#[derive(Clone)]
pub struct ResponseCache {
    backend: Arc<dyn KeyValueBackend>,
    key_prefix: Arc<str>,
    retention: Duration,
}

impl ResponseCache {
    pub fn new(
        backend: Arc<dyn KeyValueBackend>,
        key_prefix: impl Into<String>,
        retention: Duration,
    ) -> Self {
        Self {
            backend,
            key_prefix: Arc::from(key_prefix.into()),
            retention,
        }
    }

    pub fn response_key(&self, fingerprint: &Fingerprint) -> String {
        format!("{}:cached_response:{}", self.key_prefix, fingerprint)
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Looks up a stored outcome.
    ///
    /// Returns `None` when nothing is stored, when the store cannot be reached,
    /// or when the stored record cannot be decoded. A `None` from an outage may
    /// let a duplicate run; availability wins over strictness here.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<Outcome> {
        let key = self.response_key(fingerprint);

        let raw = match self.backend.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(
                    fingerprint = %fingerprint,
                    error = %e,
                    "Response cache read failed, treating as miss"
                );
                return None;
            }
        };

        match serde_json::from_slice::<Outcome>(&raw) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(
                    fingerprint = %fingerprint,
                    error = %e,
                    "Cached response could not be decoded, treating as miss"
                );
                None
            }
        }
    }

    /// Writes the outcome with the retention TTL.
    pub async fn set(&self, fingerprint: &Fingerprint, outcome: &Outcome) -> Result<()> {
        let key = self.response_key(fingerprint);
        let payload = serde_json::to_vec(outcome)?;

        self.backend.set(&key, payload, Some(self.retention)).await?;

        tracing::debug!(
            fingerprint = %fingerprint,
            status = outcome.status,
            retention_secs = self.retention.as_secs(),
            "Cached response"
        );
        Ok(())
    }
}
