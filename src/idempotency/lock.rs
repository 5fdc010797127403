use crate::error::{AppError, Result};
use crate::idempotency::backend::KeyValueBackend;
use crate::idempotency::fingerprint::Fingerprint;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Acquires and releases time-bounded leases keyed by fingerprint.
///
/// A lease is a key set only if absent, holding a random ownership token and
/// expiring after the requested duration. Release is a server-side
/// compare-and-delete, so a holder whose lease already expired can never
/// delete a lease that another process has since acquired.
///
/// The expiry bounds how long duplicates are turned away, not how long the
/// holder runs: a handler that outlives its lease may overlap with a retry.
#[derive(Clone)]
pub struct LockManager {
    backend: Arc<dyn KeyValueBackend>,
    key_prefix: Arc<str>,
}

impl LockManager {
    pub fn new(backend: Arc<dyn KeyValueBackend>, key_prefix: impl Into<String>) -> Self {
        Self {
            backend,
            key_prefix: Arc::from(key_prefix.into()),
        }
    }

    pub fn lock_key(&self, fingerprint: &Fingerprint) -> String {
        format!("{}:lock:{}", self.key_prefix, fingerprint)
    }

    /// Attempts to take the lease without waiting.
    ///
    /// Fails with `AppError::LockConflict` when the lease is already held, and
    /// with the backend's error when the store could not be reached.
    pub async fn acquire(&self, fingerprint: &Fingerprint, duration: Duration) -> Result<Lease> {
        let key = self.lock_key(fingerprint);
        let token = Uuid::new_v4().simple().to_string();

        if !self.backend.set_if_absent(&key, &token, duration).await? {
            return Err(AppError::LockConflict(key));
        }

        tracing::debug!(
            fingerprint = %fingerprint,
            duration_ms = duration.as_millis() as u64,
            "Acquired idempotency lease"
        );

        Ok(Lease {
            manager: self.clone(),
            fingerprint: fingerprint.clone(),
            token,
            released: false,
        })
    }

    /// Deletes the lease only if it is still held under `token`.
    ///
    /// Fails with `AppError::LockConflict` if the lease expired or now belongs to someone else.
    pub async fn release(&self, fingerprint: &Fingerprint, token: &str) -> Result<()> {
        let key = self.lock_key(fingerprint);

        if self.backend.compare_and_delete(&key, token).await? {
            tracing::debug!(fingerprint = %fingerprint, "Released idempotency lease");
            Ok(())
        } else {
            Err(AppError::LockConflict(key))
        }
    }
}

/// A held lease. Release it with [`Lease::release`].
///
/// A lease dropped without being released (the handler panicked, or the
/// caller's future was cancelled) is released from a background task on the
/// current Tokio runtime. Outside a runtime it is left to expire.
pub struct Lease {
    manager: LockManager,
    fingerprint: Fingerprint,
    token: String,
    released: bool,
}

impl Lease {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.manager.release(&self.fingerprint, &self.token).await
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("fingerprint", &self.fingerprint)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let manager = self.manager.clone();
        let fingerprint = self.fingerprint.clone();
        let token = std::mem::take(&mut self.token);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = manager.release(&fingerprint, &token).await {
                        tracing::warn!(
                            fingerprint = %fingerprint,
                            error = %e,
                            "Failed to release abandoned idempotency lease"
                        );
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    fingerprint = %fingerprint,
                    "Idempotency lease dropped outside a runtime; it will expire on its own"
                );
            }
        }
    }
}
