use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AppError>;

/// Errors raised by the idempotency core, its backends, and the service shell.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Another execution holds the lease for this key, or the lease was lost before release.
    #[error("Lock conflict on {0}")]
    LockConflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, AppError::LockConflict(_))
    }

    /// True for failures talking to the shared store, as opposed to protocol outcomes.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, AppError::Redis(_) | AppError::BackendUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let conflict = AppError::LockConflict("idempotency:lock:abc".to_string());
        assert!(conflict.is_lock_conflict());
        assert!(!conflict.is_backend_failure());

        let down = AppError::BackendUnavailable("connection refused".to_string());
        assert!(down.is_backend_failure());
        assert!(!down.is_lock_conflict());

        let invalid = AppError::Validation("bad".to_string());
        assert!(!invalid.is_backend_failure());
    }

    #[test]
    fn test_error_display() {
        let err = AppError::LockConflict("idempotency:lock:abc".to_string());
        assert_eq!(err.to_string(), "Lock conflict on idempotency:lock:abc");
    }
}
