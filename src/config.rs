use crate::api::DEFAULT_MAX_RESPONSE_BODY_BYTES;
use crate::error::Result;
use crate::idempotency::{BackendFailurePolicy, IdempotencyConfig, StatusRange, DEFAULT_CONFLICT_BODY};
use crate::observability::LogConfig;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub redis: RedisSettings,
    pub application: ApplicationSettings,
    #[serde(default)]
    pub idempotency: IdempotencySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl ApplicationSettings {
    pub fn log_config(&self) -> LogConfig {
        LogConfig::new(self.log_level.clone(), &self.log_format)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Idempotency options as they appear in configuration files.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdempotencySettings {
    pub default_lock_expiry_secs: u64,
    pub idempotent_methods: Vec<String>,
    pub cacheable_statuses: Vec<StatusRange>,
    pub concurrent_error_body: String,
    pub response_retention_secs: u64,
    pub backend_failure_policy: BackendFailurePolicy,
    pub key_prefix: String,
    /// Request headers whose values become fingerprint discriminators, in this order.
    pub discriminator_headers: Vec<String>,
    /// Optional `namespace` label on guard metrics.
    pub metrics_namespace: Option<String>,
    /// Downstream responses with larger bodies fail with a 500 instead of being cached.
    pub max_response_body_bytes: usize,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        let defaults = IdempotencyConfig::default();
        Self {
            default_lock_expiry_secs: defaults.default_lock_duration.as_secs(),
            idempotent_methods: defaults.idempotent_methods,
            cacheable_statuses: defaults.cacheable_statuses,
            concurrent_error_body: DEFAULT_CONFLICT_BODY.to_string(),
            response_retention_secs: defaults.response_retention.as_secs(),
            backend_failure_policy: defaults.backend_failure_policy,
            key_prefix: defaults.key_prefix,
            discriminator_headers: Vec::new(),
            metrics_namespace: None,
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
        }
    }
}

impl IdempotencySettings {
    /// Builds the validated value object handed to the guard.
    pub fn to_config(&self) -> Result<IdempotencyConfig> {
        let config = IdempotencyConfig {
            default_lock_duration: Duration::from_secs(self.default_lock_expiry_secs),
            idempotent_methods: self
                .idempotent_methods
                .iter()
                .map(|m| m.trim().to_uppercase())
                .collect(),
            cacheable_statuses: self.cacheable_statuses.clone(),
            conflict_body: self.concurrent_error_body.clone(),
            response_retention: Duration::from_secs(self.response_retention_secs),
            backend_failure_policy: self.backend_failure_policy,
            key_prefix: self.key_prefix.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}

impl Settings {
    pub fn new() -> std::result::Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }
}
