use crate::error::{AppError, Result};
use crate::observability::{LatencyTimer, Metrics};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

#[cfg(test)]
use mockall::automock;

/// Deletes KEYS[1] only while it still holds ARGV[1]. Returns 1 when deleted.
pub const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Narrow capability over the shared key-value store.
///
/// Every coordination decision the guard makes goes through these primitives,
/// so implementations must make `set_if_absent` and `compare_and_delete`
/// atomic with respect to all other clients of the same store.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Reads the raw value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes `value`, expiring after `ttl` when one is given.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Writes `value` with an expiry only if `key` is absent. Returns true when written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Deletes `key` only if it currently holds `expected`. Returns true when deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;

    /// Round-trips to the store.
    async fn ping(&self) -> Result<()>;
}

/// Redis expiries are whole milliseconds and must be positive.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    ttl.as_millis().clamp(1, u64::MAX as u128) as u64
}

/// Redis-backed store.
///
/// All operations share one reconnecting connection, opened on first use.
/// Clones share it too.
#[derive(Clone)]
pub struct RedisBackend {
    client: redis::Client,
    connection: Arc<OnceCell<ConnectionManager>>,
    compare_and_delete: redis::Script,
    metrics: Metrics,
}

impl RedisBackend {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            connection: Arc::new(OnceCell::new()),
            compare_and_delete: redis::Script::new(COMPARE_AND_DELETE_SCRIPT),
            metrics: Metrics::new(),
        }
    }

    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(AppError::Redis)?;
        Ok(Self::new(client))
    }

    /// SHA1 under which the compare-and-delete script is cached server-side.
    pub fn script_hash(&self) -> &str {
        self.compare_and_delete.get_hash()
    }

    /// A failed first connect leaves the cell empty, so the next call tries again.
    async fn connection(&self) -> Result<ConnectionManager> {
        let manager = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await
            .map_err(|e| AppError::BackendUnavailable(e.to_string()))?;
        Ok(manager.clone())
    }

    /// True once the shared connection has been established.
    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    fn record<T>(&self, operation: &str, timer: LatencyTimer, result: &Result<T>) {
        self.metrics
            .record_redis_operation(operation, timer.elapsed_ms(), result.is_ok());
    }

    async fn eval_compare_and_delete(
        &self,
        conn: &mut ConnectionManager,
        key: &str,
        expected: &str,
    ) -> redis::RedisResult<i64> {
        redis::cmd("EVALSHA")
            .arg(self.script_hash())
            .arg(1)
            .arg(key)
            .arg(expected)
            .query_async(conn)
            .await
    }
}

#[async_trait]
impl KeyValueBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let timer = LatencyTimer::new();
        let result: Result<Option<Vec<u8>>> = async {
            let mut conn = self.connection().await?;
            let value: Option<Vec<u8>> = conn.get(key).await.map_err(AppError::Redis)?;
            Ok(value)
        }
        .await;

        self.record("get", timer, &result);
        result
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let timer = LatencyTimer::new();
        let result: Result<()> = async {
            let mut conn = self.connection().await?;
            match ttl {
                Some(ttl) => {
                    let _: () = conn
                        .pset_ex(key, value, ttl_millis(ttl))
                        .await
                        .map_err(AppError::Redis)?;
                }
                None => {
                    let _: () = conn.set(key, value).await.map_err(AppError::Redis)?;
                }
            }
            Ok(())
        }
        .await;

        self.record("set", timer, &result);
        result
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let timer = LatencyTimer::new();
        let result: Result<bool> = async {
            let mut conn = self.connection().await?;
            let written: Option<String> = conn
                .set_options(
                    key,
                    value,
                    redis::SetOptions::default()
                        .conditional_set(redis::ExistenceCheck::NX)
                        .with_expiration(redis::SetExpiry::PX(ttl_millis(ttl) as usize)),
                )
                .await
                .map_err(AppError::Redis)?;
            Ok(written.is_some())
        }
        .await;

        self.record("set_nx", timer, &result);
        result
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let timer = LatencyTimer::new();
        let result: Result<bool> = async {
            let mut conn = self.connection().await?;

            let deleted = match self.eval_compare_and_delete(&mut conn, key, expected).await {
                Ok(deleted) => deleted,
                Err(e) if e.kind() == redis::ErrorKind::NoScriptError => {
                    // First use against this server since it started or flushed its script cache.
                    tracing::debug!(sha = %self.script_hash(), "Loading compare-and-delete script");
                    let _: String = redis::cmd("SCRIPT")
                        .arg("LOAD")
                        .arg(COMPARE_AND_DELETE_SCRIPT)
                        .query_async(&mut conn)
                        .await
                        .map_err(AppError::Redis)?;

                    self.eval_compare_and_delete(&mut conn, key, expected)
                        .await
                        .map_err(AppError::Redis)?
                }
                Err(e) => return Err(AppError::Redis(e)),
            };

            Ok(deleted == 1)
        }
        .await;

        self.record("compare_and_delete", timer, &result);
        result
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(AppError::Redis)?;
        Ok(())
    }
}
