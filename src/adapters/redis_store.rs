use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result};
use redis::{AsyncCommands, aio::ConnectionManager};
use tokio::time::timeout;

use crate::ports::rate_store::{RateStore, RateStoreError, RateStoreResult};

/// Shared counter adapter over redis.
///
/// A fixed-window counter is one key per `(class, identity, window_start)`:
/// INCR returns the new count and the first increment arms an EXPIRE so
/// windows clean themselves up. Every command runs under a bounded timeout;
/// the limiter treats any error here as a degrade signal, never a request
/// failure.
pub struct RedisRateStore {
    connection: ConnectionManager,
    timeout_ms: u64,
}

impl RedisRateStore {
    /// Connect to the shared store. Connection establishment is bounded by
    /// the same budget as per-request access.
    pub async fn connect(url: &str, timeout_ms: u64) -> Result<Self> {
        let client = redis::Client::open(url).context("Failed to parse rate-store URL")?;
        let connection = timeout(
            Duration::from_millis(timeout_ms),
            client.get_connection_manager(),
        )
        .await
        .context("Timed out connecting to the rate store")?
        .context("Failed to connect to the rate store")?;

        tracing::info!("connected to shared rate store");
        Ok(Self {
            connection,
            timeout_ms,
        })
    }

    async fn increment_inner(&self, key: &str, window_secs: u64) -> RateStoreResult<u64> {
        let mut connection = self.connection.clone();

        let count: u64 = connection
            .incr(key, 1u64)
            .await
            .map_err(|e| RateStoreError::Unavailable(e.to_string()))?;

        // Arm the window expiry on the key's first increment; the extra
        // second keeps the key alive just past the window boundary.
        if count == 1 {
            let _: bool = connection
                .expire(key, (window_secs + 1) as i64)
                .await
                .map_err(|e| RateStoreError::Unavailable(e.to_string()))?;
        }

        Ok(count)
    }
}

#[async_trait]
impl RateStore for RedisRateStore {
    async fn increment(&self, key: &str, window_secs: u64) -> RateStoreResult<u64> {
        match timeout(
            Duration::from_millis(self.timeout_ms),
            self.increment_inner(key, window_secs),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RateStoreError::Timeout(self.timeout_ms)),
        }
    }
}
