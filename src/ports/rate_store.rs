use async_trait::async_trait;
use thiserror::Error;

/// Errors from the shared counting store.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RateStoreError {
    /// Store unreachable or the command failed
    #[error("Rate store unavailable: {0}")]
    Unavailable(String),

    /// Store access exceeded the configured budget
    #[error("Rate store timeout after {0}ms")]
    Timeout(u64),
}

pub type RateStoreResult<T> = Result<T, RateStoreError>;

/// RateStore defines the port for cross-process request counting.
///
/// This is the only cross-process shared mutable resource in the gateway,
/// reached through a single increment-within-window operation. A failing
/// implementation never fails requests: the rate limiter degrades to its
/// in-memory counters and flips a health flag instead.
#[async_trait]
pub trait RateStore: Send + Sync + 'static {
    /// Increment the counter behind `key` and return the new count.
    ///
    /// `window_secs` bounds the key's lifetime; a fresh key expires when the
    /// window elapses so counters reset without explicit cleanup.
    async fn increment(&self, key: &str, window_secs: u64) -> RateStoreResult<u64>;
}
