pub mod graceful_shutdown;

use std::time::{SystemTime, UNIX_EPOCH};

pub use graceful_shutdown::{GracefulShutdown, ShutdownReason, ShutdownToken};

/// Milliseconds since the Unix epoch.
///
/// Breaker and rate-limit bookkeeping is ordered by wall-clock timestamps
/// only; a clock before the epoch reports as 0 rather than panicking.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
