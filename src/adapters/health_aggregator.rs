use std::{collections::BTreeMap, sync::Arc, time::Duration};

use serde::Serialize;

use crate::{
    core::{
        breaker::{CircuitBreakerRegistry, CircuitState},
        rate_limiter::{RateLimiter, StoreMode},
    },
    metrics,
    utils::{ShutdownToken, epoch_ms},
};

/// Per-service slice of the composite health snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_rate: f64,
    pub total_requests: u64,
}

/// Composite gateway health derived from breaker state and the rate-store
/// flag. No network I/O happens here; the breakers already embody observed
/// backend health.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub timestamp: String,
    pub rate_store: StoreMode,
    pub services: BTreeMap<String, ServiceHealth>,
}

/// Derives composite health and periodically re-exports it as gauges.
pub struct HealthAggregator {
    breakers: Arc<CircuitBreakerRegistry>,
    rate_limiter: Arc<RateLimiter>,
}

impl HealthAggregator {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            breakers,
            rate_limiter,
        }
    }

    /// Current snapshot: `degraded` as soon as any breaker is OPEN,
    /// `healthy` otherwise.
    pub fn snapshot(&self) -> HealthSnapshot {
        self.snapshot_at(epoch_ms())
    }

    pub fn snapshot_at(&self, now_ms: u64) -> HealthSnapshot {
        let services: BTreeMap<String, ServiceHealth> = self
            .breakers
            .aggregate_metrics_at(now_ms)
            .into_iter()
            .map(|(name, m)| {
                (
                    name,
                    ServiceHealth {
                        state: m.state,
                        failure_count: m.failure_count,
                        success_rate: m.success_rate,
                        total_requests: m.total_requests,
                    },
                )
            })
            .collect();

        let status = if services.values().any(|s| s.state == CircuitState::Open) {
            "degraded"
        } else {
            "healthy"
        };

        HealthSnapshot {
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
            rate_store: self.rate_limiter.store_mode(),
            services,
        }
    }

    /// Background export loop: re-publishes breaker gauges on a fixed
    /// interval, logs overall status changes, and prunes stale rate-limit
    /// counters. Stops when the shutdown token fires.
    pub async fn run(&self, interval: Duration, mut shutdown: ShutdownToken) {
        let mut ticker = tokio::time::interval(interval);
        let mut last_status = "healthy";
        tracing::info!(interval_secs = interval.as_secs(), "health aggregator started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.snapshot();
                    for (name, service) in &snapshot.services {
                        metrics::set_breaker_state(name, service.state.gauge_value());
                    }
                    if snapshot.status != last_status {
                        tracing::warn!(
                            from = last_status,
                            to = snapshot.status,
                            "gateway health status changed"
                        );
                        last_status = snapshot.status;
                    }
                    let pruned = self.rate_limiter.prune_expired(epoch_ms());
                    if pruned > 0 {
                        tracing::debug!(pruned, "dropped expired rate-limit counters");
                    }
                }
                _ = shutdown.wait_for_shutdown() => {
                    tracing::info!("health aggregator shutting down");
                    break;
                }
            }
        }
    }
}
