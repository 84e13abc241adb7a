//! Per-service circuit breaking.
//!
//! Each backend service gets one [`CircuitBreaker`] holding a small state
//! machine (CLOSED → OPEN → HALF_OPEN → ...) plus a bounded window of recent
//! outcomes used only for reporting. Breakers are created lazily by the
//! [`CircuitBreakerRegistry`] and live for the process lifetime.
//!
//! All mutations run inside a single mutex-guarded critical section per
//! breaker, so concurrent request completions cannot miss the OPEN
//! transition and the OPEN → HALF_OPEN edge admits exactly one probe.
//! Nothing here suspends; the admission check is safe on the request path.
//!
//! Every operation has an `*_at(now_ms)` form taking an explicit epoch
//! timestamp. The wall-clock wrappers delegate to it, and tests drive the
//! timestamped form directly instead of sleeping through reset windows.

use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use serde::Serialize;

use crate::{config::models::BreakerConfig, metrics, utils::epoch_ms};

/// The three positions of the breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Stable wire/log label.
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }

    /// Gauge encoding: 0 closed, 1 half-open, 2 open.
    pub fn gauge_value(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reporting view over a breaker, computed from the monitoring window.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    /// Percentage of successful outcomes in the window; 100 when empty.
    pub success_rate: f64,
    pub total_requests: u64,
    /// Epoch milliseconds of the most recent failure, if any.
    pub last_failure_time: Option<u64>,
    /// Epoch milliseconds when the next probe becomes admissible.
    pub next_attempt_time: Option<u64>,
}

/// Payload for the synthetic 503 returned when a breaker rejects a call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub next_retry_in_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct RequestSample {
    at_ms: u64,
    success: bool,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    last_failure_time: Option<u64>,
    next_attempt_time: Option<u64>,
    recent: VecDeque<RequestSample>,
}

/// State machine guarding calls to one backend service.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                half_open_successes: 0,
                last_failure_time: None,
                next_attempt_time: None,
                recent: VecDeque::new(),
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service
    }

    /// Current state, for diagnostics and aggregation.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Whether a request may be dispatched right now.
    pub fn allow_request(&self) -> bool {
        self.allow_request_at(epoch_ms())
    }

    /// Admission decision at an explicit timestamp.
    ///
    /// CLOSED and HALF_OPEN always admit. OPEN admits only once the reset
    /// timeout has elapsed, and that admission transitions to HALF_OPEN
    /// within the same lock acquisition: concurrent callers racing the
    /// elapsed deadline produce exactly one OPEN → HALF_OPEN edge.
    pub fn allow_request_at(&self, now_ms: u64) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match inner.next_attempt_time {
                Some(next) if now_ms <= next => false,
                _ => {
                    inner.half_open_successes = 0;
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    true
                }
            },
        }
    }

    /// Record a successful call outcome.
    pub fn record_success(&self) {
        self.record_success_at(epoch_ms());
    }

    /// Success at an explicit timestamp: resets the failure count, clears the
    /// last failure, and closes the breaker once enough consecutive probes
    /// succeed while HALF_OPEN.
    pub fn record_success_at(&self, now_ms: u64) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.last_failure_time = None;
        Self::push_sample(&mut inner, now_ms, true, self.config.monitoring_period_ms);

        if inner.state == CircuitState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.config.half_open_success_threshold {
                inner.half_open_successes = 0;
                inner.next_attempt_time = None;
                self.transition(&mut inner, CircuitState::Closed);
            }
        }
    }

    /// Record a failed call outcome.
    pub fn record_failure(&self) {
        self.record_failure_at(epoch_ms());
    }

    /// Failure at an explicit timestamp: bumps the count, and opens the
    /// breaker when the threshold is crossed from CLOSED or any probe fails
    /// while HALF_OPEN. `next_attempt_time` is assigned only on the edge into
    /// OPEN; late completions arriving while already OPEN do not extend the
    /// reset window.
    pub fn record_failure_at(&self, now_ms: u64) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        inner.last_failure_time = Some(now_ms);
        Self::push_sample(&mut inner, now_ms, false, self.config.monitoring_period_ms);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_successes = 0;
                inner.next_attempt_time = Some(now_ms + self.config.reset_timeout_ms);
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.next_attempt_time = Some(now_ms + self.config.reset_timeout_ms);
                self.transition(&mut inner, CircuitState::Open);
            }
            _ => {}
        }
    }

    /// Reporting metrics over outcomes recorded within the monitoring period.
    pub fn health_metrics(&self) -> HealthMetrics {
        self.health_metrics_at(epoch_ms())
    }

    pub fn health_metrics_at(&self, now_ms: u64) -> HealthMetrics {
        let mut inner = self.lock();
        Self::prune(&mut inner, now_ms, self.config.monitoring_period_ms);

        let total = inner.recent.len() as u64;
        let successes = inner.recent.iter().filter(|s| s.success).count() as u64;
        let success_rate = if total == 0 {
            100.0
        } else {
            successes as f64 * 100.0 / total as f64
        };

        HealthMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            success_rate,
            total_requests: total,
            last_failure_time: inner.last_failure_time,
            next_attempt_time: inner.next_attempt_time,
        }
    }

    /// Snapshot used to build the blocked (503) response.
    pub fn blocked_snapshot(&self) -> BreakerSnapshot {
        self.blocked_snapshot_at(epoch_ms())
    }

    pub fn blocked_snapshot_at(&self, now_ms: u64) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            next_retry_in_ms: inner
                .next_attempt_time
                .map(|next| next.saturating_sub(now_ms))
                .unwrap_or(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        metrics::set_breaker_state(&self.service, to.gauge_value());
        metrics::increment_breaker_transition(&self.service, to.as_str());
        match to {
            CircuitState::Open => tracing::warn!(
                service = %self.service,
                from = %from,
                failure_count = inner.failure_count,
                "circuit breaker opened"
            ),
            CircuitState::HalfOpen => tracing::info!(
                service = %self.service,
                "circuit breaker half-open, admitting probe"
            ),
            CircuitState::Closed => tracing::info!(
                service = %self.service,
                "circuit breaker closed"
            ),
        }
    }

    fn push_sample(inner: &mut BreakerInner, now_ms: u64, success: bool, period_ms: u64) {
        inner.recent.push_back(RequestSample {
            at_ms: now_ms,
            success,
        });
        Self::prune(inner, now_ms, period_ms);
    }

    fn prune(inner: &mut BreakerInner, now_ms: u64, period_ms: u64) {
        let cutoff = now_ms.saturating_sub(period_ms);
        while inner.recent.front().is_some_and(|s| s.at_ms < cutoff) {
            inner.recent.pop_front();
        }
    }
}

/// Process-wide map of service name to breaker.
///
/// Owned by the router and injected at construction; lookups never suspend
/// and creation is lazy on first reference to a service name.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    breakers: scc::HashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: scc::HashMap::new(),
        }
    }

    /// Fetch the breaker for a service, creating it on first reference.
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(found) = self.breakers.read_sync(service, |_, b| Arc::clone(b)) {
            return found;
        }
        let created = Arc::new(CircuitBreaker::new(service, self.config.clone()));
        match self
            .breakers
            .insert_sync(service.to_string(), Arc::clone(&created))
        {
            Ok(()) => created,
            // Lost the creation race; hand back the winner's instance.
            Err(_) => self
                .breakers
                .read_sync(service, |_, b| Arc::clone(b))
                .unwrap_or(created),
        }
    }

    /// Snapshot metrics for every known breaker, keyed by service name.
    pub fn aggregate_metrics(&self) -> BTreeMap<String, HealthMetrics> {
        self.aggregate_metrics_at(epoch_ms())
    }

    pub fn aggregate_metrics_at(&self, now_ms: u64) -> BTreeMap<String, HealthMetrics> {
        let mut out = BTreeMap::new();
        self.breakers.iter_sync(|name, breaker| {
            out.insert(name.clone(), breaker.health_metrics_at(now_ms));
            true
        });
        out
    }

    /// True when any breaker is currently OPEN.
    pub fn any_open(&self) -> bool {
        let mut open = false;
        self.breakers.iter_sync(|_, breaker| {
            if breaker.state() == CircuitState::Open {
                open = true;
            }
            // Keep walking only while nothing is open.
            !open
        });
        open
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_700_000_000_000;

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            monitoring_period_ms: 120_000,
            half_open_success_threshold: 1,
        }
    }

    fn opened_breaker() -> CircuitBreaker {
        let breaker = CircuitBreaker::new("job-service", test_config());
        for _ in 0..5 {
            breaker.record_failure_at(T0);
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker
    }

    #[test]
    fn closed_breaker_admits_requests() {
        let breaker = CircuitBreaker::new("job-service", test_config());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_request_at(T0));
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new("job-service", test_config());
        for i in 0..4 {
            breaker.record_failure_at(T0 + i);
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        breaker.record_failure_at(T0 + 4);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request_at(T0 + 5));
    }

    #[test]
    fn success_resets_failure_count_while_closed() {
        let breaker = CircuitBreaker::new("job-service", test_config());
        for _ in 0..4 {
            breaker.record_failure_at(T0);
        }
        breaker.record_success_at(T0 + 1);
        // The streak restarts, so four more failures still leave it closed.
        for _ in 0..4 {
            breaker.record_failure_at(T0 + 2);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure_at(T0 + 3);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn open_blocks_until_reset_timeout_elapses() {
        let breaker = opened_breaker();
        assert!(!breaker.allow_request_at(T0 + 30_000));
        // The deadline itself is still blocked; admission needs now > deadline.
        assert!(!breaker.allow_request_at(T0 + 60_000));
        assert!(breaker.allow_request_at(T0 + 60_001));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_probe_success_closes_and_resets() {
        let breaker = opened_breaker();
        assert!(breaker.allow_request_at(T0 + 61_000));
        breaker.record_success_at(T0 + 61_050);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.health_metrics_at(T0 + 61_100).failure_count, 0);
    }

    #[test]
    fn half_open_probe_failure_reopens_with_fresh_window() {
        let breaker = opened_breaker();
        let probe_at = T0 + 61_000;
        assert!(breaker.allow_request_at(probe_at));
        breaker.record_failure_at(probe_at);
        assert_eq!(breaker.state(), CircuitState::Open);
        // The reset window restarts from the probe failure.
        assert!(!breaker.allow_request_at(probe_at + 60_000));
        assert!(breaker.allow_request_at(probe_at + 60_001));
    }

    #[test]
    fn late_failures_while_open_do_not_extend_the_window() {
        let breaker = opened_breaker();
        breaker.record_failure_at(T0 + 10_000);
        breaker.record_failure_at(T0 + 20_000);
        assert!(breaker.allow_request_at(T0 + 60_001));
    }

    #[test]
    fn half_open_admits_while_probe_in_flight() {
        let breaker = opened_breaker();
        assert!(breaker.allow_request_at(T0 + 61_000));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.allow_request_at(T0 + 61_001));
    }

    #[test]
    fn concurrent_failures_cannot_miss_the_open_transition() {
        let breaker = Arc::new(CircuitBreaker::new("job-service", test_config()));
        let handles: Vec<_> = (0..5)
            .map(|i| {
                let breaker = Arc::clone(&breaker);
                std::thread::spawn(move || breaker.record_failure_at(T0 + i))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn concurrent_admissions_produce_one_half_open_edge() {
        let breaker = Arc::new(opened_breaker());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                std::thread::spawn(move || breaker.allow_request_at(T0 + 61_000))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn success_rate_is_100_for_an_empty_window() {
        let breaker = CircuitBreaker::new("job-service", test_config());
        let metrics = breaker.health_metrics_at(T0);
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.success_rate, 100.0);
    }

    #[test]
    fn success_rate_reflects_recorded_outcomes() {
        let breaker = CircuitBreaker::new("job-service", test_config());
        for _ in 0..3 {
            breaker.record_success_at(T0);
        }
        breaker.record_failure_at(T0 + 1);
        breaker.record_failure_at(T0 + 2);
        let metrics = breaker.health_metrics_at(T0 + 3);
        assert_eq!(metrics.total_requests, 5);
        assert_eq!(metrics.success_rate, 60.0);
    }

    #[test]
    fn samples_outside_the_monitoring_period_are_pruned() {
        let breaker = CircuitBreaker::new("job-service", test_config());
        breaker.record_success_at(T0);
        breaker.record_failure_at(T0 + 1);
        let metrics = breaker.health_metrics_at(T0 + 120_002);
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.success_rate, 100.0);
    }

    #[test]
    fn blocked_snapshot_reports_remaining_wait() {
        let breaker = opened_breaker();
        let snapshot = breaker.blocked_snapshot_at(T0 + 15_000);
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.failure_count, 5);
        assert_eq!(snapshot.next_retry_in_ms, 45_000);

        // Past the deadline the wait clamps to zero.
        assert_eq!(breaker.blocked_snapshot_at(T0 + 90_000).next_retry_in_ms, 0);
    }

    #[test]
    fn stricter_half_open_policy_requires_consecutive_successes() {
        let mut config = test_config();
        config.half_open_success_threshold = 2;
        let breaker = CircuitBreaker::new("job-service", config);
        for _ in 0..5 {
            breaker.record_failure_at(T0);
        }
        assert!(breaker.allow_request_at(T0 + 60_001));
        breaker.record_success_at(T0 + 60_100);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success_at(T0 + 60_200);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn probe_failure_resets_the_success_streak() {
        let mut config = test_config();
        config.half_open_success_threshold = 2;
        let breaker = CircuitBreaker::new("job-service", config);
        for _ in 0..5 {
            breaker.record_failure_at(T0);
        }
        assert!(breaker.allow_request_at(T0 + 60_001));
        breaker.record_success_at(T0 + 60_100);
        breaker.record_failure_at(T0 + 60_200);
        assert_eq!(breaker.state(), CircuitState::Open);

        let probe_at = T0 + 60_200 + 60_001;
        assert!(breaker.allow_request_at(probe_at));
        breaker.record_success_at(probe_at + 10);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success_at(probe_at + 20);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn registry_returns_the_same_breaker_per_service() {
        let registry = CircuitBreakerRegistry::new(test_config());
        assert!(registry.is_empty());
        let first = registry.breaker("auth-service");
        let second = registry.breaker("auth-service");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_aggregates_metrics_per_service() {
        let registry = CircuitBreakerRegistry::new(test_config());
        registry.breaker("auth-service").record_success_at(T0);
        for _ in 0..5 {
            registry.breaker("job-service").record_failure_at(T0);
        }

        let all = registry.aggregate_metrics_at(T0 + 1);
        assert_eq!(all.len(), 2);
        assert_eq!(all["auth-service"].state, CircuitState::Closed);
        assert_eq!(all["job-service"].state, CircuitState::Open);
        assert!(registry.any_open());
    }

    #[test]
    fn any_open_walks_every_closed_breaker() {
        let registry = CircuitBreakerRegistry::new(test_config());
        registry.breaker("auth-service").record_success_at(T0);
        registry.breaker("job-service").record_success_at(T0);
        registry.breaker("payment-service").record_failure_at(T0);
        assert!(!registry.any_open());
    }
}
