//! Metrics helpers for breakwater.
//!
//! Convenience functions and RAII timers wrapping the `metrics` crate macros.
//! No concrete exporter is embedded; the operator installs any compatible
//! recorder. The module only describes and records breakwater-specific
//! metric names.
//!
//! Provided metrics (labels vary by family):
//! * `breakwater_requests_total` (counter: method, status)
//! * `breakwater_request_duration_seconds` (histogram: method)
//! * `breakwater_upstream_requests_total` (counter: service, outcome)
//! * `breakwater_upstream_duration_seconds` (histogram: service)
//! * `breakwater_breaker_state` (gauge per service: 0 closed, 1 half-open, 2 open)
//! * `breakwater_breaker_transitions_total` (counter: service, to)
//! * `breakwater_breaker_rejections_total` (counter: service)
//! * `breakwater_rate_limited_total` (counter: class)
//! * `breakwater_rate_store_mode` (gauge: 0 memory, 1 degraded, 2 shared)
//!
//! The timer structs record on `Drop` so durations survive early returns.
use std::time::Instant;

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

pub const REQUESTS_TOTAL: &str = "breakwater_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "breakwater_request_duration_seconds";
pub const UPSTREAM_REQUESTS_TOTAL: &str = "breakwater_upstream_requests_total";
pub const UPSTREAM_DURATION_SECONDS: &str = "breakwater_upstream_duration_seconds";
pub const BREAKER_STATE: &str = "breakwater_breaker_state";
pub const BREAKER_TRANSITIONS_TOTAL: &str = "breakwater_breaker_transitions_total";
pub const BREAKER_REJECTIONS_TOTAL: &str = "breakwater_breaker_rejections_total";
pub const RATE_LIMITED_TOTAL: &str = "breakwater_rate_limited_total";
pub const RATE_STORE_MODE: &str = "breakwater_rate_store_mode";

static DESCRIBED: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests processed by the gateway."
    );
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests processed by the gateway."
    );
    describe_counter!(
        UPSTREAM_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of requests dispatched to backend services, by outcome."
    );
    describe_histogram!(
        UPSTREAM_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of proxied backend calls."
    );
    describe_gauge!(
        BREAKER_STATE,
        "Circuit breaker position per service (0 closed, 1 half-open, 2 open)."
    );
    describe_counter!(
        BREAKER_TRANSITIONS_TOTAL,
        Unit::Count,
        "Circuit breaker state transitions, by target state."
    );
    describe_counter!(
        BREAKER_REJECTIONS_TOTAL,
        Unit::Count,
        "Requests rejected before dispatch by an open circuit breaker."
    );
    describe_counter!(
        RATE_LIMITED_TOTAL,
        Unit::Count,
        "Requests rejected by rate limiting, by endpoint class."
    );
    describe_gauge!(
        RATE_STORE_MODE,
        "Active rate-limit counting store (0 memory, 1 degraded, 2 shared)."
    );
});

/// Register metric descriptions (idempotent).
pub fn init_metrics() {
    Lazy::force(&DESCRIBED);
    tracing::info!("metrics descriptions registered");
}

/// Count a completed inbound request.
pub fn increment_request_total(method: &str, status: u16) {
    counter!(
        REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record the outcome of a proxied backend call.
pub fn increment_upstream_result(service: &str, outcome: &str) {
    counter!(
        UPSTREAM_REQUESTS_TOTAL,
        "service" => service.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set the breaker-state gauge for a service.
pub fn set_breaker_state(service: &str, state: f64) {
    gauge!(BREAKER_STATE, "service" => service.to_string()).set(state);
}

/// Count a breaker state transition.
pub fn increment_breaker_transition(service: &str, to: &str) {
    counter!(
        BREAKER_TRANSITIONS_TOTAL,
        "service" => service.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Count a request rejected by an open breaker.
pub fn increment_breaker_rejection(service: &str) {
    counter!(BREAKER_REJECTIONS_TOTAL, "service" => service.to_string()).increment(1);
}

/// Count a rate-limited request.
pub fn increment_rate_limited(class: &str) {
    counter!(RATE_LIMITED_TOTAL, "class" => class.to_string()).increment(1);
}

/// Record which counting store the rate limiter is currently using.
pub fn set_rate_store_mode(mode: f64) {
    gauge!(RATE_STORE_MODE).set(mode);
}

/// RAII helper measuring inbound request duration.
pub struct RequestTimer {
    start: Instant,
    method: String,
}

impl RequestTimer {
    pub fn new(method: &str) -> Self {
        Self {
            start: Instant::now(),
            method: method.to_string(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        histogram!(REQUEST_DURATION_SECONDS, "method" => self.method.clone())
            .record(self.start.elapsed().as_secs_f64());
    }
}

/// RAII helper measuring proxied backend call duration.
pub struct UpstreamTimer {
    start: Instant,
    service: String,
}

impl UpstreamTimer {
    pub fn new(service: String) -> Self {
        Self {
            start: Instant::now(),
            service,
        }
    }
}

impl Drop for UpstreamTimer {
    fn drop(&mut self) {
        histogram!(UPSTREAM_DURATION_SECONDS, "service" => self.service.clone())
            .record(self.start.elapsed().as_secs_f64());
    }
}
