use http::StatusCode;
use serde_json::{Value, json};
use thiserror::Error;

use crate::core::breaker::BreakerSnapshot;

/// Gateway-boundary error taxonomy.
///
/// Every failure a client can observe maps to exactly one of these variants.
/// `CircuitOpen` and `RateLimited` are resolved at the gateway and never reach
/// a backend; `UpstreamTimeout`/`UpstreamError` are recorded against the
/// owning circuit breaker before being mapped; token failures map to 401 and
/// are never retried. `ConfigError` only occurs during startup and aborts it.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// The circuit breaker rejected the call before any network contact.
    #[error("circuit open for service '{service}'")]
    CircuitOpen {
        service: String,
        snapshot: BreakerSnapshot,
    },

    /// The proxied call did not complete within the configured budget.
    #[error("upstream '{service}' timed out after {timeout_ms}ms")]
    UpstreamTimeout { service: String, timeout_ms: u64 },

    /// The backend was unreachable or failed at the connection level.
    #[error("upstream '{service}' failed: {detail}")]
    UpstreamError { service: String, detail: String },

    /// The presented token is past its expiry claim.
    #[error("token expired")]
    TokenExpired,

    /// The presented token failed signature or structural validation.
    #[error("token invalid: {0}")]
    TokenInvalid(String),

    /// Request volume for this client exceeded the window limit.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Invalid or missing configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl GatewayError {
    /// HTTP status this error maps to at the edge.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamError { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::TokenExpired | GatewayError::TokenInvalid(_) => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// User-safe JSON body. Connection-level detail stays in the logs.
    pub fn body(&self) -> Value {
        let timestamp = chrono::Utc::now().to_rfc3339();
        match self {
            GatewayError::CircuitOpen { service, snapshot } => json!({
                "error": "Service Unavailable",
                "message": format!(
                    "{service} is temporarily unavailable. Please try again later."
                ),
                "circuitBreaker": {
                    "state": snapshot.state,
                    "nextRetryIn": snapshot.next_retry_in_ms,
                    "failureCount": snapshot.failure_count,
                },
                "timestamp": timestamp,
            }),
            GatewayError::UpstreamTimeout { service, .. } => json!({
                "error": "Gateway Timeout",
                "message": format!("{service} did not respond in time."),
                "timestamp": timestamp,
            }),
            GatewayError::UpstreamError { service, .. } => json!({
                "error": "Bad Gateway",
                "message": format!("{service} is currently unreachable."),
                "timestamp": timestamp,
            }),
            GatewayError::TokenExpired => json!({
                "error": "Unauthorized",
                "message": "Access token has expired.",
                "timestamp": timestamp,
            }),
            GatewayError::TokenInvalid(_) => json!({
                "error": "Unauthorized",
                "message": "Invalid or missing access token.",
                "timestamp": timestamp,
            }),
            GatewayError::RateLimited { retry_after_secs } => json!({
                "success": false,
                "message": "Too many requests. Please try again later.",
                "retryAfter": retry_after_secs,
            }),
            GatewayError::ConfigError(msg) => json!({
                "error": "Internal Server Error",
                "message": msg,
                "timestamp": timestamp,
            }),
        }
    }

    /// Whether this outcome must be recorded as a failure on the breaker.
    /// Only unavailability counts; admission rejections and auth failures
    /// never touch breaker state.
    pub fn is_breaker_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::UpstreamTimeout { .. } | GatewayError::UpstreamError { .. }
        )
    }
}
