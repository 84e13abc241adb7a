//! Configuration data structures for breakwater.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files.
//! They are serde-friendly and carry defaults so that minimal configs stay
//! concise. The whole tree is deserialized once at startup, validated, and
//! injected into components as an `Arc<GatewayConfig>`; nothing re-reads the
//! environment per request.

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_upstream_timeout() -> String {
    "30s".to_string()
}

fn default_issuer() -> String {
    "breakwater".to_string()
}

fn default_access_expiry() -> String {
    "15m".to_string()
}

fn default_refresh_expiry() -> String {
    "7d".to_string()
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    60_000
}

fn default_monitoring_period_ms() -> u64 {
    120_000
}

fn default_half_open_success_threshold() -> u32 {
    1
}

fn default_general_window() -> String {
    "15m".to_string()
}

fn default_general_max() -> u64 {
    100
}

fn default_sensitive_window() -> String {
    "15m".to_string()
}

fn default_sensitive_max() -> u64 {
    5
}

fn default_sensitive_suffixes() -> Vec<String> {
    vec![
        "/login".to_string(),
        "/register".to_string(),
        "/verify".to_string(),
    ]
}

fn default_store_timeout_ms() -> u64 {
    500
}

fn default_aggregator_interval() -> String {
    "10s".to_string()
}

/// Listener and proxy-wide settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the gateway listens on, `IP:PORT`.
    pub listen_addr: String,
    /// Bounded timeout for every proxied call (humantime string).
    pub upstream_timeout: String,
    /// Origins allowed by the CORS middleware; empty reflects the caller.
    pub cors_allowed_origins: Vec<String>,
    /// Interval between health-aggregator gauge exports.
    pub health_export_interval: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream_timeout: default_upstream_timeout(),
            cors_allowed_origins: Vec::new(),
            health_export_interval: default_aggregator_interval(),
        }
    }
}

/// One post-strip path remap, applied first-match-wins.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PathMapEntry {
    pub from: String,
    pub to: String,
}

/// One entry of the prefix table mapping an inbound prefix to a backend.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RouteConfig {
    /// Inbound path prefix, e.g. `/api/jobs`.
    pub prefix: String,
    /// Stable backend service name used as the breaker key.
    pub service: String,
    /// Backend base URL the stripped remainder is appended to.
    pub backend_url: String,
    /// Whether a verified access token is required before dispatch.
    #[serde(default)]
    pub requires_auth: bool,
    /// Remaps applied to the stripped remainder.
    #[serde(default)]
    pub path_map: Vec<PathMapEntry>,
}

/// Per-breaker thresholds and windows, shared by every service breaker.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures in CLOSED that open the breaker.
    pub failure_threshold: u32,
    /// How long an open breaker blocks before admitting a probe.
    pub reset_timeout_ms: u64,
    /// Reporting window for recent request outcomes.
    pub monitoring_period_ms: u64,
    /// Consecutive probe successes required to close from HALF_OPEN.
    pub half_open_success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            monitoring_period_ms: default_monitoring_period_ms(),
            half_open_success_threshold: default_half_open_success_threshold(),
        }
    }
}

/// Signing secrets and expiries for the token service.
///
/// Secrets have no defaults on purpose; missing ones fail validation at
/// startup. `JWT_SECRET` / `JWT_REFRESH_SECRET` environment variables
/// override the file values in the loader.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TokenConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    /// Access-token lifetime (humantime string).
    pub access_expiry: String,
    /// Refresh-token lifetime (humantime string).
    pub refresh_expiry: String,
    /// `iss` claim stamped into every issued token.
    pub issuer: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_secret: String::new(),
            refresh_secret: String::new(),
            access_expiry: default_access_expiry(),
            refresh_expiry: default_refresh_expiry(),
            issuer: default_issuer(),
        }
    }
}

/// Window and ceiling for one rate-limit class.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RateLimitClassConfig {
    /// Fixed window length (humantime string).
    pub window: String,
    /// Maximum requests admitted per identity per window.
    pub max: u64,
}

/// Admission-control configuration: general traffic, sensitive endpoints,
/// and the optional shared counting store.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub general: RateLimitClassConfig,
    pub sensitive: RateLimitClassConfig,
    /// Path suffixes classified as sensitive (login, registration,
    /// verification by default).
    pub sensitive_suffixes: Vec<String>,
    /// Shared store URL (`redis://...`); unset means in-memory counting.
    /// The `REDIS_URL` environment variable overrides this in the loader.
    pub store_url: Option<String>,
    /// Bounded timeout for each shared-store access.
    pub store_timeout_ms: u64,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            general: RateLimitClassConfig {
                window: default_general_window(),
                max: default_general_max(),
            },
            sensitive: RateLimitClassConfig {
                window: default_sensitive_window(),
                max: default_sensitive_max(),
            },
            sensitive_suffixes: default_sensitive_suffixes(),
            store_url: None,
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

/// The complete gateway configuration tree.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub routes: Vec<RouteConfig>,
    pub breaker: BreakerConfig,
    pub tokens: TokenConfig,
    pub rate_limits: RateLimitsConfig,
}
