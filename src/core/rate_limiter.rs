//! Fixed-window admission control per client identity.
//!
//! Two independent limiter classes share one implementation: `general`
//! covers ordinary API traffic, `sensitive` covers login/registration/
//! verification endpoints (matched by configurable path suffixes) with a
//! tighter budget. Counters are keyed by `(class, identity, window_start)`
//! so a window boundary resets the count without explicit cleanup.
//!
//! When a shared store is configured, counting goes through it so limits
//! hold across gateway instances. A store failure never fails the request:
//! the limiter falls back to its in-memory counters and flips an observable
//! health flag (log + gauge), with symmetric recovery.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use http::HeaderMap;
use serde::Serialize;

use crate::{
    config::models::{RateLimitClassConfig, RateLimitsConfig},
    error::GatewayError,
    metrics,
    ports::rate_store::RateStore,
    utils::epoch_ms,
};

/// Which budget a request counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitClass {
    General,
    Sensitive,
}

impl LimitClass {
    pub fn as_str(self) -> &'static str {
        match self {
            LimitClass::General => "general",
            LimitClass::Sensitive => "sensitive",
        }
    }
}

/// Which counting store the limiter is currently using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// No shared store configured; per-process counters only.
    Memory,
    /// Shared store configured and responding.
    Shared,
    /// Shared store configured but unreachable; counting in memory.
    Degraded,
}

impl StoreMode {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreMode::Memory => "memory",
            StoreMode::Shared => "shared",
            StoreMode::Degraded => "degraded",
        }
    }

    fn gauge_value(self) -> f64 {
        match self {
            StoreMode::Memory => 0.0,
            StoreMode::Degraded => 1.0,
            StoreMode::Shared => 2.0,
        }
    }
}

/// Outcome of an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub limit: u64,
    pub remaining: u64,
}

#[derive(Debug, Clone, Copy)]
struct ClassLimits {
    window_secs: u64,
    max: u64,
}

#[derive(Debug, Clone, Copy)]
struct LocalWindow {
    window_start_ms: u64,
    count: u64,
}

/// Windowed request counter with sensitive-endpoint classification.
pub struct RateLimiter {
    general: ClassLimits,
    sensitive: ClassLimits,
    sensitive_suffixes: Vec<String>,
    store: Option<Arc<dyn RateStore>>,
    store_healthy: AtomicBool,
    local: Mutex<HashMap<String, LocalWindow>>,
}

impl RateLimiter {
    /// Build the limiter from validated configuration. Unparseable windows
    /// are configuration errors surfaced at startup.
    pub fn new(
        config: &RateLimitsConfig,
        store: Option<Arc<dyn RateStore>>,
    ) -> Result<Self, GatewayError> {
        let limiter = Self {
            general: Self::parse_class("rate_limits.general", &config.general)?,
            sensitive: Self::parse_class("rate_limits.sensitive", &config.sensitive)?,
            sensitive_suffixes: config.sensitive_suffixes.clone(),
            store_healthy: AtomicBool::new(store.is_some()),
            store,
            local: Mutex::new(HashMap::new()),
        };
        metrics::set_rate_store_mode(limiter.store_mode().gauge_value());
        Ok(limiter)
    }

    fn parse_class(field: &str, config: &RateLimitClassConfig) -> Result<ClassLimits, GatewayError> {
        let window = humantime::parse_duration(&config.window).map_err(|err| {
            GatewayError::ConfigError(format!("{field}.window ('{}'): {err}", config.window))
        })?;
        if window.is_zero() || config.max == 0 {
            return Err(GatewayError::ConfigError(format!(
                "{field}: window and max must be greater than zero"
            )));
        }
        Ok(ClassLimits {
            window_secs: window.as_secs().max(1),
            max: config.max,
        })
    }

    /// Classify an inbound path by its sensitive suffixes.
    pub fn classify(&self, path: &str) -> LimitClass {
        let path = path.trim_end_matches('/');
        if self
            .sensitive_suffixes
            .iter()
            .any(|suffix| path.ends_with(suffix.as_str()))
        {
            LimitClass::Sensitive
        } else {
            LimitClass::General
        }
    }

    /// Admission check for one request.
    pub async fn check(&self, class: LimitClass, identity: &str) -> Result<Admission, GatewayError> {
        self.check_at(class, identity, epoch_ms()).await
    }

    /// Admission check at an explicit timestamp.
    pub async fn check_at(
        &self,
        class: LimitClass,
        identity: &str,
        now_ms: u64,
    ) -> Result<Admission, GatewayError> {
        let limits = self.limits(class);
        let window_ms = limits.window_secs * 1000;
        let window_start_ms = now_ms - now_ms % window_ms;

        let count = self
            .count(class, identity, limits, window_start_ms, now_ms)
            .await;

        if count > limits.max {
            let retry_after_secs = (window_start_ms + window_ms).saturating_sub(now_ms).div_ceil(1000);
            metrics::increment_rate_limited(class.as_str());
            tracing::warn!(
                class = class.as_str(),
                identity,
                count,
                limit = limits.max,
                "request rejected by rate limit"
            );
            return Err(GatewayError::RateLimited { retry_after_secs });
        }

        Ok(Admission {
            limit: limits.max,
            remaining: limits.max - count,
        })
    }

    /// Current counting mode, exposed through the health endpoint.
    pub fn store_mode(&self) -> StoreMode {
        match &self.store {
            None => StoreMode::Memory,
            Some(_) if self.store_healthy.load(Ordering::Relaxed) => StoreMode::Shared,
            Some(_) => StoreMode::Degraded,
        }
    }

    /// Drop local counters whose window has elapsed. Called periodically by
    /// the health aggregator; counting stays correct without it, the map
    /// just stops growing.
    pub fn prune_expired(&self, now_ms: u64) -> usize {
        let horizon = self.general.window_secs.max(self.sensitive.window_secs) * 1000;
        let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        let before = local.len();
        local.retain(|_, w| now_ms.saturating_sub(w.window_start_ms) <= horizon);
        before - local.len()
    }

    fn limits(&self, class: LimitClass) -> ClassLimits {
        match class {
            LimitClass::General => self.general,
            LimitClass::Sensitive => self.sensitive,
        }
    }

    async fn count(
        &self,
        class: LimitClass,
        identity: &str,
        limits: ClassLimits,
        window_start_ms: u64,
        _now_ms: u64,
    ) -> u64 {
        if let Some(store) = &self.store {
            let key = format!(
                "breakwater:rl:{}:{identity}:{}",
                class.as_str(),
                window_start_ms / 1000
            );
            match store.increment(&key, limits.window_secs).await {
                Ok(count) => {
                    self.mark_store(true);
                    return count;
                }
                Err(err) => {
                    self.mark_store(false);
                    tracing::debug!(error = %err, "shared rate store access failed");
                }
            }
        }
        self.local_count(class, identity, window_start_ms)
    }

    fn local_count(&self, class: LimitClass, identity: &str, window_start_ms: u64) -> u64 {
        let key = format!("{}:{identity}", class.as_str());
        let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        let window = local.entry(key).or_insert(LocalWindow {
            window_start_ms,
            count: 0,
        });
        if window.window_start_ms != window_start_ms {
            window.window_start_ms = window_start_ms;
            window.count = 0;
        }
        window.count += 1;
        window.count
    }

    /// Flip the store health flag, logging once per transition.
    fn mark_store(&self, healthy: bool) {
        let was = self.store_healthy.swap(healthy, Ordering::Relaxed);
        if was != healthy {
            metrics::set_rate_store_mode(self.store_mode().gauge_value());
            if healthy {
                tracing::info!("shared rate store recovered, resuming distributed counting");
            } else {
                tracing::warn!(
                    "shared rate store unreachable, degrading to in-memory counting"
                );
            }
        }
    }
}

/// Client identity for rate limiting: first `X-Forwarded-For` hop when
/// present, else the peer address.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|hop| hop.trim().to_string())
        .filter(|hop| !hop.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}
