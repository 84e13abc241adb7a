//! Breakwater - a resilience layer for a job-marketplace API gateway.
//!
//! Breakwater fronts a fleet of job-board microservices (auth, users, jobs,
//! payments, messaging) and keeps the edge stable when they are not: it
//! implements a **hexagonal architecture** with per-backend circuit breaking,
//! health-aware request dispatch with path rewriting, a signed-token
//! lifecycle, and rate-limit admission control. This library exposes the
//! building blocks so the gateway can be embedded or composed inside another
//! application.
//!
//! # Features
//! - Per-service circuit breakers (CLOSED / OPEN / HALF_OPEN) with a shared
//!   registry and aggregated health reporting
//! - Longest-prefix routing with prefix stripping and per-route path remaps
//! - HS256 access/refresh token issuance and verification with distinct
//!   secrets, expired-vs-invalid discrimination at the edge
//! - Fixed-window rate limiting with a sensitive-endpoint class, optional
//!   shared (redis) counting and observable in-memory degradation
//! - Composite health endpoints (`/health`, `/health/services`)
//! - Metrics via the `metrics` facade & structured tracing via `tracing`
//! - Graceful shutdown
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use breakwater::{
//!     UpstreamHttpClient,
//!     config::loader::load_config,
//!     core::{CircuitBreakerRegistry, RequestRouter},
//! };
//!
//! # fn main() -> eyre::Result<()> {
//! let cfg = load_config("config.toml")?;
//! let breakers = Arc::new(CircuitBreakerRegistry::new(cfg.breaker.clone()));
//! let client = Arc::new(UpstreamHttpClient::new(30_000)?);
//! let router = RequestRouter::new(&cfg.routes, breakers, client)?;
//! // You would normally wire this into the GatewayHttpHandler (see binary crate)
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping business logic inside `core`. End users should prefer the
//! re-exports documented below instead of reaching into internal modules
//! directly.
//!
//! # Error Handling
//! Request-path failures use the [`error::GatewayError`] taxonomy so every
//! client-observable outcome has exactly one status and wire shape. Startup
//! and wiring errors return `eyre::Result<T>` with context attached via
//! `WrapErr`.
//!
//! # Concurrency & Data Structures
//! For shared mutable maps the project uses `scc::HashMap` instead of
//! `dashmap` to maintain predictable performance characteristics under
//! contention.
//!
//! See README for configuration and deployment patterns.
pub mod config;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{GatewayHttpHandler, HealthAggregator, RedisRateStore, UpstreamHttpClient},
    core::{CircuitBreakerRegistry, RateLimiter, RequestRouter, TokenService},
    error::GatewayError,
    ports::{http_client::HttpClient, rate_store::RateStore},
    utils::GracefulShutdown,
};
