//! Route resolution and breaker-gated dispatch.
//!
//! The [`RequestRouter`] owns the prefix table, the circuit breaker registry
//! and the upstream HTTP client port. Resolution is pure string work; only
//! [`RequestRouter::dispatch`] touches the network, and every call outcome is
//! fed back into the owning service's breaker.

use std::{fmt, str::FromStr, sync::Arc};

use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

use crate::{
    config::models::RouteConfig,
    core::breaker::CircuitBreakerRegistry,
    error::GatewayError,
    metrics,
    ports::http_client::{HttpClient, HttpClientError},
};

/// Errors raised while building the route table.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RouteError {
    /// Backend URL did not pass validation
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    /// Route prefix did not pass validation
    #[error("Invalid route prefix: {0}")]
    InvalidPrefix(String),
}

/// A validated backend base URL.
///
/// The trailing slash is trimmed so rewritten paths (which always start with
/// `/`) can be appended directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendUrl {
    url: String,
    is_secure: bool,
}

impl BackendUrl {
    pub fn new(url: &str) -> Result<Self, RouteError> {
        let is_secure = url.starts_with("https://");
        let is_http = url.starts_with("http://");

        if !is_secure && !is_http {
            return Err(RouteError::InvalidUrl(format!(
                "backend URL must start with http:// or https://, got: {url}"
            )));
        }

        // trim_end_matches strips the scheme's own slashes on a host-less
        // URL, so compare against the bare scheme.
        let trimmed = url.trim_end_matches('/');
        if trimmed == "http:" || trimmed == "https:" {
            return Err(RouteError::InvalidUrl(format!(
                "backend URL has no host: {url}"
            )));
        }

        Ok(BackendUrl {
            url: trimmed.to_string(),
            is_secure,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn is_secure(&self) -> bool {
        self.is_secure
    }
}

impl FromStr for BackendUrl {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendUrl::new(s)
    }
}

impl fmt::Display for BackendUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// One entry of the prefix table.
#[derive(Debug, Clone)]
pub struct Route {
    pub prefix: String,
    pub service: String,
    pub backend: BackendUrl,
    pub requires_auth: bool,
    /// Remaps applied to the stripped remainder, first match wins.
    pub path_map: Vec<(String, String)>,
}

impl Route {
    fn from_config(config: &RouteConfig) -> Result<Self, RouteError> {
        if !config.prefix.starts_with('/') || config.prefix.ends_with('/') {
            return Err(RouteError::InvalidPrefix(format!(
                "route prefix must start with '/' and not end with one: {}",
                config.prefix
            )));
        }
        Ok(Self {
            prefix: config.prefix.clone(),
            service: config.service.clone(),
            backend: BackendUrl::new(&config.backend_url)?,
            requires_auth: config.requires_auth,
            path_map: config
                .path_map
                .iter()
                .map(|m| (m.from.clone(), m.to.clone()))
                .collect(),
        })
    }

    /// Prefix match on segment boundaries: `/api/jobs` matches `/api/jobs`
    /// and `/api/jobs/123` but never `/api/jobsX`.
    fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// A resolved inbound request: which service to call and with what target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub service: String,
    pub requires_auth: bool,
    /// Fully qualified upstream URI (backend base + rewritten path + query).
    pub target_uri: String,
}

/// Resolves inbound paths to backends and performs gated dispatch.
pub struct RequestRouter {
    routes: Vec<Route>,
    breakers: Arc<CircuitBreakerRegistry>,
    client: Arc<dyn HttpClient>,
}

impl RequestRouter {
    pub fn new(
        route_configs: &[RouteConfig],
        breakers: Arc<CircuitBreakerRegistry>,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self, RouteError> {
        let routes = route_configs
            .iter()
            .map(Route::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            routes,
            breakers,
            client,
        })
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Longest-prefix match over the route table.
    pub fn find_route(&self, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|route| route.matches(path))
            .max_by_key(|route| route.prefix.len())
    }

    /// Resolve an inbound path and optional query to an upstream target.
    ///
    /// The matched prefix is stripped and the remainder forwarded. A
    /// remainder left empty keeps a leading `/` so a bare query becomes
    /// `/?query`, never `?query` — root-route matchers downstream need the
    /// slash.
    pub fn resolve(&self, path: &str, query: Option<&str>) -> Option<ResolvedRequest> {
        let route = self.find_route(path)?;

        let rest = &path[route.prefix.len()..];
        let mut rewritten = if rest.is_empty() {
            "/".to_string()
        } else {
            rest.to_string()
        };

        for (from, to) in &route.path_map {
            if let Some(tail) = rewritten.strip_prefix(from.as_str()) {
                rewritten = format!("{to}{tail}");
                break;
            }
        }

        if let Some(query) = query {
            rewritten.push('?');
            rewritten.push_str(query);
        }

        Some(ResolvedRequest {
            service: route.service.clone(),
            requires_auth: route.requires_auth,
            target_uri: format!("{}{rewritten}", route.backend),
        })
    }

    /// Send a request to the service's backend, gated by its breaker.
    ///
    /// A rejected admission returns [`GatewayError::CircuitOpen`] without any
    /// network contact. Responses below 500 (4xx included) count as
    /// successes; 5xx, connection failures and timeouts are recorded as
    /// breaker failures and mapped to upstream errors.
    pub async fn dispatch(
        &self,
        service: &str,
        req: Request<AxumBody>,
    ) -> Result<Response<AxumBody>, GatewayError> {
        let breaker = self.breakers.breaker(service);

        if !breaker.allow_request() {
            metrics::increment_breaker_rejection(service);
            tracing::warn!(service, "request blocked by open circuit breaker");
            return Err(GatewayError::CircuitOpen {
                service: service.to_string(),
                snapshot: breaker.blocked_snapshot(),
            });
        }

        let timer = metrics::UpstreamTimer::new(service.to_string());
        let outcome = self.client.send_request(req).await;
        drop(timer);

        match outcome {
            Ok(response) if response.status().is_server_error() => {
                breaker.record_failure();
                metrics::increment_upstream_result(service, "server_error");
                tracing::warn!(
                    service,
                    status = response.status().as_u16(),
                    "upstream returned a server error"
                );
                Err(GatewayError::UpstreamError {
                    service: service.to_string(),
                    detail: format!("upstream returned {}", response.status()),
                })
            }
            Ok(response) => {
                breaker.record_success();
                metrics::increment_upstream_result(service, "success");
                Ok(response)
            }
            Err(HttpClientError::Timeout(timeout_ms)) => {
                breaker.record_failure();
                metrics::increment_upstream_result(service, "timeout");
                tracing::warn!(service, timeout_ms, "upstream call timed out");
                Err(GatewayError::UpstreamTimeout {
                    service: service.to_string(),
                    timeout_ms,
                })
            }
            Err(err) => {
                breaker.record_failure();
                metrics::increment_upstream_result(service, "error");
                tracing::warn!(service, error = %err, "upstream call failed");
                Err(GatewayError::UpstreamError {
                    service: service.to_string(),
                    detail: err.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use async_trait::async_trait;
    use http::StatusCode;

    use super::*;
    use crate::{
        config::models::{BreakerConfig, PathMapEntry},
        core::breaker::CircuitState,
        ports::http_client::HttpClientResult,
    };

    struct MockHttpClient {
        outcomes: Mutex<VecDeque<HttpClientResult<Response<AxumBody>>>>,
    }

    impl MockHttpClient {
        fn new(outcomes: Vec<HttpClientResult<Response<AxumBody>>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
            })
        }

        fn status(code: StatusCode) -> HttpClientResult<Response<AxumBody>> {
            Ok(Response::builder()
                .status(code)
                .body(AxumBody::empty())
                .unwrap())
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn send_request(
            &self,
            _req: Request<AxumBody>,
        ) -> HttpClientResult<Response<AxumBody>> {
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Self::status(StatusCode::OK))
        }
    }

    fn route(prefix: &str, service: &str, backend: &str) -> RouteConfig {
        RouteConfig {
            prefix: prefix.to_string(),
            service: service.to_string(),
            backend_url: backend.to_string(),
            requires_auth: false,
            path_map: Vec::new(),
        }
    }

    fn router_with(
        routes: &[RouteConfig],
        client: Arc<dyn HttpClient>,
    ) -> (RequestRouter, Arc<CircuitBreakerRegistry>) {
        let breakers = Arc::new(CircuitBreakerRegistry::new(BreakerConfig::default()));
        let router = RequestRouter::new(routes, Arc::clone(&breakers), client).unwrap();
        (router, breakers)
    }

    fn job_routes() -> Vec<RouteConfig> {
        vec![
            route("/api/jobs", "job-service", "http://localhost:5003/api/jobs"),
            route("/api/auth", "auth-service", "http://localhost:5001/api/auth"),
        ]
    }

    #[test]
    fn backend_url_requires_http_scheme() {
        assert!(BackendUrl::new("ftp://example.com").is_err());
        assert!(BackendUrl::new("localhost:5003").is_err());
        assert!(BackendUrl::new("https://").is_err());
        assert!(BackendUrl::new("http://").is_err());
        assert!(BackendUrl::new("http:///").is_err());
        let url = BackendUrl::new("https://example.com/base/").unwrap();
        assert_eq!(url.as_str(), "https://example.com/base");
        assert!(url.is_secure());
    }

    #[test]
    fn bare_query_keeps_a_leading_slash() {
        let (router, _) = router_with(&job_routes(), MockHttpClient::new(vec![]));
        let resolved = router.resolve("/api/jobs", Some("status=open")).unwrap();
        assert_eq!(
            resolved.target_uri,
            "http://localhost:5003/api/jobs/?status=open"
        );
    }

    #[test]
    fn strips_prefix_and_forwards_remainder() {
        let (router, _) = router_with(&job_routes(), MockHttpClient::new(vec![]));

        let bare = router.resolve("/api/jobs", None).unwrap();
        assert_eq!(bare.target_uri, "http://localhost:5003/api/jobs/");
        assert_eq!(bare.service, "job-service");

        let nested = router.resolve("/api/jobs/123/applications", None).unwrap();
        assert_eq!(
            nested.target_uri,
            "http://localhost:5003/api/jobs/123/applications"
        );

        let with_query = router
            .resolve("/api/jobs/123", Some("include=employer"))
            .unwrap();
        assert_eq!(
            with_query.target_uri,
            "http://localhost:5003/api/jobs/123?include=employer"
        );
    }

    #[test]
    fn prefix_matching_respects_segment_boundaries() {
        let (router, _) = router_with(&job_routes(), MockHttpClient::new(vec![]));
        assert!(router.resolve("/api/jobsearch", None).is_none());
        assert!(router.resolve("/api/unknown", None).is_none());
    }

    #[test]
    fn longest_prefix_wins() {
        let mut routes = job_routes();
        routes.push(route(
            "/api/jobs/contracts",
            "contract-service",
            "http://localhost:5007",
        ));
        let (router, _) = router_with(&routes, MockHttpClient::new(vec![]));

        let resolved = router.resolve("/api/jobs/contracts/42", None).unwrap();
        assert_eq!(resolved.service, "contract-service");
        assert_eq!(resolved.target_uri, "http://localhost:5007/42");
    }

    #[test]
    fn path_map_remaps_the_stripped_remainder() {
        let mut config = route(
            "/api/payments",
            "payment-service",
            "http://localhost:5004/api/payments",
        );
        config.path_map = vec![PathMapEntry {
            from: "/methods".to_string(),
            to: "/payment-methods".to_string(),
        }];
        let (router, _) = router_with(&[config], MockHttpClient::new(vec![]));

        let resolved = router.resolve("/api/payments/methods", None).unwrap();
        assert_eq!(
            resolved.target_uri,
            "http://localhost:5004/api/payments/payment-methods"
        );

        // Untouched when no remap matches.
        let other = router.resolve("/api/payments/history", None).unwrap();
        assert_eq!(
            other.target_uri,
            "http://localhost:5004/api/payments/history"
        );
    }

    #[test]
    fn invalid_route_config_is_rejected() {
        let breakers = Arc::new(CircuitBreakerRegistry::new(BreakerConfig::default()));
        let bad_backend = [route("/api/jobs", "job-service", "not-a-url")];
        assert!(
            RequestRouter::new(&bad_backend, Arc::clone(&breakers), MockHttpClient::new(vec![]))
                .is_err()
        );

        let bad_prefix = [route("api/jobs", "job-service", "http://localhost:5003")];
        assert!(RequestRouter::new(&bad_prefix, breakers, MockHttpClient::new(vec![])).is_err());
    }

    fn proxy_req() -> Request<AxumBody> {
        Request::builder()
            .uri("http://localhost:5003/api/jobs/")
            .body(AxumBody::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn dispatch_records_success_and_returns_response() {
        let client = MockHttpClient::new(vec![MockHttpClient::status(StatusCode::OK)]);
        let (router, breakers) = router_with(&job_routes(), client);

        let response = router.dispatch("job-service", proxy_req()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            breakers.breaker("job-service").state(),
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn dispatch_maps_5xx_to_upstream_error_and_records_failure() {
        let client = MockHttpClient::new(vec![MockHttpClient::status(
            StatusCode::INTERNAL_SERVER_ERROR,
        )]);
        let (router, breakers) = router_with(&job_routes(), client);

        let err = router
            .dispatch("job-service", proxy_req())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamError { .. }));
        assert_eq!(
            breakers
                .breaker("job-service")
                .health_metrics()
                .failure_count,
            1
        );
    }

    #[tokio::test]
    async fn dispatch_treats_4xx_as_success_for_the_breaker() {
        let client = MockHttpClient::new(vec![MockHttpClient::status(StatusCode::NOT_FOUND)]);
        let (router, breakers) = router_with(&job_routes(), client);

        let response = router.dispatch("job-service", proxy_req()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            breakers
                .breaker("job-service")
                .health_metrics()
                .failure_count,
            0
        );
    }

    #[tokio::test]
    async fn dispatch_maps_timeouts_distinctly() {
        let client = MockHttpClient::new(vec![Err(HttpClientError::Timeout(30_000))]);
        let (router, breakers) = router_with(&job_routes(), client);

        let err = router
            .dispatch("job-service", proxy_req())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::UpstreamTimeout {
                timeout_ms: 30_000,
                ..
            }
        ));
        assert_eq!(
            breakers
                .breaker("job-service")
                .health_metrics()
                .failure_count,
            1
        );
    }

    #[tokio::test]
    async fn dispatch_blocks_without_network_contact_when_open() {
        // A single queued outcome: if the breaker consulted the network it
        // would be consumed.
        let client = MockHttpClient::new(vec![MockHttpClient::status(StatusCode::OK)]);
        let (router, breakers) = router_with(&job_routes(), Arc::clone(&client) as _);

        let breaker = breakers.breaker("job-service");
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = router
            .dispatch("job-service", proxy_req())
            .await
            .unwrap_err();
        match err {
            GatewayError::CircuitOpen { service, snapshot } => {
                assert_eq!(service, "job-service");
                assert_eq!(snapshot.failure_count, 5);
                assert!(snapshot.next_retry_in_ms > 0);
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
        assert_eq!(client.outcomes.lock().unwrap().len(), 1);
    }
}
