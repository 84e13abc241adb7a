use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body as AxumBody,
    http::{StatusCode, Uri, header},
};
use eyre::{Result, WrapErr};
use hyper::{Request, Response};

use crate::{
    adapters::health_aggregator::HealthAggregator,
    core::{
        rate_limiter::{RateLimiter, client_identity},
        router::RequestRouter,
        token::TokenService,
    },
    error::GatewayError,
};

/// Edge request pipeline: health endpoints, admission, auth, then proxy.
///
/// Admission order is deliberate: the rate limiter runs before token
/// verification so unauthenticated floods burn their budget without costing
/// signature checks, and routing runs after both so a 404 still counts
/// against the caller's window.
pub struct GatewayHttpHandler {
    router: Arc<RequestRouter>,
    tokens: Arc<TokenService>,
    limiter: Arc<RateLimiter>,
    aggregator: Arc<HealthAggregator>,
}

impl GatewayHttpHandler {
    pub fn new(
        router: Arc<RequestRouter>,
        tokens: Arc<TokenService>,
        limiter: Arc<RateLimiter>,
        aggregator: Arc<HealthAggregator>,
    ) -> Self {
        Self {
            router,
            tokens,
            limiter,
            aggregator,
        }
    }

    pub async fn handle_request(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<AxumBody>> {
        let path = req.uri().path().to_string();

        match path.as_str() {
            "/health" => self.handle_liveness(),
            "/health/services" => self.handle_service_health(),
            _ => self.handle_proxy_request(req, client_addr).await,
        }
    }

    /// Plain liveness: the gateway process is up and serving.
    fn handle_liveness(&self) -> Result<Response<AxumBody>> {
        let body = serde_json::json!({
            "status": "ok",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        json_response(StatusCode::OK, &body)
    }

    /// Composite health: per-service breaker views plus the rate-store mode.
    fn handle_service_health(&self) -> Result<Response<AxumBody>> {
        let snapshot = self.aggregator.snapshot();
        let body = serde_json::to_value(&snapshot)
            .wrap_err("Failed to serialize the health snapshot")?;
        json_response(StatusCode::OK, &body)
    }

    async fn handle_proxy_request(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<AxumBody>> {
        let path = req.uri().path().to_string();
        let query = req.uri().query().map(str::to_string);

        let identity = client_identity(req.headers(), client_addr);
        let class = self.limiter.classify(&path);
        if let Err(err) = self.limiter.check(class, &identity).await {
            return error_response(&err);
        }

        let Some(resolved) = self.router.resolve(&path, query.as_deref()) else {
            tracing::debug!(path, "no route matched");
            let body = serde_json::json!({
                "error": "Not Found",
                "message": format!("No route matches {path}"),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            });
            return json_response(StatusCode::NOT_FOUND, &body);
        };

        if resolved.requires_auth {
            if let Err(err) = self.authorize(&req) {
                tracing::debug!(path, error = %err, "request failed authentication");
                return error_response(&err);
            }
        }

        let upstream_req = build_upstream_request(req, &resolved.target_uri, client_addr)
            .wrap_err("Failed to build the upstream request")?;

        match self.router.dispatch(&resolved.service, upstream_req).await {
            Ok(response) => Ok(response),
            Err(err) => error_response(&err),
        }
    }

    fn authorize(&self, req: &Request<AxumBody>) -> Result<(), GatewayError> {
        let header = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| GatewayError::TokenInvalid("missing Authorization header".into()))?;

        let token = TokenService::extract_token_from_header(header)
            .ok_or_else(|| GatewayError::TokenInvalid("malformed bearer credentials".into()))?;

        self.tokens.verify_access_token(token).map(|_| ())
    }
}

/// Retarget an inbound request at its resolved upstream URI, stamping the
/// forwarding headers backends expect.
fn build_upstream_request(
    req: Request<AxumBody>,
    target_uri: &str,
    client_addr: Option<SocketAddr>,
) -> Result<Request<AxumBody>> {
    let (mut parts, body) = req.into_parts();
    parts.uri = target_uri
        .parse::<Uri>()
        .wrap_err_with(|| format!("Invalid upstream URI: {target_uri}"))?;

    if let Some(addr) = client_addr {
        let hop = addr.ip().to_string();
        // Append to an existing chain rather than replacing it.
        let forwarded = match parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            Some(existing) => format!("{existing}, {hop}"),
            None => hop,
        };
        if let Ok(value) = header::HeaderValue::from_str(&forwarded) {
            parts.headers.insert("x-forwarded-for", value);
        }
    }
    if !parts.headers.contains_key("x-forwarded-proto") {
        parts
            .headers
            .insert("x-forwarded-proto", header::HeaderValue::from_static("http"));
    }

    Ok(Request::from_parts(parts, body))
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Result<Response<AxumBody>> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(AxumBody::from(body.to_string()))
        .wrap_err("Failed to build a JSON response")
}

/// Map a gateway error to its wire shape. Rate-limit rejections also carry
/// the standard `Retry-After` hint.
fn error_response(err: &GatewayError) -> Result<Response<AxumBody>> {
    let mut builder = Response::builder()
        .status(err.status())
        .header(header::CONTENT_TYPE, "application/json");

    if let GatewayError::RateLimited { retry_after_secs } = err {
        builder = builder.header(header::RETRY_AFTER, retry_after_secs.to_string());
    }

    builder
        .body(AxumBody::from(err.body().to_string()))
        .wrap_err("Failed to build an error response")
}
