//! Reusable Axum middleware for the gateway edge.
//!
//! These are lightweight composable layers attached to the Axum `Router` to
//! enrich responses and enforce cross-cutting concerns (security headers,
//! CORS, request timing, request ID). They deliberately stay stateless
//! (except for reading shared configuration) to minimize contention.
use std::sync::Arc;

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::metrics;

/// Log start/end of a request including latency, and feed the request
/// counters and duration histogram.
pub async fn request_timing_middleware(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let uri = req.uri().clone();

    tracing::debug!(%method, %uri, "started processing request");
    let timer = metrics::RequestTimer::new(&method);

    let response = next.run(req).await;
    drop(timer);

    metrics::increment_request_total(&method, response.status().as_u16());
    tracing::info!(
        %method,
        %uri,
        status = response.status().as_u16(),
        "completed request"
    );

    response
}

/// Add common security hardening headers.
pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-XSS-Protection",
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}

/// CORS against a configured origin allowlist. An empty allowlist reflects
/// any caller origin; preflight OPTIONS requests are answered at the edge
/// without reaching a backend.
pub async fn cors_middleware(
    req: Request,
    next: Next,
    allowed_origins: Arc<Vec<String>>,
) -> Response {
    let origin = req.headers().get("origin").cloned();
    let allowed = origin.as_ref().filter(|origin| {
        allowed_origins.is_empty()
            || origin
                .to_str()
                .is_ok_and(|o| allowed_origins.iter().any(|a| a == o))
    });

    let mut response = if req.method() == Method::OPTIONS {
        Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty())
            .unwrap_or_default()
    } else {
        next.run(req).await
    };

    if let Some(origin) = allowed.cloned() {
        let headers = response.headers_mut();
        headers.insert("Access-Control-Allow-Origin", origin);
        headers.insert(
            "Access-Control-Allow-Methods",
            HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
        );
        headers.insert(
            "Access-Control-Allow-Headers",
            HeaderValue::from_static("Content-Type, Authorization, X-Requested-With"),
        );
        headers.insert("Access-Control-Max-Age", HeaderValue::from_static("86400"));
    }

    response
}

/// Create a cloneable closure wrapping [`cors_middleware`].
pub fn create_cors_middleware(
    allowed_origins: Arc<Vec<String>>,
) -> impl Fn(Request, Next) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send>>
+ Clone {
    move |req, next| {
        let allowed_origins = allowed_origins.clone();
        Box::pin(async move { cors_middleware(req, next, allowed_origins).await })
    }
}

/// Generate a per-request UUID, forward it upstream and expose it via tracing
/// plus `X-Request-ID` on the response. An inbound ID from a trusted proxy is
/// kept so traces correlate across hops.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert("x-request-id", header_value);
    }

    let span = tracing::info_span!("request", request_id = %request_id);
    let _enter = span.enter();

    let mut response = next.run(req).await;

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-ID", header_value);
    }

    response
}

#[cfg(test)]
mod tests {
    use axum::{Router, middleware, routing::get};
    use tower::ServiceExt; // for oneshot

    use super::*;

    fn ok_app() -> Router {
        Router::new().route(
            "/",
            get(|| async {
                Response::builder()
                    .status(StatusCode::OK)
                    .body(Body::empty())
                    .unwrap()
            }),
        )
    }

    #[tokio::test]
    async fn security_headers_are_added() {
        let app = ok_app().layer(middleware::from_fn(security_headers_middleware));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let headers = response.headers();

        assert!(headers.contains_key("X-Content-Type-Options"));
        assert!(headers.contains_key("X-Frame-Options"));
        assert!(headers.contains_key("X-XSS-Protection"));
        assert!(headers.contains_key("Referrer-Policy"));
    }

    #[tokio::test]
    async fn request_id_is_generated_when_absent() {
        let app = ok_app().layer(middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let request_id = response
            .headers()
            .get("X-Request-ID")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(uuid::Uuid::parse_str(request_id).is_ok());
    }

    #[tokio::test]
    async fn inbound_request_id_is_preserved() {
        let app = ok_app().layer(middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("x-request-id", "upstream-trace-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get("X-Request-ID").unwrap(),
            "upstream-trace-1"
        );
    }

    #[tokio::test]
    async fn cors_reflects_listed_origins_only() {
        let origins = Arc::new(vec!["https://app.example.com".to_string()]);
        let cors = create_cors_middleware(origins);
        let app = ok_app().layer(middleware::from_fn(move |req, next| {
            let cors = cors.clone();
            async move { cors(req, next).await }
        }));

        let allowed = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("origin", "https://app.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            allowed.headers().get("Access-Control-Allow-Origin").unwrap(),
            "https://app.example.com"
        );

        let denied = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("origin", "https://evil.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(
            denied
                .headers()
                .get("Access-Control-Allow-Origin")
                .is_none()
        );
    }

    #[tokio::test]
    async fn cors_preflight_is_answered_at_the_edge() {
        let origins = Arc::new(Vec::new());
        let cors = create_cors_middleware(origins);
        let app = ok_app().layer(middleware::from_fn(move |req, next| {
            let cors = cors.clone();
            async move { cors(req, next).await }
        }));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/anything")
                    .header("origin", "https://app.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response
                .headers()
                .get("Access-Control-Allow-Origin")
                .unwrap(),
            "https://app.example.com"
        );
    }
}
