use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// Upstream HTTP client using Hyper with Rustls (HTTP/1.1 + HTTP/2).
///
/// Every proxied call runs under the configured timeout; an elapsed budget
/// surfaces as [`HttpClientError::Timeout`] so the dispatcher can record it
/// against the breaker and map it to a 504 distinctly from connection
/// failures. Circuit breaking itself lives in the router, not here.
pub struct UpstreamHttpClient {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
    timeout_ms: u64,
}

impl UpstreamHttpClient {
    /// Create a new upstream client with the given per-call budget.
    pub fn new(timeout_ms: u64) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("failed to add a native certificate to the rustls root store");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        tracing::info!(timeout_ms, "created upstream HTTP client");
        Ok(Self { client, timeout_ms })
    }

    /// Stamp a default User-Agent if the caller did not forward one.
    fn add_common_headers(req: &mut Request<AxumBody>) {
        let headers = req.headers_mut();
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(
                header::USER_AGENT,
                HeaderValue::from_static("Breakwater-Gateway/0.1"),
            );
        }
    }
}

#[async_trait]
impl HttpClient for UpstreamHttpClient {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        Self::add_common_headers(&mut req);

        let client = self.client.clone();

        let target = format!(
            "{}://{}",
            req.uri().scheme_str().unwrap_or("http"),
            req.uri()
                .authority()
                .map_or_else(|| "unknown".to_string(), |a| a.to_string())
        );
        let method = req.method().to_string();

        let span = tracing::info_span!(
            "upstream_request",
            upstream.target = %target,
            http.method = %method,
            http.path = %req.uri().path(),
            http.status_code = tracing::field::Empty,
        );
        let _enter = span.enter();

        // The Host header must match the rewritten target, not the gateway.
        let host_value = match req.uri().host() {
            Some(host) => {
                let formatted = match req.uri().port() {
                    Some(port) => format!("{host}:{}", port.as_u16()),
                    None => host.to_string(),
                };
                HeaderValue::from_str(&formatted)
                    .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?
            }
            None => {
                return Err(HttpClientError::InvalidRequest(
                    "Outgoing URI has no host".to_string(),
                ));
            }
        };
        req.headers_mut().insert(header::HOST, host_value);

        let (mut parts, body) = req.into_parts();
        // ALPN negotiates the actual version from an HTTP/1.1 request.
        parts.version = Version::HTTP_11;
        let outgoing = Request::from_parts(parts, body);

        let uri_for_log = outgoing.uri().clone();
        let budget = Duration::from_millis(self.timeout_ms);

        match timeout(budget, client.request(outgoing)).await {
            Ok(Ok(response)) => {
                tracing::Span::current().record("http.status_code", response.status().as_u16());

                let (mut parts, hyper_body) = response.into_parts();
                // The body is re-framed by the server side; drop stale framing.
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Ok(Err(e)) => {
                tracing::warn!(uri = %uri_for_log, error = %e, "upstream request failed");
                Err(HttpClientError::ConnectionError(format!(
                    "Request to {method} {uri_for_log} failed: {e}"
                )))
            }
            Err(_) => {
                tracing::warn!(uri = %uri_for_log, timeout_ms = self.timeout_ms, "upstream request timed out");
                Err(HttpClientError::Timeout(self.timeout_ms))
            }
        }
    }
}
