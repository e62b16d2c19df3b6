pub mod websocket;

use crate::error::{AuthError, Result};
use axum::{
    body::Body,
    extract::State,
    http::{Request, Response},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// State of the default next handler: a plain reverse proxy to one upstream
#[derive(Clone)]
pub struct ProxyState {
    pub client: reqwest::Client,
    pub upstream: Arc<str>,
}

impl ProxyState {
    /// Create a new proxy state
    pub fn new(upstream: &str, timeout: Duration) -> Result<Self> {
        if !upstream.starts_with("http://") && !upstream.starts_with("https://") {
            return Err(AuthError::Config(format!(
                "upstream must start with http:// or https://, got '{}'",
                upstream
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            upstream: Arc::from(upstream.trim_end_matches('/')),
        })
    }

    /// Upstream URL for a request path and query
    pub fn upstream_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.upstream, path_and_query)
    }
}

/// Forward an authorized request to the upstream and stream its response back
pub async fn proxy_handler(
    State(state): State<ProxyState>,
    req: Request<Body>,
) -> Result<Response<Body>> {
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let upstream_url = state.upstream_url(path_and_query);

    debug!(method = %parts.method, upstream_url = %upstream_url, "Forwarding to upstream");

    let mut upstream_req = state
        .client
        .request(parts.method.clone(), &upstream_url)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()));

    // Host travels as-is so upstreams see the rewritten authority
    for (name, value) in parts.headers.iter() {
        if !is_hop_by_hop_header(name.as_str()) {
            upstream_req = upstream_req.header(name, value);
        }
    }

    let upstream_response = upstream_req.send().await.map_err(|e| {
        warn!(error = %e, upstream_url = %upstream_url, "Upstream request failed");
        if e.is_timeout() {
            AuthError::Timeout(format!("Upstream request timed out: {}", e))
        } else if e.is_connect() {
            AuthError::Backend(format!("Failed to connect to upstream: {}", e))
        } else {
            AuthError::Proxy(format!("Upstream request failed: {}", e))
        }
    })?;

    let mut response_builder = Response::builder().status(upstream_response.status());
    for (name, value) in upstream_response.headers().iter() {
        if !is_hop_by_hop_header(name.as_str()) {
            response_builder = response_builder.header(name, value);
        }
    }

    response_builder
        .body(Body::from_stream(upstream_response.bytes_stream()))
        .map_err(|e| AuthError::Internal(format!("Failed to build response: {}", e)))
}

/// Check if a header is a hop-by-hop header that should not be forwarded
pub(crate) fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
