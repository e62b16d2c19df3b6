use crate::error::{AuthError, Result};
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global Prometheus recorder
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            AuthError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    fn register_metrics() {
        describe_counter!(
            "forward_auth_requests_total",
            "Total number of HTTP requests handled by the auth middleware"
        );
        describe_histogram!(
            "forward_auth_request_duration_seconds",
            "End-to-end request latencies in seconds, including the downstream handler"
        );
        describe_counter!(
            "forward_auth_requests_errors_total",
            "Total number of requests that resulted in errors"
        );
        describe_counter!(
            "forward_auth_auth_attempts_total",
            "Total number of authentication attempts by outcome"
        );
        describe_counter!(
            "forward_auth_auth_failures_total",
            "Total number of failed authentication attempts"
        );
        describe_histogram!(
            "forward_auth_verification_duration_seconds",
            "Verification endpoint latencies in seconds"
        );
        describe_counter!(
            "forward_auth_rewrites_total",
            "Total number of host and path rewrites applied"
        );
        describe_counter!(
            "forward_auth_websocket_sessions_total",
            "WebSocket passthrough sessions by lifecycle stage"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.render(),
    )
}

/// Record a handled request
pub fn record_request(method: &str, path: &str, status: u16, duration: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!("forward_auth_requests_total", &labels).increment(1);
    histogram!("forward_auth_request_duration_seconds", &labels).record(duration);

    if status >= 400 {
        counter!("forward_auth_requests_errors_total", &labels).increment(1);
    }
}

/// Record authentication attempt
pub fn record_auth_attempt(outcome: &str, success: bool) {
    let labels = [("outcome", outcome.to_string())];
    counter!("forward_auth_auth_attempts_total", &labels).increment(1);

    if !success {
        counter!("forward_auth_auth_failures_total", &labels).increment(1);
    }
}

/// Record a call to the verification endpoint
pub fn record_verification(outcome: &str, duration: f64) {
    let labels = [("outcome", outcome.to_string())];
    histogram!("forward_auth_verification_duration_seconds", &labels).record(duration);
}

/// Record an applied rewrite ("host" or "path")
pub fn record_rewrite(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!("forward_auth_rewrites_total", &labels).increment(1);
}

/// Record a WebSocket session lifecycle stage
pub fn record_websocket_session(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!("forward_auth_websocket_sessions_total", &labels).increment(1);
}

/// Sanitize path for metrics to avoid cardinality explosion
fn sanitize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if is_likely_id(seg) {
                ":id"
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Check if a path segment is likely an ID (numeric, UUID, hash)
fn is_likely_id(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }

    if segment.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }

    if segment.len() >= 32 && segment.contains('-') {
        return segment.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
    }

    segment.len() > 10
        && segment.chars().all(|c| c.is_alphanumeric())
        && segment.chars().any(|c| c.is_numeric())
        && segment.chars().any(|c| c.is_alphabetic())
}

/// Timer for measuring request duration
pub struct Timer {
    start: Instant,
    method: String,
    path: String,
}

impl Timer {
    /// Start a new timer for a request
    pub fn new(method: String, path: String) -> Self {
        Self {
            start: Instant::now(),
            method,
            path,
        }
    }

    /// Record the elapsed time with the given status code
    pub fn record(self, status: u16) {
        record_request(&self.method, &self.path, status, self.elapsed());
    }

    /// Get the elapsed time in seconds
    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
