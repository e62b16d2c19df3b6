pub mod events;

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{self, RandomIdGenerator, Sampler},
    Resource,
};
use serde::{Deserialize, Serialize};
use tracing::{info, Span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::error::{AuthError, Result};

pub use events::{AuthEvent, EventSink, NoopSink, TracingSink};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const DEFAULT_FILTER: &str = "forward_auth=debug,tower_http=debug";

/// Configuration for OpenTelemetry tracing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317")
    pub otlp_endpoint: String,
    /// Service name for traces
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Sample rate (0.0 to 1.0)
    pub sample_rate: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: "http://localhost:4317".to_string(),
            service_name: "forward-auth".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            sample_rate: 1.0,
        }
    }
}

/// Install the OTLP pipeline and return its tracer
pub fn init_telemetry(config: &TracingConfig) -> Result<opentelemetry_sdk::trace::Tracer> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(&config.otlp_endpoint);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            trace::config()
                .with_sampler(Sampler::TraceIdRatioBased(config.sample_rate))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", config.service_name.clone()),
                    KeyValue::new("service.version", config.service_version.clone()),
                ])),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .map_err(|e| AuthError::Internal(format!("Failed to install tracer: {}", e)))
}

/// Initialize tracing, exporting spans over OTLP when configured.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(otel_config: Option<&TracingConfig>) -> Result<()> {
    match otel_config {
        Some(config) => {
            let tracer = init_telemetry(config)?;
            tracing_subscriber::registry()
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .with(env_filter())
                .with(tracing_subscriber::fmt::layer().with_target(false).compact())
                .try_init()
                .map_err(|e| AuthError::Internal(format!("Failed to install subscriber: {}", e)))?;

            info!(
                endpoint = %config.otlp_endpoint,
                service = %config.service_name,
                "Tracing initialized with OpenTelemetry export"
            );
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(tracing_subscriber::fmt::layer().with_target(false).compact())
                .try_init()
                .map_err(|e| AuthError::Internal(format!("Failed to install subscriber: {}", e)))?;

            info!("Tracing initialized");
        }
    }

    Ok(())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into())
}

/// Flush and shut down the OpenTelemetry pipeline
pub fn shutdown_telemetry() {
    info!("Shutting down OpenTelemetry");
    global::shutdown_tracer_provider();
}

/// Middleware to add request ID to requests
pub async fn request_id_middleware(mut req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Span::current().record("request_id", &request_id);
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

/// Request ID extension type
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Extract request ID from request extensions
pub fn get_request_id(req: &Request<Body>) -> Option<String> {
    req.extensions().get::<RequestId>().map(|id| id.0.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn test_tracing_config_default() {
        let config = TracingConfig::default();
        assert_eq!(config.otlp_endpoint, "http://localhost:4317");
        assert_eq!(config.service_name, "forward-auth");
        assert_eq!(config.sample_rate, 1.0);
    }

    #[test]
    fn test_tracing_config_partial_yaml() {
        let config: TracingConfig =
            serde_yaml::from_str("otlp_endpoint: \"http://collector:4317\"").unwrap();
        assert_eq!(config.otlp_endpoint, "http://collector:4317");
        assert_eq!(config.service_name, "forward-auth");
    }

    #[test]
    fn test_init_tracing_installs_once() {
        assert!(init_tracing(None).is_ok());
        assert!(matches!(init_tracing(None), Err(AuthError::Internal(_))));
    }

    async fn echo_request_id(req: Request<Body>) -> String {
        get_request_id(&req).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_request_id_is_preserved() {
        let app = Router::new()
            .route("/", get(echo_request_id))
            .layer(middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(REQUEST_ID_HEADER, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-42");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"req-42");
    }

    #[tokio::test]
    async fn test_request_id_is_generated() {
        let app = Router::new()
            .route("/", get(echo_request_id))
            .layer(middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert_eq!(id.len(), 36);
    }
}
