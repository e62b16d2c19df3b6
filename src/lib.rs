pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod proxy;
pub mod rewrite;

use crate::auth::{forward_auth_middleware, ForwardAuth};
use crate::config::ForwardAuthConfig;
use crate::error::{AuthError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use crate::observability::{request_id_middleware, TracingSink};
use crate::proxy::{proxy_handler, websocket::WebSocketProxy, ProxyState};
use axum::{
    middleware,
    routing::{any, get},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Put `auth` in front of a reverse proxy to the upstream in `proxy_state`
pub fn build_app(auth: Arc<ForwardAuth>, proxy_state: ProxyState) -> Router {
    Router::new()
        .route("/", any(proxy_handler))
        .route("/*path", any(proxy_handler))
        .with_state(proxy_state)
        .layer(middleware::from_fn_with_state(auth, forward_auth_middleware))
}

/// Initialize the forward-auth server
pub async fn init_server(config: ForwardAuthConfig) -> Result<()> {
    config.validate()?;

    info!("Starting forward-auth");
    info!(
        "Server listening on {}:{}",
        config.server.host, config.server.port
    );

    let timeout = Duration::from_secs(config.server.timeout_secs);
    let auth = ForwardAuth::new(&config.auth, Arc::new(TracingSink))?
        .with_websocket_upstream(WebSocketProxy::new(&config.upstream, timeout)?);
    let proxy_state = ProxyState::new(&config.upstream, timeout)?;
    info!(upstream = %config.upstream, "Forwarding authorized requests");

    let mut app = build_app(Arc::new(auth), proxy_state);

    if let Some(path) = &config.server.metrics_path {
        app = Router::new()
            .route(path, get(metrics_handler))
            .with_state(MetricsService::new()?)
            .fallback_service(app);
        info!(path = %path, "Metrics endpoint enabled");
    }

    let app = app
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(AuthError::Io)?;

    info!("forward-auth ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AuthError::Internal(format!("Server error: {}", e)))?;

    if config.tracing.is_some() {
        observability::shutdown_telemetry();
    }

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
