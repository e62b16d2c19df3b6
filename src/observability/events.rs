//! Structured events emitted by the authorization pipeline.
//!
//! The pipeline reports what happened through an [`EventSink`] instead of
//! logging inline. [`TracingSink`] is the production sink; tests and
//! embedders can supply their own.

use crate::config::CredentialSource;
use crate::error::AuthError;
use crate::metrics;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A single observation from the authorization pipeline
#[derive(Debug)]
pub enum AuthEvent<'a> {
    /// Static bypass mode was installed
    StaticBypassEnabled { email: &'a str, header: &'a str },
    /// No usable credential on the request
    CredentialMissing {
        source: &'a CredentialSource,
        cookies_seen: usize,
    },
    /// The verifier accepted the credential
    Verified { email: &'a str, elapsed: Duration },
    /// The verifier rejected the credential or could not be used
    VerificationFailed {
        error: &'a AuthError,
        elapsed: Duration,
    },
    /// Identity injected without verification
    StaticIdentity { email: &'a str },
    HostRewritten { from: &'a str, to: &'a str },
    PathRewritten { from: &'a str, to: &'a str },
    /// Rewrite configuration could not be applied to the request
    Misconfigured { error: &'a AuthError },
    /// A WebSocket session was opened to the upstream
    WebSocketOpened { target: &'a str },
    /// A WebSocket upstream could not be reached
    WebSocketFailed { target: &'a str, error: &'a AuthError },
    /// A relayed WebSocket session ended
    WebSocketClosed {
        target: &'a str,
        error: Option<&'a AuthError>,
    },
}

impl AuthEvent<'_> {
    /// Stable event name, suitable for metrics labels and assertions
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::StaticBypassEnabled { .. } => "static_bypass_enabled",
            AuthEvent::CredentialMissing { .. } => "credential_missing",
            AuthEvent::Verified { .. } => "verified",
            AuthEvent::VerificationFailed { .. } => "verification_failed",
            AuthEvent::StaticIdentity { .. } => "static_identity",
            AuthEvent::HostRewritten { .. } => "host_rewritten",
            AuthEvent::PathRewritten { .. } => "path_rewritten",
            AuthEvent::Misconfigured { .. } => "misconfigured",
            AuthEvent::WebSocketOpened { .. } => "websocket_opened",
            AuthEvent::WebSocketFailed { .. } => "websocket_failed",
            AuthEvent::WebSocketClosed { .. } => "websocket_closed",
        }
    }
}

/// Receives pipeline events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &AuthEvent<'_>);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &AuthEvent<'_>) {}
}

/// Emits `tracing` events and records metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &AuthEvent<'_>) {
        match event {
            AuthEvent::StaticBypassEnabled { email, header } => {
                warn!(
                    email = %email,
                    header = %header,
                    "Static bypass mode enabled: requests are NOT verified"
                );
            }
            AuthEvent::CredentialMissing {
                source,
                cookies_seen,
            } => {
                warn!(source = ?source, cookies_seen, "Missing credential");
                metrics::record_auth_attempt("missing_credentials", false);
            }
            AuthEvent::Verified { email, elapsed } => {
                info!(
                    email = %email,
                    latency_ms = elapsed.as_secs_f64() * 1000.0,
                    "Authentication successful"
                );
                metrics::record_auth_attempt("verified", true);
                metrics::record_verification("ok", elapsed.as_secs_f64());
            }
            AuthEvent::VerificationFailed { error, elapsed } => {
                if error.is_upstream_failure() {
                    warn!(
                        error = %error,
                        latency_ms = elapsed.as_secs_f64() * 1000.0,
                        "Verification endpoint failure"
                    );
                } else {
                    warn!(
                        error = %error,
                        latency_ms = elapsed.as_secs_f64() * 1000.0,
                        "Credential rejected"
                    );
                }
                metrics::record_auth_attempt(error.kind(), false);
                metrics::record_verification(error.kind(), elapsed.as_secs_f64());
            }
            AuthEvent::StaticIdentity { email } => {
                debug!(email = %email, "Injected static identity");
                metrics::record_auth_attempt("static_bypass", true);
            }
            AuthEvent::HostRewritten { from, to } => {
                debug!(from = %from, to = %to, "Rewrote host");
                metrics::record_rewrite("host");
            }
            AuthEvent::PathRewritten { from, to } => {
                debug!(from = %from, to = %to, "Rewrote path");
                metrics::record_rewrite("path");
            }
            AuthEvent::Misconfigured { error } => {
                warn!(error = %error, "Rewrite configuration is invalid");
            }
            AuthEvent::WebSocketOpened { target } => {
                info!(upstream = %target, "WebSocket session opened");
                metrics::record_websocket_session("opened");
            }
            AuthEvent::WebSocketFailed { target, error } => {
                warn!(upstream = %target, error = %error, "WebSocket upstream failed");
                metrics::record_websocket_session("failed");
            }
            AuthEvent::WebSocketClosed { target, error } => {
                match error {
                    Some(error) => debug!(upstream = %target, error = %error, "WebSocket session ended"),
                    None => debug!(upstream = %target, "WebSocket session closed"),
                }
                metrics::record_websocket_session("closed");
            }
        }
    }
}
