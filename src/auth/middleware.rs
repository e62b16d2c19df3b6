//! The authorization pipeline.
//!
//! ```text
//! request ─► extract credential ─► verify ─► inject identity ─► rewrite host/path ─► next
//!                 │ 401                │ 401                          │ 500
//! ```
//!
//! `Upgrade: websocket` requests run the same steps and are then relayed by
//! the bound [`WebSocketProxy`] instead of the next handler.

use super::{extract_credential, cookie, AuthMethodType, HttpVerifier, Identity};
use crate::config::{AuthConfig, AuthMode, CredentialSource};
use crate::error::{AuthError, Result};
use crate::metrics::Timer;
use crate::observability::{AuthEvent, EventSink};
use crate::proxy::websocket::{is_upgrade_request, WebSocketProxy};
use crate::rewrite::RewriteRules;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Instant;

enum Mode {
    Verified(HttpVerifier),
    StaticBypass { email: String },
}

/// Authorization pipeline shared read-only by every request
pub struct ForwardAuth {
    mode: Mode,
    credential_source: CredentialSource,
    identity_header: HeaderName,
    rewrites: RewriteRules,
    websocket: Option<WebSocketProxy>,
    sink: Arc<dyn EventSink>,
}

impl ForwardAuth {
    /// Validate `config` and build the pipeline
    pub fn new(config: &AuthConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        config.validate()?;

        let identity_header = HeaderName::from_bytes(config.identity_header().as_bytes())
            .map_err(|e| AuthError::Config(format!("Invalid destinationHeader: {}", e)))?;

        let mode = match config.mode {
            AuthMode::Verified => Mode::Verified(HttpVerifier::new(
                &config.verification_endpoint,
                config.verification_method,
                config.verification_timeout(),
            )?),
            AuthMode::StaticBypass => {
                let email = config.email_address.clone().unwrap_or_default();
                sink.emit(&AuthEvent::StaticBypassEnabled {
                    email: &email,
                    header: identity_header.as_str(),
                });
                Mode::StaticBypass { email }
            }
        };

        Ok(Self {
            mode,
            credential_source: config.credential_source.clone(),
            identity_header,
            rewrites: RewriteRules::from_config(config)?,
            websocket: None,
            sink,
        })
    }

    /// Relay authorized WebSocket upgrades through `proxy`
    pub fn with_websocket_upstream(mut self, proxy: WebSocketProxy) -> Self {
        self.websocket = Some(proxy);
        self
    }

    pub fn sink(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.sink)
    }

    /// Run the pipeline on `req` up to, but not including, forwarding.
    ///
    /// On success the identity header holds exactly the resolved email, the
    /// authority and path are rewritten, and the [`Identity`] is stored in
    /// the request extensions.
    pub async fn authorize<B>(&self, req: &mut Request<B>) -> Result<Identity> {
        let identity = self.resolve_identity(req.headers()).await?;

        let value = HeaderValue::from_str(&identity.email).map_err(|_| {
            AuthError::MalformedResponse("email is not a valid header value".to_string())
        })?;
        req.headers_mut().insert(self.identity_header.clone(), value);

        let outcome = self.rewrites.apply(req).map_err(|error| {
            self.sink.emit(&AuthEvent::Misconfigured { error: &error });
            error
        })?;
        if let Some((from, to)) = &outcome.host {
            self.sink.emit(&AuthEvent::HostRewritten { from, to });
        }
        if let Some((from, to)) = &outcome.path {
            self.sink.emit(&AuthEvent::PathRewritten { from, to });
        }

        req.extensions_mut().insert(identity.clone());
        Ok(identity)
    }

    async fn resolve_identity(&self, headers: &HeaderMap) -> Result<Identity> {
        let verifier = match &self.mode {
            Mode::StaticBypass { email } => {
                self.sink.emit(&AuthEvent::StaticIdentity { email });
                return Ok(Identity {
                    email: email.clone(),
                    method: AuthMethodType::StaticBypass,
                });
            }
            Mode::Verified(verifier) => verifier,
        };

        let token = extract_credential(headers, &self.credential_source).map_err(|error| {
            self.sink.emit(&AuthEvent::CredentialMissing {
                source: &self.credential_source,
                cookies_seen: cookie::count(headers),
            });
            error
        })?;

        let started = Instant::now();
        match verifier.verify(&token).await {
            Ok(email) => {
                self.sink.emit(&AuthEvent::Verified {
                    email: &email,
                    elapsed: started.elapsed(),
                });
                Ok(Identity {
                    email,
                    method: AuthMethodType::Verified,
                })
            }
            Err(error) => {
                self.sink.emit(&AuthEvent::VerificationFailed {
                    error: &error,
                    elapsed: started.elapsed(),
                });
                Err(error)
            }
        }
    }
}

/// Axum middleware running [`ForwardAuth`] in front of `next`.
///
/// Dropping the request future (client disconnect) drops the pending
/// verifier call with it.
pub async fn forward_auth_middleware(
    State(auth): State<Arc<ForwardAuth>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let timer = Timer::new(req.method().to_string(), req.uri().path().to_string());

    let response = match auth.authorize(&mut req).await {
        Err(error) => error.into_response(),
        Ok(_) => match &auth.websocket {
            Some(proxy) if is_upgrade_request(req.headers()) => {
                proxy.forward(req, auth.sink()).await
            }
            _ => next.run(req).await,
        },
    };

    timer.record(response.status().as_u16());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::NoopSink;
    use axum::http::header::COOKIE;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<&'static str>>,
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: &AuthEvent<'_>) {
            self.events.lock().unwrap().push(event.name());
        }
    }

    async fn verifier_returning(email: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "email": email })),
            )
            .mount(&server)
            .await;
        server
    }

    fn request_with_cookie(cookie: &'static str) -> Request<()> {
        Request::builder()
            .uri("/source/page?tab=1")
            .header("host", "old.example")
            .header(COOKIE, cookie)
            .header("x-authentik-email", "spoofed@evil.example")
            .body(())
            .unwrap()
    }

    #[test]
    fn test_new_rejects_empty_endpoint() {
        assert!(ForwardAuth::new(&AuthConfig::new(""), Arc::new(NoopSink)).is_err());
    }

    #[tokio::test]
    async fn test_authorize_injects_identity_and_rewrites() {
        let server = verifier_returning("a@b.com").await;
        let mut config = AuthConfig::new(server.uri());
        config.source_host = Some("http://old.example".to_string());
        config.destination_host = Some("http://new.example".to_string());
        config.source_path = Some("/source".to_string());
        config.destination_path = Some("/dest".to_string());

        let sink = Arc::new(RecordingSink::default());
        let auth = ForwardAuth::new(&config, sink.clone()).unwrap();

        let mut req = request_with_cookie("haatc=tok");
        let identity = auth.authorize(&mut req).await.unwrap();

        assert_eq!(identity.email, "a@b.com");
        assert_eq!(identity.method, AuthMethodType::Verified);
        let values: Vec<_> = req.headers().get_all("x-authentik-email").iter().collect();
        assert_eq!(values, vec!["a@b.com"]);
        assert_eq!(req.headers()["host"], "new.example");
        assert_eq!(req.uri().path(), "/dest/page");
        assert_eq!(req.uri().query(), Some("tab=1"));
        assert_eq!(req.extensions().get::<Identity>(), Some(&identity));
        assert_eq!(
            *sink.events.lock().unwrap(),
            vec!["verified", "host_rewritten", "path_rewritten"]
        );
    }

    #[tokio::test]
    async fn test_missing_credential_skips_verifier() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let sink = Arc::new(RecordingSink::default());
        let auth = ForwardAuth::new(&AuthConfig::new(server.uri()), sink.clone()).unwrap();

        let mut req = request_with_cookie("other=1");
        let err = auth.authorize(&mut req).await.unwrap_err();

        assert!(matches!(err, AuthError::MissingCredentials));
        assert_eq!(req.headers()["x-authentik-email"], "spoofed@evil.example");
        assert_eq!(*sink.events.lock().unwrap(), vec!["credential_missing"]);
    }

    #[tokio::test]
    async fn test_custom_identity_header() {
        let server = verifier_returning("a@b.com").await;
        let mut config = AuthConfig::new(server.uri());
        config.destination_header = Some("X-Remote-User".to_string());

        let auth = ForwardAuth::new(&config, Arc::new(NoopSink)).unwrap();
        let mut req = request_with_cookie("haatc=tok");
        auth.authorize(&mut req).await.unwrap();

        assert_eq!(req.headers()["x-remote-user"], "a@b.com");
    }

    #[tokio::test]
    async fn test_static_bypass_never_calls_verifier() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = AuthConfig::new(server.uri());
        config.mode = AuthMode::StaticBypass;
        config.email_address = Some("ops@internal.example".to_string());

        let sink = Arc::new(RecordingSink::default());
        let auth = ForwardAuth::new(&config, sink.clone()).unwrap();

        let mut req = Request::builder().uri("/").body(()).unwrap();
        let identity = auth.authorize(&mut req).await.unwrap();

        assert_eq!(identity.method, AuthMethodType::StaticBypass);
        assert_eq!(req.headers()["x-authentik-email"], "ops@internal.example");
        assert_eq!(
            *sink.events.lock().unwrap(),
            vec!["static_bypass_enabled", "static_identity"]
        );
    }

    #[tokio::test]
    async fn test_email_that_is_not_a_header_value() {
        let server = verifier_returning("a@b.com\nx-admin: 1").await;
        let auth = ForwardAuth::new(&AuthConfig::new(server.uri()), Arc::new(NoopSink)).unwrap();

        let mut req = request_with_cookie("haatc=tok");
        let err = auth.authorize(&mut req).await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_dropped_request_closes_verifier_connection() {
        // Verifier that accepts the call and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let verifier_side = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            while let Ok(n) = socket.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        });

        let mut config = AuthConfig::new(format!("http://{}/verify", addr));
        config.verification_timeout_secs = 60;
        let auth = ForwardAuth::new(&config, Arc::new(NoopSink)).unwrap();

        let mut req = request_with_cookie("haatc=tok");
        let pending =
            tokio::time::timeout(Duration::from_millis(200), auth.authorize(&mut req)).await;
        assert!(pending.is_err());

        tokio::time::timeout(Duration::from_secs(5), verifier_side)
            .await
            .expect("verifier connection should close once the request is dropped")
            .unwrap();
    }
}
