//! WebSocket passthrough for authorized upgrade requests.
//!
//! ```text
//! Client ◄──── WebSocket frames ────► forward-auth ◄──── WebSocket frames ────► Upstream
//! ```
//!
//! The upstream connection is opened before the client upgrade is accepted,
//! so an unreachable upstream surfaces as a 502 instead of a dead socket.
//! Frames are relayed one at a time in both directions until either side
//! closes.

use super::is_hop_by_hop_header;
use crate::error::{AuthError, Result};
use crate::observability::{AuthEvent, EventSink};
use axum::{
    body::Body,
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        FromRequestParts,
    },
    http::{
        header::{HOST, SEC_WEBSOCKET_PROTOCOL, UPGRADE},
        HeaderMap, Request, Uri,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::{
        self, client::IntoClientRequest, protocol::frame::coding::CloseCode,
        protocol::CloseFrame as UpstreamCloseFrame,
    },
    MaybeTlsStream, WebSocketStream,
};
use url::Url;

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Whether the request asks for `Upgrade: websocket`
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Relays upgraded connections to a single upstream
#[derive(Debug, Clone)]
pub struct WebSocketProxy {
    upstream: Url,
    connect_timeout: Duration,
}

impl WebSocketProxy {
    /// `upstream` may use http(s) or ws(s); it is dialled as ws(s)
    pub fn new(upstream: &str, connect_timeout: Duration) -> Result<Self> {
        let mut url = Url::parse(upstream).map_err(|e| {
            AuthError::Config(format!("Invalid WebSocket upstream '{}': {}", upstream, e))
        })?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(AuthError::Config(format!(
                    "Unsupported WebSocket upstream scheme '{}'",
                    other
                )))
            }
        };
        url.set_scheme(scheme).map_err(|_| {
            AuthError::Config(format!("Cannot use '{}' as a WebSocket upstream", upstream))
        })?;

        Ok(Self {
            upstream: url,
            connect_timeout,
        })
    }

    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// Upstream WebSocket URL for the (rewritten) request URI
    pub fn target_url(&self, uri: &Uri) -> String {
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        format!(
            "{}{}",
            self.upstream.as_str().trim_end_matches('/'),
            path_and_query
        )
    }

    /// Complete the client upgrade and relay frames to the upstream
    pub async fn forward(&self, req: Request<Body>, sink: Arc<dyn EventSink>) -> Response {
        let (mut parts, _body) = req.into_parts();
        let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => return rejection.into_response(),
        };

        let target = self.target_url(&parts.uri);
        let (upstream, selected_protocol) = match self.connect(&target, &parts.headers).await {
            Ok(connected) => connected,
            Err(error) => {
                sink.emit(&AuthEvent::WebSocketFailed {
                    target: &target,
                    error: &error,
                });
                return error.into_response();
            }
        };

        sink.emit(&AuthEvent::WebSocketOpened { target: &target });

        let upgrade = match selected_protocol {
            Some(protocol) => upgrade.protocols([protocol]),
            None => upgrade,
        };

        upgrade.on_upgrade(move |client| async move {
            let result = relay(client, upstream).await;
            sink.emit(&AuthEvent::WebSocketClosed {
                target: &target,
                error: result.as_ref().err(),
            });
        })
    }

    async fn connect(
        &self,
        target: &str,
        headers: &HeaderMap,
    ) -> Result<(UpstreamSocket, Option<String>)> {
        let handshake = handshake_request(target, headers)?;

        let (socket, response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(handshake))
                .await
                .map_err(|_| {
                    AuthError::Timeout(format!("WebSocket upstream {} timed out", target))
                })?
                .map_err(|e| {
                    AuthError::Backend(format!("WebSocket upstream {} failed: {}", target, e))
                })?;

        let protocol = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Ok((socket, protocol))
    }
}

/// Handshake for the upstream carrying the client's end-to-end headers,
/// including the identity header and the (rewritten) Host.
fn handshake_request(
    target: &str,
    headers: &HeaderMap,
) -> Result<tungstenite::handshake::client::Request> {
    let mut request = target
        .into_client_request()
        .map_err(|e| AuthError::Proxy(format!("Invalid WebSocket target {}: {}", target, e)))?;

    for (name, value) in headers.iter() {
        if forwards_to_upstream(name.as_str()) {
            request.headers_mut().append(name.clone(), value.clone());
        }
    }
    if let Some(host) = headers.get(HOST) {
        request.headers_mut().insert(HOST, host.clone());
    }

    Ok(request)
}

fn forwards_to_upstream(name: &str) -> bool {
    // tungstenite generates the key, version and extension negotiation itself
    !is_hop_by_hop_header(name)
        && name != "host"
        && !(name.starts_with("sec-websocket-") && name != "sec-websocket-protocol")
}

async fn relay(client: WebSocket, upstream: UpstreamSocket) -> Result<()> {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let client_to_upstream = async {
        while let Some(message) = client_rx.next().await {
            let message = message
                .map_err(|e| AuthError::Proxy(format!("WebSocket client error: {}", e)))?;
            let closing = matches!(message, Message::Close(_));
            upstream_tx
                .send(into_upstream(message))
                .await
                .map_err(|e| AuthError::Backend(format!("WebSocket upstream send failed: {}", e)))?;
            if closing {
                break;
            }
        }
        Ok::<(), AuthError>(())
    };

    let upstream_to_client = async {
        while let Some(message) = upstream_rx.next().await {
            let message = message
                .map_err(|e| AuthError::Backend(format!("WebSocket upstream error: {}", e)))?;
            let Some(message) = into_client(message) else {
                continue;
            };
            let closing = matches!(message, Message::Close(_));
            client_tx
                .send(message)
                .await
                .map_err(|e| AuthError::Proxy(format!("WebSocket client send failed: {}", e)))?;
            if closing {
                break;
            }
        }
        Ok::<(), AuthError>(())
    };

    tokio::select! {
        result = client_to_upstream => result,
        result = upstream_to_client => result,
    }
}

fn into_upstream(message: Message) -> tungstenite::Message {
    match message {
        Message::Text(text) => tungstenite::Message::Text(text),
        Message::Binary(data) => tungstenite::Message::Binary(data),
        Message::Ping(data) => tungstenite::Message::Ping(data),
        Message::Pong(data) => tungstenite::Message::Pong(data),
        Message::Close(frame) => tungstenite::Message::Close(frame.map(|frame| UpstreamCloseFrame {
            code: CloseCode::from(frame.code),
            reason: frame.reason,
        })),
    }
}

fn into_client(message: tungstenite::Message) -> Option<Message> {
    match message {
        tungstenite::Message::Text(text) => Some(Message::Text(text)),
        tungstenite::Message::Binary(data) => Some(Message::Binary(data)),
        tungstenite::Message::Ping(data) => Some(Message::Ping(data)),
        tungstenite::Message::Pong(data) => Some(Message::Pong(data)),
        tungstenite::Message::Close(frame) => Some(Message::Close(frame.map(|frame| CloseFrame {
            code: frame.code.into(),
            reason: frame.reason,
        }))),
        tungstenite::Message::Frame(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_is_upgrade_request() {
        let mut headers = HeaderMap::new();
        assert!(!is_upgrade_request(&headers));

        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        assert!(is_upgrade_request(&headers));

        headers.insert(UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(is_upgrade_request(&headers));

        headers.insert(UPGRADE, HeaderValue::from_static("h2c"));
        assert!(!is_upgrade_request(&headers));
    }

    #[test]
    fn test_upstream_scheme_mapping() {
        let proxy = WebSocketProxy::new("http://backend:8123", Duration::from_secs(5)).unwrap();
        assert_eq!(proxy.upstream().scheme(), "ws");

        let proxy = WebSocketProxy::new("https://backend", Duration::from_secs(5)).unwrap();
        assert_eq!(proxy.upstream().scheme(), "wss");

        assert!(WebSocketProxy::new("ftp://backend", Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_target_url_keeps_path_and_query() {
        let proxy = WebSocketProxy::new("http://backend:8123/", Duration::from_secs(5)).unwrap();
        let uri: Uri = "/dest/websocket?token=x".parse().unwrap();
        assert_eq!(
            proxy.target_url(&uri),
            "ws://backend:8123/dest/websocket?token=x"
        );
    }

    #[test]
    fn test_handshake_carries_identity_and_host() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("new.example"));
        headers.insert("x-authentik-email", HeaderValue::from_static("a@b.com"));
        headers.insert("sec-websocket-key", HeaderValue::from_static("client-key"));
        headers.insert("sec-websocket-protocol", HeaderValue::from_static("chat"));
        headers.insert("connection", HeaderValue::from_static("upgrade"));

        let request = handshake_request("ws://backend:8123/ws", &headers).unwrap();
        let sent = request.headers();

        assert_eq!(sent[HOST], "new.example");
        assert_eq!(sent.get_all(HOST).iter().count(), 1);
        assert_eq!(sent["x-authentik-email"], "a@b.com");
        assert_eq!(sent["sec-websocket-protocol"], "chat");
        assert_ne!(sent["sec-websocket-key"], "client-key");
    }

    #[test]
    fn test_message_conversion() {
        assert_eq!(
            into_upstream(Message::Text("hi".to_string())),
            tungstenite::Message::Text("hi".to_string())
        );
        assert!(matches!(
            into_client(tungstenite::Message::Close(Some(UpstreamCloseFrame {
                code: CloseCode::Normal,
                reason: "bye".into(),
            }))),
            Some(Message::Close(Some(CloseFrame { code: 1000, .. })))
        ));
    }
}
