//! Live protocol client.
//!
//! Owns one duplex WebSocket connection to a Gemini-Live-style
//! `BidiGenerateContent` endpoint and publishes decoded server traffic through
//! an [`EventBus`].
//!
//! # API Reference
//!
//! - Endpoint: `wss://<host>/<ws-path>?key=<api key>`
//! - Protocol: WebSocket with JSON frames, one message kind per frame
//! - Audio: PCM 16-bit mono little-endian, 16kHz in / 24kHz out, base64 encoded
//!
//! # Example
//!
//! ```rust,ignore
//! use live_voice::core::live::{EventKind, LiveClient, LiveConfig, LiveEndpoint, Part, callback};
//!
//! let client = LiveClient::new(LiveEndpoint::gemini("api-key"));
//! client.on(EventKind::Audio, callback(|event| async move {
//!     println!("{event:?}");
//! }));
//! client.connect(LiveConfig::new("gemini-2.0-flash-live-001")).await?;
//! client.send(vec![Part::text("Hello")]).await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::base::{
    CloseInfo, ConnectionState, EventCallback, EventKind, LiveConfig, LiveError, LiveEvent,
    LiveResult, SubscriptionId,
};
use super::config::{CLOSE_GRACE_PERIOD, DEFAULT_SETUP_TIMEOUT, GEMINI_LIVE_URL};
use super::events::{EventBus, log_kind};
use super::messages::{
    ClientMessage, FunctionResponse, MediaChunk, Part, RealtimeInput, ServerContent,
    ServerMessage, Setup, ToolResponse,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Endpoint
// =============================================================================

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct LiveEndpoint {
    /// `ws://` or `wss://` URL without the key
    pub url: String,
    pub api_key: Option<String>,
    /// Bound on opening the transport and on waiting for `setupComplete`
    pub setup_timeout: Duration,
}

impl LiveEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
        }
    }

    /// The public Gemini Live endpoint.
    pub fn gemini(api_key: impl Into<String>) -> Self {
        Self::new(GEMINI_LIVE_URL).with_api_key(api_key)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    /// Final request URL with the key appended as a query parameter.
    pub fn request_url(&self) -> LiveResult<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| LiveError::InvalidConfiguration(format!("invalid URL: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(LiveError::InvalidConfiguration(format!(
                "unsupported scheme '{}', expected ws or wss",
                url.scheme()
            )));
        }
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }
}

// =============================================================================
// Live Client
// =============================================================================

/// Client for one live connection.
///
/// All methods take `&self`; state shared with the connection task lives
/// behind `Arc`s, so the client can itself be shared through an `Arc`.
pub struct LiveClient {
    endpoint: LiveEndpoint,
    /// Connection state
    state: Arc<RwLock<ConnectionState>>,
    /// Connected flag for fast checks (shared with connection task).
    /// Whoever flips it to `false` publishes the `close` event.
    connected: Arc<AtomicBool>,
    /// Outbound queue into the connection task
    ws_sender: Arc<Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>>,
    /// Connection task handle
    connection_handle: Mutex<Option<JoinHandle<()>>>,
    /// Incremented on every successful connect
    connection_id: Arc<AtomicU64>,
    /// Config of the current connection
    config: RwLock<Option<LiveConfig>>,
    events: EventBus,
}

impl LiveClient {
    pub fn new(endpoint: LiveEndpoint) -> Self {
        Self {
            endpoint,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connected: Arc::new(AtomicBool::new(false)),
            ws_sender: Arc::new(Mutex::new(None)),
            connection_handle: Mutex::new(None),
            connection_id: Arc::new(AtomicU64::new(0)),
            config: RwLock::new(None),
            events: EventBus::new(),
        }
    }

    pub fn endpoint(&self) -> &LiveEndpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Identity of the current (or last) connection.
    pub fn connection_id(&self) -> u64 {
        self.connection_id.load(Ordering::SeqCst)
    }

    /// Config passed to the current connection.
    pub fn config(&self) -> Option<LiveConfig> {
        self.config.read().clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to events of `kind`.
    pub fn on(&self, kind: EventKind, callback: EventCallback) -> SubscriptionId {
        self.events.subscribe(kind, callback)
    }

    /// Remove a subscription made with [`LiveClient::on`].
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Open the connection, send `setup`, and wait for `setupComplete`.
    ///
    /// An open connection is closed first. On failure the client is left
    /// Disconnected and `close` and `log` events are published.
    pub async fn connect(&self, config: LiveConfig) -> LiveResult<()> {
        if self.is_connected() || self.connection_handle.lock().is_some() {
            tracing::debug!("connect() on an open client, disconnecting first");
            self.disconnect().await;
        }

        config.validate()?;
        let url = self.endpoint.request_url()?;

        *self.state.write() = ConnectionState::Connecting;
        self.events
            .log(
                log_kind::CLIENT_CONNECT,
                json!({
                    "host": url.host_str(),
                    "model": config.qualified_model(),
                }),
            )
            .await;

        match self.open(&url, &config).await {
            Ok(ws) => {
                self.start(ws, config).await;
                Ok(())
            }
            Err(e) => {
                *self.state.write() = ConnectionState::Disconnected;
                tracing::warn!("Live connection failed: {}", e);
                self.events
                    .log(
                        log_kind::ERROR,
                        json!({"stage": "connect", "error": e.to_string()}),
                    )
                    .await;
                self.events
                    .emit(LiveEvent::Close(CloseInfo {
                        code: None,
                        reason: e.to_string(),
                    }))
                    .await;
                Err(e)
            }
        }
    }

    /// Open the transport and complete the setup handshake.
    async fn open(&self, url: &Url, config: &LiveConfig) -> LiveResult<WsStream> {
        if url.scheme() == "wss" {
            // Already installed is fine.
            let _ = rustls::crypto::ring::default_provider().install_default();
        }

        let timeout = self.endpoint.setup_timeout;
        let (mut ws, _response) =
            tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.as_str()))
                .await
                .map_err(|_| LiveError::Timeout("opening transport".to_string()))?
                .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

        let setup = ClientMessage::Setup(Setup::from(config)).to_json()?;
        ws.send(Message::Text(setup.into()))
            .await
            .map_err(|e| LiveError::WebSocketError(e.to_string()))?;

        tokio::time::timeout(timeout, Self::await_setup_complete(&mut ws))
            .await
            .map_err(|_| LiveError::Timeout(format!("no setupComplete within {timeout:?}")))??;

        Ok(ws)
    }

    async fn await_setup_complete(ws: &mut WsStream) -> LiveResult<()> {
        while let Some(frame) = ws.next().await {
            let frame = frame.map_err(|e| LiveError::WebSocketError(e.to_string()))?;
            let parsed = match &frame {
                Message::Text(text) => ServerMessage::parse(text.as_str()),
                Message::Binary(data) => match std::str::from_utf8(data) {
                    Ok(text) => ServerMessage::parse(text),
                    Err(_) => continue,
                },
                Message::Close(close) => {
                    let reason = close
                        .as_ref()
                        .map(|c| c.reason.to_string())
                        .unwrap_or_default();
                    return Err(LiveError::ConnectionFailed(format!(
                        "closed during setup: {reason}"
                    )));
                }
                _ => continue,
            };

            match parsed {
                Ok(ServerMessage::SetupComplete) => return Ok(()),
                Ok(other) => tracing::debug!("Ignoring {} before setupComplete", other.kind()),
                Err(e) => tracing::warn!("Dropping frame during setup: {}", e),
            }
        }
        Err(LiveError::ConnectionFailed(
            "stream ended before setupComplete".to_string(),
        ))
    }

    /// Spawn the connection task over an established socket.
    async fn start(&self, ws: WsStream, config: LiveConfig) {
        let (mut ws_sink, mut ws_stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<ClientMessage>();
        *self.ws_sender.lock() = Some(tx);
        *self.config.write() = Some(config);

        let connection_id = self.connection_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.connected.store(true, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connected;

        let events = self.events.clone();
        let state = self.state.clone();
        let connected = self.connected.clone();
        let ws_sender = self.ws_sender.clone();
        let current_id = self.connection_id.clone();

        let handle = tokio::spawn(async move {
            let mut close = CloseInfo {
                code: None,
                reason: "stream ended".to_string(),
            };

            loop {
                tokio::select! {
                    // Handle outgoing messages
                    outgoing = rx.recv() => match outgoing {
                        Some(message) => {
                            let json = match message.to_json() {
                                Ok(j) => j,
                                Err(e) => {
                                    tracing::error!("Failed to serialize {}: {}", message.kind(), e);
                                    continue;
                                }
                            };
                            if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                                tracing::error!("Failed to send WebSocket message: {}", e);
                                close.reason = format!("send failed: {e}");
                                break;
                            }
                        }
                        None => {
                            // Sender dropped by disconnect()
                            let _ = ws_sink.send(Message::Close(None)).await;
                            close.reason = "client disconnect".to_string();
                            break;
                        }
                    },

                    // Handle incoming messages
                    incoming = ws_stream.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            Self::dispatch_frame(text.as_str(), &events).await;
                        }
                        Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                            Ok(text) => Self::dispatch_frame(text, &events).await,
                            Err(_) => {
                                tracing::warn!("Dropping non-UTF-8 binary frame ({} bytes)", data.len());
                                events
                                    .log(
                                        log_kind::SERVER_MALFORMED,
                                        json!({"error": "non-UTF-8 binary frame", "bytes": data.len()}),
                                    )
                                    .await;
                            }
                        },
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws_sink.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!("Live service closed the connection");
                            if let Some(frame) = frame {
                                close = CloseInfo {
                                    code: Some(u16::from(frame.code)),
                                    reason: frame.reason.to_string(),
                                };
                            } else {
                                close.reason = "closed by server".to_string();
                            }
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::error!("WebSocket error: {}", e);
                            close.reason = e.to_string();
                            break;
                        }
                        None => break,
                    },
                }
            }

            if current_id.load(Ordering::SeqCst) == connection_id {
                ws_sender.lock().take();
            }
            if connected.swap(false, Ordering::SeqCst) {
                *state.write() = ConnectionState::Disconnected;
                events
                    .log(
                        log_kind::SERVER_CLOSE,
                        json!({"code": close.code, "reason": close.reason}),
                    )
                    .await;
                events.emit(LiveEvent::Close(close)).await;
            }
            tracing::info!("Live connection task ended");
        });

        *self.connection_handle.lock() = Some(handle);

        tracing::info!("Connected to live service (connection {})", connection_id);
        self.events
            .log(log_kind::CLIENT_OPEN, json!({"connection": connection_id}))
            .await;
        self.events.emit(LiveEvent::Open).await;
        self.events
            .log(log_kind::SERVER_SETUP_COMPLETE, json!({}))
            .await;
        self.events.emit(LiveEvent::SetupComplete).await;
    }

    /// Parse one inbound frame and publish its events. Malformed frames are
    /// logged and dropped.
    async fn dispatch_frame(text: &str, events: &EventBus) {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping malformed server frame: {}", e);
                events
                    .log(
                        log_kind::SERVER_MALFORMED,
                        json!({"error": e.to_string(), "bytes": text.len()}),
                    )
                    .await;
                return;
            }
        };

        match message {
            ServerMessage::SetupComplete => {
                events.log(log_kind::SERVER_SETUP_COMPLETE, json!({})).await;
                events.emit(LiveEvent::SetupComplete).await;
            }
            ServerMessage::ServerContent(content) => {
                Self::dispatch_content(content, events).await;
            }
            ServerMessage::ToolCall(call) => {
                let names: Vec<&str> = call
                    .function_calls
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect();
                tracing::debug!("Tool call: {:?}", names);
                events
                    .log(log_kind::SERVER_TOOL_CALL, json!({"functions": names}))
                    .await;
                events.emit(LiveEvent::ToolCall(call.function_calls)).await;
            }
            ServerMessage::ToolCallCancellation(cancellation) => {
                events
                    .log(
                        log_kind::SERVER_TOOL_CALL_CANCELLATION,
                        json!({"ids": cancellation.ids}),
                    )
                    .await;
                events
                    .emit(LiveEvent::ToolCallCancellation(cancellation.ids))
                    .await;
            }
            ServerMessage::GoAway(go_away) => {
                tracing::warn!("Live service going away (time left: {:?})", go_away.time_left);
                events
                    .log(
                        log_kind::SERVER_GO_AWAY,
                        json!({"timeLeft": go_away.time_left}),
                    )
                    .await;
            }
        }
    }

    async fn dispatch_content(content: ServerContent, events: &EventBus) {
        if content.interrupted {
            tracing::debug!("Server signalled interruption");
            events.log(log_kind::SERVER_INTERRUPTED, json!({})).await;
            events.emit(LiveEvent::Interrupted).await;
        }

        for blob in content.audio_parts() {
            events
                .log(log_kind::SERVER_AUDIO, json!({"bytes": blob.data.len()}))
                .await;
            events.emit(LiveEvent::Audio(blob.data.clone())).await;
        }

        if let Some(turn) = &content.model_turn {
            events
                .log(
                    log_kind::SERVER_CONTENT,
                    json!({"parts": turn.parts.len(), "text": content.text()}),
                )
                .await;
        }

        let turn_complete = content.turn_complete;
        events.emit(LiveEvent::Content(content)).await;

        if turn_complete {
            events.log(log_kind::SERVER_TURN_COMPLETE, json!({})).await;
            events.emit(LiveEvent::TurnComplete).await;
        }
    }

    /// Send `parts` as one complete user turn.
    pub async fn send(&self, parts: Vec<Part>) -> LiveResult<()> {
        self.send_turn(parts, true).await
    }

    /// Send `parts` as `clientContent`.
    pub async fn send_turn(&self, parts: Vec<Part>, turn_complete: bool) -> LiveResult<()> {
        let payload = json!({
            "parts": parts.len(),
            "text": parts.iter().filter_map(|p| p.text.as_deref()).collect::<Vec<_>>(),
            "turnComplete": turn_complete,
        });
        self.enqueue(ClientMessage::user_turn(parts, turn_complete))?;
        self.events.log(log_kind::CLIENT_SEND, payload).await;
        Ok(())
    }

    /// Stream microphone or video chunks. Sent in call order, never batched.
    pub async fn send_realtime_input(&self, chunks: Vec<MediaChunk>) -> LiveResult<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let payload = json!({
            "chunks": chunks.len(),
            "mimeTypes": chunks.iter().map(|c| c.mime_type.as_str()).collect::<Vec<_>>(),
        });
        self.enqueue(ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: chunks,
        }))?;
        self.events
            .log(log_kind::CLIENT_REALTIME_INPUT, payload)
            .await;
        Ok(())
    }

    /// Answer tool calls received on the `toolcall` event.
    pub async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> LiveResult<()> {
        let payload = json!({
            "functions": responses.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
        });
        self.enqueue(ClientMessage::ToolResponse(ToolResponse {
            function_responses: responses,
        }))?;
        self.events
            .log(log_kind::CLIENT_TOOL_RESPONSE, payload)
            .await;
        Ok(())
    }

    fn enqueue(&self, message: ClientMessage) -> LiveResult<()> {
        if !self.is_connected() {
            return Err(LiveError::NotConnected);
        }
        let guard = self.ws_sender.lock();
        let sender = guard.as_ref().ok_or(LiveError::NotConnected)?;
        sender.send(message).map_err(|_| LiveError::NotConnected)
    }

    /// Close the connection. Calling it while disconnected is a no-op.
    pub async fn disconnect(&self) {
        let handle = self.connection_handle.lock().take();
        let Some(mut handle) = handle else {
            *self.state.write() = ConnectionState::Disconnected;
            return;
        };

        *self.state.write() = ConnectionState::Closing;
        let was_connected = self.connected.swap(false, Ordering::SeqCst);

        // Dropping the sender makes the task send a close frame and exit.
        self.ws_sender.lock().take();
        if tokio::time::timeout(CLOSE_GRACE_PERIOD, &mut handle)
            .await
            .is_err()
        {
            handle.abort();
        }

        *self.state.write() = ConnectionState::Disconnected;
        *self.config.write() = None;
        tracing::info!("Disconnected from live service");

        if was_connected {
            let close = CloseInfo {
                code: Some(1000),
                reason: "client disconnect".to_string(),
            };
            self.events
                .log(log_kind::CLIENT_CLOSE, json!({"reason": close.reason}))
                .await;
            self.events.emit(LiveEvent::Close(close)).await;
        }
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        if let Some(handle) = self.connection_handle.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for LiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveClient")
            .field("url", &self.endpoint.url)
            .field("state", &self.state())
            .field("connection_id", &self.connection_id())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url_appends_key() {
        let url = LiveEndpoint::gemini("abc").request_url().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert!(url.as_str().ends_with("BidiGenerateContent?key=abc"));
    }

    #[test]
    fn test_request_url_rejects_http() {
        let err = LiveEndpoint::new("https://example.com")
            .request_url()
            .unwrap_err();
        assert!(matches!(err, LiveError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let client = LiveClient::new(LiveEndpoint::new("ws://127.0.0.1:1"));
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let result = client.send(vec![Part::text("hi")]).await;
        assert!(matches!(result, Err(LiveError::NotConnected)));
        let result = client
            .send_realtime_input(vec![MediaChunk::new("audio/pcm;rate=16000", vec![0u8; 4])])
            .await;
        assert!(matches!(result, Err(LiveError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_when_never_connected_is_noop() {
        let client = LiveClient::new(LiveEndpoint::new("ws://127.0.0.1:1"));
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_disconnected() {
        let client = LiveClient::new(
            LiveEndpoint::new("ws://127.0.0.1:9").with_setup_timeout(Duration::from_secs(2)),
        );
        let closes = Arc::new(AtomicU64::new(0));
        let counter = closes.clone();
        client.on(
            EventKind::Close,
            super::super::events::callback(move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );

        let result = client.connect(LiveConfig::new("m")).await;
        assert!(result.is_err());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let client = LiveClient::new(LiveEndpoint::new("ws://127.0.0.1:9"));
        let result = client.connect(LiveConfig::new("")).await;
        assert!(matches!(result, Err(LiveError::InvalidConfiguration(_))));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
