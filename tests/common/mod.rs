//! In-process mock of a Live service.
//!
//! Speaks just enough of the protocol for session tests: it records every
//! client frame, answers `setup` with `setupComplete`, and forwards frames
//! queued with [`MockLiveServer::push`] to the connected client.
//! [`MockLiveServer::close`] ends the connection from the server side.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};

use live_voice::core::rag::{Embedder, RagError, RagResult};
use live_voice::core::transcription::{Transcriber, TranscriptionError, TranscriptionResult};

pub struct MockLiveServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Value>>>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl MockLiveServer {
    /// Server that acknowledges setup.
    pub async fn start() -> Self {
        Self::spawn(true).await
    }

    /// Server that accepts the socket but never acknowledges setup.
    pub async fn start_silent() -> Self {
        Self::spawn(false).await
    }

    async fn spawn(acknowledge: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let received = Arc::new(Mutex::new(Vec::new()));
        let (outbound, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(AsyncMutex::new(rx));

        let recorded = received.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                let rx = rx.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, recorded, rx, acknowledge).await;
                });
            }
        });

        Self {
            addr,
            received,
            outbound,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/live", self.addr)
    }

    /// Send a JSON frame to the connected client.
    pub fn push(&self, frame: Value) {
        let _ = self.outbound.send(Message::Text(frame.to_string().into()));
    }

    /// Send a raw text frame, valid JSON or not.
    pub fn push_raw(&self, text: &str) {
        let _ = self.outbound.send(Message::Text(text.to_string().into()));
    }

    /// Close the connection from the server side.
    pub fn close(&self) {
        let _ = self.outbound.send(Message::Close(None));
    }

    /// Every client frame so far, in arrival order.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().clone()
    }

    /// Client frames carrying `key` at the top level.
    pub fn received_with(&self, key: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|frame| frame.get(key).is_some())
            .collect()
    }

    /// Wait until `count` frames arrived, returning them.
    pub async fn wait_for_messages(&self, count: usize, timeout: Duration) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let received = self.received();
            if received.len() >= count || tokio::time::Instant::now() >= deadline {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    received: Arc<Mutex<Vec<Value>>>,
    outbound: Arc<AsyncMutex<mpsc::UnboundedReceiver<Message>>>,
    acknowledge: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();
    let mut outbound = outbound.lock().await;

    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = serde_json::from_str(text.as_str())?;
                    let is_setup = frame.get("setup").is_some();
                    received.lock().push(frame);
                    if is_setup && acknowledge {
                        let ack = json!({"setupComplete": {}});
                        write.send(Message::Text(ack.to_string().into())).await?;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    let closing = matches!(frame, Message::Close(_));
                    write.send(frame).await?;
                    if closing {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    Ok(())
}

/// `serverContent` frame carrying one PCM16 audio part.
pub fn audio_frame(pcm: &[u8]) -> Value {
    json!({
        "serverContent": {
            "modelTurn": {
                "parts": [{
                    "inlineData": {
                        "mimeType": "audio/pcm;rate=24000",
                        "data": BASE64_STANDARD.encode(pcm),
                    }
                }]
            }
        }
    })
}

pub fn turn_complete_frame() -> Value {
    json!({"serverContent": {"turnComplete": true}})
}

pub fn interrupted_frame() -> Value {
    json!({"serverContent": {"interrupted": true}})
}

/// Transcriber that replays canned replies and records what it was given.
pub struct ScriptedTranscriber {
    replies: Mutex<Vec<TranscriptionResult<String>>>,
    pub calls: Mutex<Vec<Bytes>>,
    delay: Option<Duration>,
}

impl ScriptedTranscriber {
    pub fn new(replies: Vec<TranscriptionResult<String>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Take `delay` before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn replying(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, audio: Bytes, _mime_type: &str) -> TranscriptionResult<String> {
        self.calls.lock().push(audio);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut replies = self.replies.lock();
        if replies.is_empty() {
            return Err(TranscriptionError::ProviderError("no scripted reply".into()));
        }
        replies.remove(0)
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

/// Embedder that works while indexing and fails for every later call.
pub struct FlakyEmbedder {
    budget: Mutex<usize>,
}

impl FlakyEmbedder {
    /// Succeed `budget` times, then fail.
    pub fn new(budget: usize) -> Self {
        Self {
            budget: Mutex::new(budget),
        }
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, _text: &str) -> RagResult<Vec<f32>> {
        let mut budget = self.budget.lock();
        if *budget == 0 {
            return Err(RagError::EmbeddingFailed("embedding service down".into()));
        }
        *budget -= 1;
        Ok(vec![1.0, 0.0, 0.0])
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}
