//! Live session composition.
//!
//! A [`LiveSession`] wires a [`LiveClient`] to optional playback, turn
//! transcription and outbound rewriting. Each capability is attached at
//! build time and can be left out.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::core::live::{
    EventKind, FunctionResponse, INPUT_AUDIO_MIME, LiveClient, LiveConfig, LiveEvent, LiveResult,
    MediaChunk, Part, SubscriptionId, callback, log_kind,
};
use crate::core::persistence::{SessionRecord, SessionStore, StoreResult};
use crate::core::playback::AudioStreamer;
use crate::core::rag::OutboundRewriter;
use crate::core::risk::{RiskScorer, assess_history};
use crate::core::transcription::Transcriber;
use crate::core::turn::{
    ConversationEntry, ConversationHistory, SessionKind, TurnCoordinator, TurnCoordinatorConfig,
};
use crate::utils::now_millis;

pub struct LiveSessionBuilder {
    client: Arc<LiveClient>,
    kind: SessionKind,
    streamer: Option<Arc<AudioStreamer>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    rewriter: Option<Arc<dyn OutboundRewriter>>,
    metadata: BTreeMap<String, String>,
}

impl LiveSessionBuilder {
    pub fn kind(mut self, kind: SessionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Play server audio through `streamer`.
    pub fn streamer(mut self, streamer: Arc<AudioStreamer>) -> Self {
        self.streamer = Some(streamer);
        self
    }

    /// Transcribe every completed model turn with `transcriber`.
    pub fn transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Rewrite outbound parts, e.g. with a [`crate::core::rag::RagRewriter`].
    pub fn rewriter(mut self, rewriter: Arc<dyn OutboundRewriter>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Subscribe the attached capabilities to the client.
    ///
    /// Must run inside a tokio runtime when a transcriber is attached.
    pub fn build(self) -> LiveSession {
        let mut subscriptions = Vec::new();

        if let Some(streamer) = &self.streamer {
            let s = streamer.clone();
            subscriptions.push(self.client.on(
                EventKind::Audio,
                callback(move |event| {
                    let s = s.clone();
                    async move {
                        if let LiveEvent::Audio(pcm) = event
                            && let Err(e) = s.add_pcm16(&pcm)
                        {
                            warn!("Dropped audio chunk: {}", e);
                        }
                    }
                }),
            ));

            let s = streamer.clone();
            subscriptions.push(self.client.on(
                EventKind::Interrupted,
                callback(move |_| {
                    let s = s.clone();
                    async move { s.stop() }
                }),
            ));

            let s = streamer.clone();
            subscriptions.push(self.client.on(
                EventKind::TurnComplete,
                callback(move |_| {
                    let s = s.clone();
                    async move {
                        if let Err(e) = s.flush() {
                            warn!("Failed to flush playback: {}", e);
                        }
                    }
                }),
            ));
        }

        let coordinator = self.transcriber.map(|transcriber| {
            let coordinator = TurnCoordinator::new(
                transcriber,
                TurnCoordinatorConfig {
                    assistant_role: self.kind.assistant_role(),
                    ..Default::default()
                },
            );
            coordinator.observe(&self.client);
            coordinator
        });

        LiveSession {
            id: uuid::Uuid::new_v4().to_string(),
            kind: self.kind,
            client: self.client,
            streamer: self.streamer,
            coordinator,
            rewriter: self.rewriter,
            metadata: self.metadata,
            started_at: now_millis(),
            subscriptions,
        }
    }
}

/// One conversation over a [`LiveClient`].
pub struct LiveSession {
    id: String,
    kind: SessionKind,
    client: Arc<LiveClient>,
    streamer: Option<Arc<AudioStreamer>>,
    coordinator: Option<TurnCoordinator>,
    rewriter: Option<Arc<dyn OutboundRewriter>>,
    metadata: BTreeMap<String, String>,
    started_at: u64,
    subscriptions: Vec<SubscriptionId>,
}

impl LiveSession {
    pub fn builder(client: Arc<LiveClient>) -> LiveSessionBuilder {
        LiveSessionBuilder {
            client,
            kind: SessionKind::default(),
            streamer: None,
            transcriber: None,
            rewriter: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn client(&self) -> &Arc<LiveClient> {
        &self.client
    }

    pub fn streamer(&self) -> Option<&Arc<AudioStreamer>> {
        self.streamer.as_ref()
    }

    pub fn coordinator(&self) -> Option<&TurnCoordinator> {
        self.coordinator.as_ref()
    }

    /// Open a connection. Transcripts still pending from an earlier
    /// connection are discarded; history is kept.
    pub async fn connect(&self, config: LiveConfig) -> LiveResult<()> {
        if let Some(coordinator) = &self.coordinator {
            coordinator.reset();
        }
        self.client.connect(config).await
    }

    /// Send one user turn, rewritten first when a rewriter is attached.
    ///
    /// A failing rewrite is logged and the original parts are sent.
    pub async fn send(&self, parts: Vec<Part>) -> LiveResult<()> {
        let parts = match &self.rewriter {
            Some(rewriter) => match rewriter.rewrite(&parts).await {
                Ok(rewritten) => {
                    if rewritten != parts {
                        self.client
                            .events()
                            .log(log_kind::RAG_AUGMENTED, json!({"parts": rewritten.len()}))
                            .await;
                    }
                    rewritten
                }
                Err(e) => {
                    warn!("Outbound rewrite failed, sending original: {}", e);
                    self.client
                        .events()
                        .log(
                            log_kind::ERROR,
                            json!({"source": "rag", "message": e.to_string()}),
                        )
                        .await;
                    parts
                }
            },
            None => parts,
        };
        self.client.send(parts).await
    }

    /// Stream one chunk of 16 kHz microphone PCM16.
    pub async fn send_audio(&self, pcm: Bytes) -> LiveResult<()> {
        self.client
            .send_realtime_input(vec![MediaChunk::new(INPUT_AUDIO_MIME, pcm)])
            .await
    }

    pub async fn send_realtime_input(&self, chunks: Vec<MediaChunk>) -> LiveResult<()> {
        self.client.send_realtime_input(chunks).await
    }

    pub async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> LiveResult<()> {
        self.client.send_tool_response(responses).await
    }

    /// Transcribe a finished utterance of the caller into a `user` entry.
    pub async fn transcribe_user_speech(&self, wav: Bytes) -> Option<ConversationEntry> {
        match &self.coordinator {
            Some(coordinator) => coordinator.transcribe_user_speech(wav).await,
            None => {
                debug!("No transcriber attached, ignoring user speech");
                None
            }
        }
    }

    pub fn history(&self) -> ConversationHistory {
        self.coordinator
            .as_ref()
            .map(TurnCoordinator::history)
            .unwrap_or_default()
    }

    /// Close the connection and drop unplayed audio.
    ///
    /// Transcriptions still in flight are discarded.
    pub async fn disconnect(&self) {
        self.client.disconnect().await;
        if let Some(streamer) = &self.streamer {
            streamer.stop();
        }
        if let Some(coordinator) = &self.coordinator {
            coordinator.reset();
        }
    }

    /// Wait for pending transcriptions, disconnect, and build the record.
    pub async fn finish(&self, scorer: Option<&dyn RiskScorer>) -> SessionRecord {
        if let Some(coordinator) = &self.coordinator {
            coordinator.wait_idle().await;
        }
        self.disconnect().await;

        let history = self.history();
        let risk = match scorer {
            Some(scorer) => Some(assess_history(scorer, &history).await),
            None => None,
        };
        info!(
            "Session {} finished with {} entries",
            self.id,
            history.len()
        );

        SessionRecord {
            session_id: self.id.clone(),
            kind: self.kind,
            started_at: self.started_at,
            ended_at: now_millis(),
            history: history.entries().to_vec(),
            metadata: self.metadata.clone(),
            risk,
        }
    }

    /// [`LiveSession::finish`] and hand the record to `store`.
    pub async fn finish_into(
        &self,
        store: &dyn SessionStore,
        scorer: Option<&dyn RiskScorer>,
    ) -> StoreResult<SessionRecord> {
        let record = self.finish(scorer).await;
        store.save(record.clone()).await?;
        Ok(record)
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.client.off(id);
        }
        if let Some(coordinator) = &self.coordinator {
            coordinator.detach();
        }
    }
}
