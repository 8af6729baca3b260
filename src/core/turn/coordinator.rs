//! Turn state machine and transcription worker.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};

use super::{
    ConversationEntry, ConversationHistory, Role, TranscriptFilter, TurnAccumulator,
};
use crate::core::live::{
    EventBus, EventKind, LiveClient, LiveEvent, OUTPUT_SAMPLE_RATE, SubscriptionId, callback,
    log_kind,
};
use crate::core::transcription::Transcriber;
use crate::utils::pcm16_to_wav;

/// MIME type of the clips handed to the transcriber.
pub const TRANSCRIPTION_MIME: &str = "audio/wav";

/// Callback receiving each accepted transcript.
pub type TranscriptCallback =
    Arc<dyn Fn(ConversationEntry) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback receiving the full history after each accepted transcript.
pub type ConversationUpdateCallback =
    Arc<dyn Fn(Vec<ConversationEntry>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Where a turn is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    #[default]
    Idle,
    Accumulating,
    Draining,
    Transcribing,
}

impl TurnPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Accumulating => "accumulating",
            Self::Draining => "draining",
            Self::Transcribing => "transcribing",
        }
    }
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TurnCoordinatorConfig {
    /// Role recorded for transcripts of the remote speaker
    pub assistant_role: Role,
    /// Sample rate of the server audio stream
    pub sample_rate: u32,
}

impl Default for TurnCoordinatorConfig {
    fn default() -> Self {
        Self {
            assistant_role: Role::Assistant,
            sample_rate: OUTPUT_SAMPLE_RATE,
        }
    }
}

#[derive(Default)]
struct TurnState {
    phase: TurnPhase,
    accumulator: TurnAccumulator,
}

struct Job {
    wav: Bytes,
    role: Role,
    generation: u64,
}

struct Inner {
    config: TurnCoordinatorConfig,
    transcriber: Arc<dyn Transcriber>,
    filter: TranscriptFilter,
    state: Mutex<TurnState>,
    history: RwLock<ConversationHistory>,
    /// Bumped on reset; results of older jobs are dropped
    generation: AtomicU64,
    /// Turns queued or being transcribed
    pending: AtomicUsize,
    idle: Notify,
    jobs: mpsc::UnboundedSender<Job>,
    events: RwLock<Option<EventBus>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    transcript_callbacks: RwLock<Vec<TranscriptCallback>>,
    update_callbacks: RwLock<Vec<ConversationUpdateCallback>>,
}

/// Accumulates server audio per turn and transcribes each completed turn
/// exactly once.
///
/// Turns are transcribed one at a time, in completion order, by a worker task
/// owned by the coordinator. Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct TurnCoordinator {
    inner: Arc<Inner>,
}

impl TurnCoordinator {
    pub fn new(transcriber: Arc<dyn Transcriber>, config: TurnCoordinatorConfig) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            config,
            transcriber,
            filter: TranscriptFilter::new(),
            state: Mutex::new(TurnState::default()),
            history: RwLock::new(ConversationHistory::new()),
            generation: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            jobs,
            events: RwLock::new(None),
            subscriptions: Mutex::new(Vec::new()),
            transcript_callbacks: RwLock::new(Vec::new()),
            update_callbacks: RwLock::new(Vec::new()),
        });

        tokio::spawn(run_worker(Arc::downgrade(&inner), rx));
        Self { inner }
    }

    /// Subscribe to `audio`, `turncomplete` and `close` on `client`.
    ///
    /// A close drops the unfinished turn only; turns already completed are
    /// still transcribed. Milestones are logged on the client's event bus from then on.
    pub fn observe(&self, client: &LiveClient) {
        *self.inner.events.write() = Some(client.events().clone());

        let weak = Arc::downgrade(&self.inner);
        let audio = client.on(
            EventKind::Audio,
            callback(move |event| {
                let weak = weak.clone();
                async move {
                    if let (Some(inner), LiveEvent::Audio(pcm)) = (weak.upgrade(), event) {
                        TurnCoordinator { inner }.on_audio(pcm);
                    }
                }
            }),
        );

        let weak = Arc::downgrade(&self.inner);
        let turn_complete = client.on(
            EventKind::TurnComplete,
            callback(move |_| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        TurnCoordinator { inner }.on_turn_complete();
                    }
                }
            }),
        );

        let weak = Arc::downgrade(&self.inner);
        let close = client.on(
            EventKind::Close,
            callback(move |_| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        TurnCoordinator { inner }.drop_partial_turn();
                    }
                }
            }),
        );

        self.inner
            .subscriptions
            .lock()
            .extend([audio, turn_complete, close]);
    }

    /// Remove the subscriptions made by [`TurnCoordinator::observe`].
    pub fn detach(&self) {
        let ids: Vec<SubscriptionId> = self.inner.subscriptions.lock().drain(..).collect();
        if let Some(events) = self.inner.events.read().as_ref() {
            for id in ids {
                events.unsubscribe(id);
            }
        }
    }

    /// Append one decoded audio fragment to the current turn.
    pub fn on_audio(&self, pcm: Bytes) {
        if pcm.is_empty() {
            return;
        }
        let mut state = self.inner.state.lock();
        state.accumulator.push(pcm);
        state.phase = TurnPhase::Accumulating;
    }

    /// Close the current turn and queue its audio for transcription.
    ///
    /// A turn without audio is consumed without a transcription call.
    pub fn on_turn_complete(&self) {
        let (pcm, fragments) = {
            let mut state = self.inner.state.lock();
            let fragments = state.accumulator.len();
            let Some(pcm) = state.accumulator.drain() else {
                debug!("Turn completed without audio");
                return;
            };
            state.phase = TurnPhase::Draining;
            (pcm, fragments)
        };

        let wav = match pcm16_to_wav(&pcm, self.inner.config.sample_rate) {
            Ok(wav) => Bytes::from(wav),
            Err(e) => {
                warn!("Failed to wrap turn audio as WAV: {}", e);
                self.inner.settle_phase();
                return;
            }
        };

        debug!(
            "Queued turn for transcription: {} fragments, {} bytes",
            fragments,
            pcm.len()
        );
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        self.inner.settle_phase();
        let job = Job {
            wav,
            role: self.inner.config.assistant_role,
            generation: self.inner.generation.load(Ordering::SeqCst),
        };
        if self.inner.jobs.send(job).is_err() {
            warn!("Transcription worker is gone, dropping turn");
            self.inner.finish_job();
        }
    }

    /// Transcribe one finished utterance of the caller.
    ///
    /// `wav` is a complete WAV file, e.g. from
    /// [`super::UserSpeechRecorder::finish`]. Returns the history entry when
    /// the transcript was accepted.
    pub async fn transcribe_user_speech(&self, wav: Bytes) -> Option<ConversationEntry> {
        let job = Job {
            wav,
            role: Role::User,
            generation: self.inner.generation.load(Ordering::SeqCst),
        };
        self.inner.process(job).await
    }

    /// Drop the turn in progress and discard results of in-flight
    /// transcriptions. History is kept.
    pub fn reset(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.drop_partial_turn();
    }

    /// Drop the turn in progress. Completed turns still waiting for their
    /// transcript are kept.
    pub fn drop_partial_turn(&self) {
        self.inner.state.lock().accumulator.clear();
        self.inner.settle_phase();
    }

    pub fn phase(&self) -> TurnPhase {
        self.inner.state.lock().phase
    }

    /// Fragments accumulated for the turn in progress.
    pub fn accumulated_fragments(&self) -> usize {
        self.inner.state.lock().accumulator.len()
    }

    pub fn history(&self) -> ConversationHistory {
        self.inner.history.read().clone()
    }

    /// Record an entry that did not come from transcription, e.g. a typed prompt.
    pub fn append_entry(&self, entry: ConversationEntry) {
        self.inner.history.write().push(entry);
    }

    pub fn assistant_role(&self) -> Role {
        self.inner.config.assistant_role
    }

    pub fn on_transcript(&self, callback: TranscriptCallback) {
        self.inner.transcript_callbacks.write().push(callback);
    }

    pub fn on_conversation_update(&self, callback: ConversationUpdateCallback) {
        self.inner.update_callbacks.write().push(callback);
    }

    /// Wait until every queued turn has been transcribed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for TurnCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnCoordinator")
            .field("phase", &self.phase())
            .field("pending", &self.inner.pending.load(Ordering::SeqCst))
            .field("provider", &self.inner.transcriber.provider_name())
            .finish()
    }
}

async fn run_worker(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.process(job).await;
        inner.finish_job();
    }
    debug!("Transcription worker stopped");
}

impl Inner {
    async fn log(&self, kind: &str, payload: serde_json::Value) {
        let events = self.events.read().clone();
        if let Some(events) = events {
            events.log(kind, payload).await;
        }
    }

    fn finish_job(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.settle_phase();
        self.idle.notify_waiters();
    }

    fn settle_phase(&self) {
        let mut state = self.state.lock();
        state.phase = if !state.accumulator.is_empty() {
            TurnPhase::Accumulating
        } else if self.pending.load(Ordering::SeqCst) > 0 {
            TurnPhase::Transcribing
        } else {
            TurnPhase::Idle
        };
    }

    async fn process(&self, job: Job) -> Option<ConversationEntry> {
        let provider = self.transcriber.provider_name();
        self.log(
            log_kind::TRANSCRIPTION_STARTED,
            json!({"role": job.role, "bytes": job.wav.len(), "provider": provider}),
        )
        .await;

        let result = self.transcriber.transcribe(job.wav, TRANSCRIPTION_MIME).await;

        if job.generation != self.generation.load(Ordering::SeqCst) {
            debug!("Discarding transcript of a reset session");
            self.log(
                log_kind::TRANSCRIPTION_DISCARDED,
                json!({"role": job.role, "provider": provider}),
            )
            .await;
            return None;
        }

        let text = match result {
            Ok(text) => text,
            Err(e) => {
                warn!("Transcription failed ({}): {}", provider, e);
                self.log(
                    log_kind::ERROR,
                    json!({"source": "transcription", "provider": provider, "message": e.to_string()}),
                )
                .await;
                return None;
            }
        };

        let Some(content) = self.filter.filter(&text) else {
            debug!("Filtered transcript {:?}", text);
            self.log(
                log_kind::TRANSCRIPTION_FILTERED,
                json!({"role": job.role, "text": text}),
            )
            .await;
            return None;
        };

        let entry = ConversationEntry::new(job.role, content);
        let snapshot = {
            let mut history = self.history.write();
            history.push(entry.clone());
            history.entries().to_vec()
        };
        info!("Transcribed {} turn: {} chars", job.role, entry.content.len());
        self.log(
            log_kind::TRANSCRIPTION_COMPLETED,
            json!({"role": entry.role, "text": entry.content, "timestamp": entry.timestamp}),
        )
        .await;

        let transcript_callbacks: Vec<TranscriptCallback> =
            self.transcript_callbacks.read().iter().cloned().collect();
        for cb in transcript_callbacks {
            cb(entry.clone()).await;
        }
        let update_callbacks: Vec<ConversationUpdateCallback> =
            self.update_callbacks.read().iter().cloned().collect();
        for cb in update_callbacks {
            cb(snapshot.clone()).await;
        }

        Some(entry)
    }
}
