//! Per-client event registry.
//!
//! Subscribers register an async callback for one [`EventKind`] and get a
//! [`SubscriptionId`] back. Emitting an event awaits every matching callback
//! in registration order, so each subscriber sees every event of its kind in
//! the order it was published.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;

use super::base::{EventCallback, EventKind, LiveEvent, LogEvent, SubscriptionId};
use crate::utils::now_millis;

/// Milestone names carried by `log` events.
pub mod log_kind {
    pub const CLIENT_CONNECT: &str = "client.connect";
    pub const CLIENT_OPEN: &str = "client.open";
    pub const CLIENT_CLOSE: &str = "client.close";
    pub const CLIENT_SEND: &str = "client.send";
    pub const CLIENT_REALTIME_INPUT: &str = "client.realtimeInput";
    pub const CLIENT_TOOL_RESPONSE: &str = "client.toolResponse";
    pub const SERVER_SETUP_COMPLETE: &str = "server.setupComplete";
    pub const SERVER_CONTENT: &str = "server.content";
    pub const SERVER_AUDIO: &str = "server.audio";
    pub const SERVER_TURN_COMPLETE: &str = "server.turnComplete";
    pub const SERVER_INTERRUPTED: &str = "server.interrupted";
    pub const SERVER_TOOL_CALL: &str = "server.toolCall";
    pub const SERVER_TOOL_CALL_CANCELLATION: &str = "server.toolCallCancellation";
    pub const SERVER_GO_AWAY: &str = "server.goAway";
    pub const SERVER_MALFORMED: &str = "server.malformed";
    pub const SERVER_CLOSE: &str = "server.close";
    pub const TRANSCRIPTION_STARTED: &str = "transcription.started";
    pub const TRANSCRIPTION_COMPLETED: &str = "transcription.completed";
    pub const TRANSCRIPTION_FILTERED: &str = "transcription.filtered";
    pub const TRANSCRIPTION_DISCARDED: &str = "transcription.discarded";
    pub const RAG_AUGMENTED: &str = "rag.augmented";
    pub const ERROR: &str = "error";
}

/// Box an async closure into an [`EventCallback`].
pub fn callback<F, Fut>(f: F) -> EventCallback
where
    F: Fn(LiveEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event: LiveEvent| {
        Box::pin(f(event)) as Pin<Box<dyn Future<Output = ()> + Send>>
    })
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(SubscriptionId, EventCallback)>>,
}

/// Typed subscribe/unsubscribe surface owned by one client instance.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<RwLock<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for events of `kind`.
    pub fn subscribe(&self, kind: EventKind, callback: EventCallback) -> SubscriptionId {
        let mut registry = self.registry.write();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, callback));
        id
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.write();
        for handlers in registry.handlers.values_mut() {
            if let Some(pos) = handlers.iter().position(|(sid, _)| *sid == id) {
                handlers.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registry
            .read()
            .handlers
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Deliver `event` to every subscriber of its kind.
    pub async fn emit(&self, event: LiveEvent) {
        // Snapshot so callbacks may (un)subscribe without deadlocking.
        let handlers: Vec<EventCallback> = {
            let registry = self.registry.read();
            match registry.handlers.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, cb)| cb.clone()).collect(),
                None => return,
            }
        };

        for handler in handlers {
            handler(event.clone()).await;
        }
    }

    /// Publish a `log` event.
    pub async fn log(&self, kind: &str, payload: serde_json::Value) {
        tracing::trace!(kind, %payload, "live log");
        self.emit(LiveEvent::Log(LogEvent {
            kind: kind.to_string(),
            timestamp: now_millis(),
            payload,
        }))
        .await;
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.read();
        let counts: HashMap<&str, usize> = registry
            .handlers
            .iter()
            .map(|(k, v)| (k.as_str(), v.len()))
            .collect();
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback(counter: Arc<AtomicUsize>) -> EventCallback {
        callback(move |_event| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test]
    async fn test_emit_reaches_only_matching_kind() {
        let bus = EventBus::new();
        let audio = Arc::new(AtomicUsize::new(0));
        let close = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventKind::Audio, counting_callback(audio.clone()));
        bus.subscribe(EventKind::Close, counting_callback(close.clone()));

        bus.emit(LiveEvent::Audio(Bytes::from_static(&[1, 2]))).await;
        bus.emit(LiveEvent::Audio(Bytes::from_static(&[3, 4]))).await;

        assert_eq!(audio.load(Ordering::SeqCst), 2);
        assert_eq!(close.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = bus.subscribe(EventKind::Interrupted, counting_callback(counter.clone()));
        assert_eq!(bus.listener_count(EventKind::Interrupted), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(LiveEvent::Interrupted).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(EventKind::Interrupted), 0);
    }

    #[tokio::test]
    async fn test_log_event_shape() {
        let bus = EventBus::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(
            EventKind::Log,
            callback(move |event| {
                let sink = sink.clone();
                async move {
                    if let LiveEvent::Log(log) = event {
                        sink.lock().push(log);
                    }
                }
            }),
        );

        bus.log(log_kind::CLIENT_SEND, serde_json::json!({"parts": 1}))
            .await;

        let logs = seen.lock();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].kind, "client.send");
        assert_eq!(logs[0].payload["parts"], 1);
        assert!(logs[0].timestamp > 0);
    }
}
