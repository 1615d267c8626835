//! Topic-based publish/subscribe bus.
//!
//! Components never call each other; they publish [`Event`]s on named topics
//! and subscribe handlers to the topics they consume. Delivery order is only
//! guaranteed per publisher and topic. The [`worker`] module adds the
//! per-component queue, scheduling, and intention gating on top of a bus.

pub mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::event::Event;

pub use worker::{Processor, TopicWorker, WorkerHandle};

/// Callback invoked for each event on a subscribed topic.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Opaque handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// The messaging primitive shared by all components.
pub trait EventBus: Send + Sync {
    /// Deliver `event` to every handler subscribed to `topic`.
    fn publish(&self, topic: &str, event: Event);

    /// Register a handler for `topic`.
    fn subscribe(&self, topic: &str, handler: Handler) -> SubscriptionId;

    /// Remove a handler. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Topics with at least one subscriber.
    fn topics(&self) -> Vec<String>;
}

// ── SynchronousEventBus ─────────────────────────────────────────────────

/// In-process bus that runs handlers inline on the publishing thread.
///
/// Handlers are expected to be cheap (the topic worker's handler only
/// enqueues). The handler list is snapshotted before dispatch, so a handler
/// may publish or subscribe without deadlocking.
#[derive(Default)]
pub struct SynchronousEventBus {
    handlers: DashMap<String, Vec<(SubscriptionId, Handler)>>,
    next_id: AtomicU64,
}

impl SynchronousEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handlers on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.handlers.get(topic).map(|h| h.len()).unwrap_or(0)
    }
}

impl EventBus for SynchronousEventBus {
    fn publish(&self, topic: &str, mut event: Event) {
        event.metadata.topic = topic.to_string();
        let handlers: Vec<Handler> = match self.handlers.get(topic) {
            Some(entry) => entry.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => {
                tracing::trace!(topic, kind = event.kind(), "no subscribers");
                return;
            }
        };
        for handler in handlers {
            handler(&event);
        }
    }

    fn subscribe(&self, topic: &str, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .entry(topic.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        for mut entry in self.handlers.iter_mut() {
            entry.value_mut().retain(|(sid, _)| *sid != id);
        }
        self.handlers.retain(|_, handlers| !handlers.is_empty());
    }

    fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        topics.sort();
        topics
    }
}

impl std::fmt::Debug for SynchronousEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronousEventBus")
            .field("topics", &self.topics())
            .finish()
    }
}

// ── Recorder ────────────────────────────────────────────────────────────

/// Collects every event published on a set of topics, for tests and tooling.
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    /// Subscribe a recorder to `topics` on `bus`.
    pub fn attach<S: AsRef<str>>(bus: &dyn EventBus, topics: impl IntoIterator<Item = S>) -> Self {
        let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        for topic in topics {
            let sink = Arc::clone(&events);
            bus.subscribe(
                topic.as_ref(),
                Arc::new(move |event: &Event| {
                    sink.lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push(event.clone());
                }),
            );
        }
        Self { events }
    }

    /// All recorded events, in delivery order.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Recorded events on one topic.
    pub fn on(&self, topic: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.topic() == topic)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}
