//! Topic worker: one sequential event loop per component.
//!
//! A worker subscribes a cheap enqueueing handler to each consumed topic and
//! drains the queue on its own tokio task, so a component never sees two of
//! its events at once and needs no internal locking. Optionally it fires a
//! periodic tick, and it can be gated so the processor only runs while one of
//! a set of intentions is current.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{EventBus, SubscriptionId};
use crate::error::{BusError, LeolaniResult};
use crate::event::{Event, Payload};

/// Default inbound queue capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 16;

/// Reactive logic of one component.
///
/// Errors returned here are logged by the worker and never reach the bus.
#[async_trait]
pub trait Processor: Send + 'static {
    /// Handle one event from a consumed topic.
    async fn process(&mut self, event: &Event) -> LeolaniResult<()>;

    /// Scheduled invocation without payload.
    async fn tick(&mut self) -> LeolaniResult<()> {
        Ok(())
    }
}

/// Intention gate: the processor only runs while one of `intentions` is current.
#[derive(Debug, Clone)]
struct Gate {
    topic: String,
    intentions: Vec<String>,
}

/// Declarative description of a worker, started with [`TopicWorker::start`].
pub struct TopicWorker {
    name: String,
    bus: Arc<dyn EventBus>,
    consumes: Vec<String>,
    observes: Vec<String>,
    provides: Vec<String>,
    gate: Option<Gate>,
    scheduled: Option<Duration>,
    buffer_size: usize,
}

impl TopicWorker {
    pub fn new(name: impl Into<String>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            name: name.into(),
            bus,
            consumes: Vec::new(),
            observes: Vec::new(),
            provides: Vec::new(),
            gate: None,
            scheduled: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Topics delivered to the processor.
    pub fn consumes<S: Into<String>>(mut self, topics: impl IntoIterator<Item = S>) -> Self {
        self.consumes.extend(topics.into_iter().map(Into::into));
        self
    }

    /// Consumed topics that bypass the intention gate, for state the
    /// processor must track while inactive.
    pub fn observes<S: Into<String>>(mut self, topics: impl IntoIterator<Item = S>) -> Self {
        for topic in topics.into_iter().map(Into::into) {
            if !self.consumes.contains(&topic) {
                self.consumes.push(topic.clone());
            }
            self.observes.push(topic);
        }
        self
    }

    /// Topics the processor publishes to (informational).
    pub fn provides<S: Into<String>>(mut self, topics: impl IntoIterator<Item = S>) -> Self {
        self.provides.extend(topics.into_iter().map(Into::into));
        self
    }

    /// Only run while one of `intentions` is current on `intention_topic`.
    pub fn gated<S: Into<String>>(
        mut self,
        intention_topic: impl Into<String>,
        intentions: impl IntoIterator<Item = S>,
    ) -> Self {
        self.gate = Some(Gate {
            topic: intention_topic.into(),
            intentions: intentions.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Invoke [`Processor::tick`] every `interval`, first after one interval.
    pub fn scheduled(mut self, interval: Duration) -> Self {
        self.scheduled = Some(interval);
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe to the bus and spawn the event loop on the current runtime.
    pub fn start<P: Processor>(self, processor: P) -> LeolaniResult<WorkerHandle> {
        if self.consumes.is_empty() && self.scheduled.is_none() {
            return Err(BusError::IdleWorker { worker: self.name }.into());
        }

        let (tx, rx) = mpsc::channel::<Event>(self.buffer_size);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut topics = self.consumes.clone();
        if let Some(gate) = &self.gate {
            if !topics.contains(&gate.topic) {
                topics.push(gate.topic.clone());
            }
        }

        let mut subscriptions = Vec::with_capacity(topics.len());
        for topic in &topics {
            let tx = tx.clone();
            let worker = self.name.clone();
            let id = self.bus.subscribe(
                topic,
                Arc::new(move |event: &Event| match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(dropped)) => {
                        tracing::warn!(
                            worker = %worker,
                            topic = %dropped.topic(),
                            kind = dropped.kind(),
                            "queue full, dropping event"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }),
            );
            subscriptions.push(id);
        }

        tracing::info!(
            worker = %self.name,
            consumes = ?self.consumes,
            provides = ?self.provides,
            gate = ?self.gate.as_ref().map(|g| &g.intentions),
            "starting topic worker"
        );

        let event_loop = EventLoop {
            name: self.name.clone(),
            consumes: self.consumes,
            observes: self.observes,
            gate: self.gate,
            active: false,
            processor,
        };
        let join = tokio::spawn(event_loop.run(rx, shutdown_rx, self.scheduled));

        Ok(WorkerHandle {
            name: self.name,
            bus: self.bus,
            subscriptions,
            shutdown_tx,
            join,
        })
    }
}

/// A running worker.
pub struct WorkerHandle {
    name: String,
    bus: Arc<dyn EventBus>,
    subscriptions: Vec<SubscriptionId>,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unsubscribe, signal the loop to exit, and wait for it.
    pub async fn stop(self) {
        for id in &self.subscriptions {
            self.bus.unsubscribe(*id);
        }
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            tracing::error!(worker = %self.name, error = %e, "worker task ended abnormally");
        }
        tracing::info!(worker = %self.name, "topic worker stopped");
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

struct EventLoop<P> {
    name: String,
    consumes: Vec<String>,
    observes: Vec<String>,
    gate: Option<Gate>,
    active: bool,
    processor: P,
}

impl<P: Processor> EventLoop<P> {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Event>,
        mut shutdown_rx: watch::Receiver<bool>,
        scheduled: Option<Duration>,
    ) {
        let mut ticker = scheduled.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                received = rx.recv() => match received {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                _ = next_tick(ticker.as_mut()) => self.handle_tick().await,
            }
        }
    }

    async fn handle(&mut self, event: Event) {
        if let Some(gate) = &self.gate {
            if event.topic() == gate.topic {
                if let Payload::Intention(intention) = &event.payload {
                    let active = gate.intentions.iter().any(|i| intention.contains(i));
                    if active != self.active {
                        tracing::debug!(worker = %self.name, active, "intention gate changed");
                    }
                    self.active = active;
                }
                if !self.consumes.iter().any(|t| t == event.topic()) {
                    return;
                }
            } else if !self.active && !self.observes.iter().any(|t| t == event.topic()) {
                tracing::debug!(
                    worker = %self.name,
                    topic = %event.topic(),
                    "inactive for current intention, dropping event"
                );
                return;
            }
        }

        if let Err(e) = self.processor.process(&event).await {
            tracing::error!(
                worker = %self.name,
                topic = %event.topic(),
                kind = event.kind(),
                error = %e,
                "failed to process event"
            );
        }
    }

    async fn handle_tick(&mut self) {
        if self.gate.is_some() && !self.active {
            return;
        }
        if let Err(e) = self.processor.tick().await {
            tracing::error!(worker = %self.name, error = %e, "scheduled invocation failed");
        }
    }
}

async fn next_tick(ticker: Option<&mut tokio::time::Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
