//! Intention/desire coordinator.
//!
//! Holds the agent's current intentions and moves them along a transition
//! table `table[intention][achieved desire] -> next intentions` whenever some
//! component reports an achieved desire. Other components subscribe to the
//! intention topic (usually through [`TopicWorker::gated`](crate::bus::TopicWorker::gated))
//! to switch themselves on and off.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bus::{EventBus, Processor};
use crate::error::{BdiError, LeolaniResult};
use crate::event::{Event, IntentionEvent, Payload};

/// Intention every model must define: waiting for someone to talk to.
pub const INIT: &str = "init";
/// Intention every model must define: conversation in progress.
pub const CHAT: &str = "chat";

/// Targets of one transition. Configuration accepts a bare string as
/// shorthand for a single target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Targets {
    One(String),
    Many(Vec<String>),
}

impl Targets {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(t) => vec![t],
            Self::Many(ts) => ts,
        }
    }
}

/// Raw transition table as written in configuration.
pub type TransitionTable = BTreeMap<String, BTreeMap<String, Targets>>;

/// The default model: `init --initialized--> chat --quit--> init`.
pub fn default_table() -> TransitionTable {
    let mut table = TransitionTable::new();
    table.insert(
        INIT.to_string(),
        BTreeMap::from([("initialized".to_string(), Targets::One(CHAT.to_string()))]),
    );
    table.insert(
        CHAT.to_string(),
        BTreeMap::from([("quit".to_string(), Targets::One(INIT.to_string()))]),
    );
    table
}

/// Validated transition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BdiModel {
    table: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    initial: Vec<String>,
}

impl BdiModel {
    /// Validate `table` and the initial intentions.
    pub fn new(table: TransitionTable, initial: Vec<String>) -> Result<Self, BdiError> {
        if table.is_empty() {
            return Err(BdiError::EmptyModel);
        }

        let mut validated = BTreeMap::new();
        for (intention, row) in table {
            if intention.trim().is_empty() {
                return Err(BdiError::EmptyLabel);
            }
            let mut targets_by_desire = BTreeMap::new();
            for (desire, targets) in row {
                if desire.trim().is_empty() {
                    return Err(BdiError::EmptyLabel);
                }
                let targets = targets.into_vec();
                if targets.is_empty() {
                    return Err(BdiError::EmptyTarget {
                        intention: intention.clone(),
                        desire,
                    });
                }
                if targets.iter().any(|t| t.trim().is_empty()) {
                    return Err(BdiError::EmptyLabel);
                }
                targets_by_desire.insert(desire, targets);
            }
            validated.insert(intention, targets_by_desire);
        }

        if let Some(unknown) = initial.iter().find(|i| !validated.contains_key(*i)) {
            return Err(BdiError::UnknownInitialIntention {
                intention: unknown.clone(),
            });
        }

        Ok(Self {
            table: validated,
            initial,
        })
    }

    pub fn initial(&self) -> &[String] {
        &self.initial
    }

    /// Intentions that follow `current` once `achieved` desires are reached.
    ///
    /// Every pair of current intention and achieved desire must be in the
    /// table; targets are concatenated in order.
    pub fn transition(&self, current: &[String], achieved: &[String]) -> Result<Vec<String>, BdiError> {
        let mut next = Vec::new();
        for intention in current {
            for desire in achieved {
                let targets = self
                    .table
                    .get(intention)
                    .and_then(|row| row.get(desire))
                    .ok_or_else(|| BdiError::MissingTransition {
                        intentions: current.to_vec(),
                        achieved: achieved.to_vec(),
                    })?;
                next.extend(targets.iter().cloned());
            }
        }
        Ok(next)
    }

    /// Known intention labels.
    pub fn intentions(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }
}

// ── BdiService ──────────────────────────────────────────────────────────

/// Processor owning the current intentions.
pub struct BdiService {
    name: String,
    model: BdiModel,
    intentions: Vec<String>,
    intention_topic: String,
    bus: Arc<dyn EventBus>,
}

impl BdiService {
    pub const NAME: &'static str = "bdi";

    pub fn new(model: BdiModel, intention_topic: impl Into<String>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            name: Self::NAME.to_string(),
            intentions: model.initial().to_vec(),
            model,
            intention_topic: intention_topic.into(),
            bus,
        }
    }

    pub fn intentions(&self) -> &[String] {
        &self.intentions
    }

    /// Apply achieved desires. Returns the new intentions if they changed.
    ///
    /// A missing transition leaves the intentions untouched.
    pub fn achieve(&mut self, achieved: &[String]) -> Result<Option<Vec<String>>, BdiError> {
        let next = self.model.transition(&self.intentions, achieved)?;
        if next == self.intentions {
            return Ok(None);
        }
        self.intentions = next.clone();
        Ok(Some(next))
    }

    fn on_desire(&mut self, achieved: &[String]) {
        match self.achieve(achieved) {
            Ok(Some(intentions)) => {
                tracing::info!(?achieved, ?intentions, "intentions changed");
                self.bus.publish(
                    &self.intention_topic,
                    Event::for_payload(IntentionEvent::new(intentions)).with_source(&self.name),
                );
            }
            Ok(None) => {
                tracing::debug!(?achieved, intentions = ?self.intentions, "intentions unchanged");
            }
            Err(e) => {
                tracing::error!(
                    intentions = ?self.intentions,
                    ?achieved,
                    error = %e,
                    "failed to process achieved desire"
                );
            }
        }
    }
}

#[async_trait]
impl Processor for BdiService {
    async fn process(&mut self, event: &Event) -> LeolaniResult<()> {
        match &event.payload {
            Payload::Desire(desire) => self.on_desire(&desire.achieved),
            Payload::Intention(intention) => {
                if event.metadata.source.as_deref() == Some(self.name.as_str()) {
                    return Ok(());
                }
                if intention.intentions != self.intentions {
                    tracing::info!(
                        intentions = ?intention.intentions,
                        source = ?event.metadata.source,
                        "intentions set externally"
                    );
                    self.intentions = intention.intentions.clone();
                }
            }
            _ => tracing::debug!(topic = %event.topic(), kind = event.kind(), "unhandled event"),
        }
        Ok(())
    }
}
