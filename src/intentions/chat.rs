//! Chat start: tell the knowledge store who the conversation is with.
//!
//! When the chat intention becomes current and the speaker is known, one
//! text-mention capsule for the speaker is published. With an init interval
//! configured, a silence of that length re-arms the announcement.

use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::{EventBus, Processor};
use crate::capsule::Capsule;
use crate::context::scenario::Agent;
use crate::error::LeolaniResult;
use crate::event::{Event, Payload, ScenarioPhase, timestamp_now};

pub struct InitializeChatService {
    intention: String,
    init_interval_ms: Option<u64>,
    speaker_mention_topic: String,
    bus: Arc<dyn EventBus>,

    scenario_id: Option<String>,
    speaker: Option<Agent>,
    last_utterance: Option<String>,
    last_utterance_time: Option<u64>,
    active: bool,
    initialized: bool,
}

impl InitializeChatService {
    pub const NAME: &'static str = "chat";

    pub fn new(
        intention: impl Into<String>,
        init_interval_ms: Option<u64>,
        speaker_mention_topic: impl Into<String>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            intention: intention.into(),
            init_interval_ms,
            speaker_mention_topic: speaker_mention_topic.into(),
            bus,
            scenario_id: None,
            speaker: None,
            last_utterance: None,
            last_utterance_time: None,
            active: false,
            initialized: false,
        }
    }

    pub fn speaker(&self) -> Option<&Agent> {
        self.speaker.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn observe(&mut self, event: &Event) {
        match &event.payload {
            Payload::Scenario(scenario) => {
                if scenario.phase == ScenarioPhase::Stopped {
                    self.scenario_id = None;
                } else {
                    self.scenario_id = Some(scenario.scenario.id.clone());
                }
                if let Some(speaker) = &scenario.scenario.context.speaker {
                    if speaker.uri.is_some() {
                        tracing::debug!(speaker = %speaker.name, "set speaker");
                        self.speaker = Some(speaker.clone());
                    }
                }
            }
            Payload::TextSignal(text) => {
                self.last_utterance = Some(text.signal.id.clone());
                self.last_utterance_time = Some(event.metadata.timestamp);
            }
            Payload::Intention(intentions) => {
                self.active = intentions.contains(&self.intention);
                self.initialized = self.active && self.initialized;
            }
            _ => tracing::debug!(topic = %event.topic(), kind = event.kind(), "unhandled event"),
        }
    }

    /// Re-arm after `init_interval_ms` of silence.
    fn expire(&mut self, now: u64) {
        if let (Some(last), Some(interval)) = (self.last_utterance_time, self.init_interval_ms) {
            let elapsed = now.saturating_sub(last);
            if elapsed >= interval && self.initialized {
                tracing::debug!(elapsed, "reset chat initialization");
                self.initialized = false;
            }
        }
    }

    fn announce_if_needed(&mut self) {
        if !self.active || self.initialized {
            return;
        }
        let Some(speaker) = &self.speaker else {
            return;
        };

        let capsule = Capsule::text_mention(
            self.scenario_id.as_deref(),
            self.last_utterance.as_deref(),
            Some(speaker),
        );
        tracing::debug!(speaker = %speaker.name, "starting to chat");
        self.bus.publish(
            &self.speaker_mention_topic,
            Event::for_payload(vec![capsule]).with_source(Self::NAME),
        );
        self.initialized = true;
    }
}

#[async_trait]
impl Processor for InitializeChatService {
    async fn process(&mut self, event: &Event) -> LeolaniResult<()> {
        self.observe(event);
        self.announce_if_needed();
        Ok(())
    }

    async fn tick(&mut self) -> LeolaniResult<()> {
        self.expire(timestamp_now());
        self.announce_if_needed();
        Ok(())
    }
}
