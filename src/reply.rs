//! Chat responder.
//!
//! Answers user utterances while a scenario is active. Reply generation is
//! behind the [`Replier`] trait; whatever goes wrong there, the user still
//! gets a short acknowledgement instead of silence.

use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::{EventBus, Processor};
use crate::context::scenario::Scenario;
use crate::error::{LeolaniResult, ReplyError};
use crate::event::{Event, Payload, ScenarioPhase, TextSignal, TextSignalEvent};
use crate::sentences::{self, ELOQUENCE, RESPONSES};

/// Produces a reply to one utterance.
///
/// `Ok(None)` means there is nothing worth saying.
pub trait Replier: Send + 'static {
    fn reply(&mut self, scenario: &Scenario, utterance: &str) -> Result<Option<String>, ReplyError>;
}

/// Small-talk replier picking from canned responses.
#[derive(Debug, Default)]
pub struct CannedReplier;

impl Replier for CannedReplier {
    fn reply(&mut self, _scenario: &Scenario, utterance: &str) -> Result<Option<String>, ReplyError> {
        if utterance.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(sentences::choose(RESPONSES)))
    }
}

pub struct ReplyService<R> {
    replier: R,
    text_out_topic: String,
    bus: Arc<dyn EventBus>,
    scenario: Option<Scenario>,
}

impl<R: Replier> ReplyService<R> {
    pub const NAME: &'static str = "reply";

    pub fn new(replier: R, text_out_topic: impl Into<String>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            replier,
            text_out_topic: text_out_topic.into(),
            bus,
            scenario: None,
        }
    }

    fn respond(&mut self, utterance: &str) {
        let Some(scenario) = &self.scenario else {
            tracing::debug!(utterance, "drop utterance as there is no scenario");
            return;
        };

        let reply = match self.replier.reply(scenario, utterance) {
            Ok(Some(reply)) if !reply.trim().is_empty() => reply,
            Ok(_) => {
                tracing::debug!(utterance, "no reply generated, acknowledging");
                sentences::choose(ELOQUENCE)
            }
            Err(e) => {
                tracing::warn!(utterance, error = %e, "reply generation failed, acknowledging");
                sentences::choose(ELOQUENCE)
            }
        };

        tracing::info!(reply = %reply, "utterance reply");
        let signal = TextSignal::new(Some(scenario.id.clone()), reply);
        self.bus.publish(
            &self.text_out_topic,
            Event::for_payload(TextSignalEvent::for_agent(signal)).with_source(Self::NAME),
        );
    }
}

#[async_trait]
impl<R: Replier> Processor for ReplyService<R> {
    async fn process(&mut self, event: &Event) -> LeolaniResult<()> {
        match &event.payload {
            Payload::Scenario(s) => {
                self.scenario = match s.phase {
                    ScenarioPhase::Stopped => None,
                    ScenarioPhase::Started | ScenarioPhase::Updated => Some(s.scenario.clone()),
                };
            }
            Payload::TextSignal(text) if !text.from_agent => self.respond(&text.signal.text),
            _ => tracing::debug!(topic = %event.topic(), kind = event.kind(), "unhandled event"),
        }
        Ok(())
    }
}
