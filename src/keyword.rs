//! Ends the conversation when the user says goodbye.

use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::{EventBus, Processor};
use crate::error::LeolaniResult;
use crate::event::{DesireEvent, Event, Payload, ScenarioPhase, TextSignal, TextSignalEvent};
use crate::sentences::{self, GOODBYE};

/// Desire published on a goodbye.
pub const QUIT: &str = "quit";

pub struct KeywordService {
    desire_topic: String,
    text_out_topic: String,
    bus: Arc<dyn EventBus>,
    scenario_id: Option<String>,
}

impl KeywordService {
    pub const NAME: &'static str = "keyword";

    pub fn new(
        desire_topic: impl Into<String>,
        text_out_topic: impl Into<String>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            desire_topic: desire_topic.into(),
            text_out_topic: text_out_topic.into(),
            bus,
            scenario_id: None,
        }
    }
}

#[async_trait]
impl Processor for KeywordService {
    async fn process(&mut self, event: &Event) -> LeolaniResult<()> {
        let text = match &event.payload {
            Payload::TextSignal(text) => text,
            Payload::Scenario(scenario) => {
                self.scenario_id = match scenario.phase {
                    ScenarioPhase::Stopped => None,
                    ScenarioPhase::Started | ScenarioPhase::Updated => {
                        Some(scenario.scenario.id.clone())
                    }
                };
                return Ok(());
            }
            _ => {
                tracing::debug!(topic = %event.topic(), kind = event.kind(), "unhandled event");
                return Ok(());
            }
        };
        if text.from_agent || !sentences::is_goodbye(&text.signal.text) {
            return Ok(());
        }

        tracing::info!(utterance = %text.signal.text, "goodbye detected");
        self.bus.publish(
            &self.desire_topic,
            Event::for_payload(DesireEvent::new([QUIT])).with_source(Self::NAME),
        );
        let farewell = TextSignal::new(self.scenario_id.clone(), sentences::choose(GOODBYE));
        self.bus.publish(
            &self.text_out_topic,
            Event::for_payload(TextSignalEvent::for_agent(farewell)).with_source(Self::NAME),
        );
        Ok(())
    }
}
