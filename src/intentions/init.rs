//! Greeting flow while the agent is idle.
//!
//! Every tick (or when someone greets the agent) it invites people to talk and
//! waits for a "yes". An invitation left unanswered for the timeout is
//! withdrawn with a goodbye.

use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::{EventBus, Processor};
use crate::error::LeolaniResult;
use crate::event::{
    DesireEvent, Event, Payload, ScenarioPhase, TextSignal, TextSignalEvent, timestamp_now,
};
use crate::sentences::{self, GOODBYE, GREETING};

/// Desire published once someone accepts the invitation.
pub const INITIALIZED: &str = "initialized";

/// What triggered an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitInput<'a> {
    Tick,
    Utterance(&'a str),
}

/// Outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitAction {
    /// Say this invitation.
    Greet(String),
    /// The invitation was accepted.
    Initialized,
    /// The invitation timed out; say this goodbye.
    Withdraw(String),
}

/// Pure greeting state machine, driven by wall-clock milliseconds.
#[derive(Debug, Clone)]
pub struct InitState {
    greeting: String,
    timeout_ms: u64,
    pending_since: Option<u64>,
}

impl InitState {
    pub fn new(greeting: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            greeting: greeting.into(),
            timeout_ms,
            pending_since: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending_since.is_some()
    }

    pub fn handle(&mut self, input: InitInput<'_>, now: u64) -> Option<InitAction> {
        if let Some(since) = self.pending_since {
            if now.saturating_sub(since) >= self.timeout_ms {
                self.pending_since = None;
                let goodbye = format!("{} Let me know when you are back.", sentences::choose(GOODBYE));
                return Some(InitAction::Withdraw(goodbye));
            }
        }

        let triggered = match input {
            InitInput::Tick => true,
            InitInput::Utterance(text) => sentences::contains_greeting(text),
        };
        if triggered && self.pending_since.is_none() {
            self.pending_since = Some(now);
            let invitation = format!("{} {}", sentences::choose(GREETING), self.greeting);
            return Some(InitAction::Greet(invitation));
        }

        if let (Some(_), InitInput::Utterance(text)) = (self.pending_since, input) {
            if text.to_lowercase().contains("yes") {
                self.pending_since = None;
                return Some(InitAction::Initialized);
            }
        }

        None
    }
}

/// Processor running [`InitState`] on the bus.
pub struct InitService {
    state: InitState,
    desire_topic: String,
    text_out_topic: String,
    bus: Arc<dyn EventBus>,
    scenario_id: Option<String>,
}

impl InitService {
    pub const NAME: &'static str = "init";

    pub fn new(
        state: InitState,
        desire_topic: impl Into<String>,
        text_out_topic: impl Into<String>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            state,
            desire_topic: desire_topic.into(),
            text_out_topic: text_out_topic.into(),
            bus,
            scenario_id: None,
        }
    }

    fn apply(&mut self, input: InitInput<'_>) {
        let Some(action) = self.state.handle(input, timestamp_now()) else {
            tracing::trace!(?input, pending = self.state.is_pending(), "nothing to do");
            return;
        };

        match action {
            InitAction::Greet(text) => {
                tracing::info!("start initialization");
                self.say(text);
            }
            InitAction::Initialized => {
                tracing::info!("interaction initialized");
                self.bus.publish(
                    &self.desire_topic,
                    Event::for_payload(DesireEvent::new([INITIALIZED])).with_source(Self::NAME),
                );
            }
            InitAction::Withdraw(text) => {
                tracing::info!("reset initialization");
                self.say(text);
            }
        }
    }

    fn say(&self, text: String) {
        let signal = TextSignal::new(self.scenario_id.clone(), text);
        self.bus.publish(
            &self.text_out_topic,
            Event::for_payload(TextSignalEvent::for_agent(signal)).with_source(Self::NAME),
        );
    }
}

#[async_trait]
impl Processor for InitService {
    async fn process(&mut self, event: &Event) -> LeolaniResult<()> {
        match &event.payload {
            Payload::Scenario(scenario) => {
                self.scenario_id = match scenario.phase {
                    ScenarioPhase::Stopped => None,
                    ScenarioPhase::Started | ScenarioPhase::Updated => {
                        Some(scenario.scenario.id.clone())
                    }
                };
            }
            Payload::TextSignal(text) if !text.from_agent => {
                self.apply(InitInput::Utterance(&text.signal.text));
            }
            _ => tracing::debug!(topic = %event.topic(), kind = event.kind(), "unhandled event"),
        }
        Ok(())
    }

    async fn tick(&mut self) -> LeolaniResult<()> {
        self.apply(InitInput::Tick);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Recorder, SynchronousEventBus};
    use crate::context::scenario::{Agent, Location, Scenario};
    use crate::event::ScenarioEvent;

    const TIMEOUT: u64 = 120_000;

    fn state() -> InitState {
        InitState::new("Shall we talk?", TIMEOUT)
    }

    #[test]
    fn tick_greets_once_while_pending() {
        let mut s = state();
        let Some(InitAction::Greet(text)) = s.handle(InitInput::Tick, 0) else {
            panic!("expected greeting");
        };
        assert!(text.ends_with("Shall we talk?"));
        assert!(s.handle(InitInput::Tick, 30_000).is_none());
        assert!(s.is_pending());
    }

    #[test]
    fn yes_before_timeout_initializes() {
        let mut s = state();
        s.handle(InitInput::Tick, 0);
        assert!(s.handle(InitInput::Utterance("no thanks"), 1_000).is_none());
        assert_eq!(
            s.handle(InitInput::Utterance("Yes, please"), 2_000),
            Some(InitAction::Initialized)
        );
        assert!(!s.is_pending());
    }

    #[test]
    fn greeting_keyword_starts_invitation() {
        let mut s = state();
        assert!(s.handle(InitInput::Utterance("what a day"), 0).is_none());
        assert!(matches!(
            s.handle(InitInput::Utterance("Hello there"), 0),
            Some(InitAction::Greet(_))
        ));
    }

    #[test]
    fn yes_without_invitation_is_ignored() {
        let mut s = state();
        assert!(s.handle(InitInput::Utterance("yes"), 0).is_none());
    }

    #[test]
    fn timeout_is_inclusive_and_checked_on_ticks() {
        let mut s = state();
        s.handle(InitInput::Tick, 1_000);
        assert!(s.handle(InitInput::Tick, 1_000 + TIMEOUT - 1).is_none());

        let Some(InitAction::Withdraw(text)) = s.handle(InitInput::Tick, 1_000 + TIMEOUT) else {
            panic!("expected withdrawal");
        };
        assert!(text.ends_with("Let me know when you are back."));
        assert!(!s.is_pending());

        // A late "yes" does not count.
        assert!(s.handle(InitInput::Utterance("yes"), 1_000 + TIMEOUT + 1).is_none());
    }

    #[test]
    fn late_yes_withdraws_instead_of_initializing() {
        let mut s = state();
        s.handle(InitInput::Tick, 0);
        assert!(matches!(
            s.handle(InitInput::Utterance("yes"), TIMEOUT + 5),
            Some(InitAction::Withdraw(_))
        ));
    }

    #[tokio::test]
    async fn greeting_carries_the_current_scenario() {
        let bus: Arc<dyn EventBus> = Arc::new(SynchronousEventBus::new());
        let recorder = Recorder::attach(bus.as_ref(), ["text_out"]);
        let mut init = InitService::new(state(), "desire", "text_out", Arc::clone(&bus));

        let scenario = Scenario::new(Agent::leolani(), Location::default());
        init.process(&Event::for_payload(ScenarioEvent::started(scenario.clone())))
            .await
            .unwrap();
        init.tick().await.unwrap();

        let events = recorder.events();
        assert_eq!(events.len(), 1);
        let Payload::TextSignal(greeting) = &events[0].payload else {
            panic!("expected text");
        };
        assert!(greeting.from_agent);
        assert_eq!(greeting.signal.scenario_id.as_deref(), Some(scenario.id.as_str()));

        init.process(&Event::for_payload(ScenarioEvent::stopped(scenario)))
            .await
            .unwrap();
        assert!(init.scenario_id.is_none());
    }
}
