//! Context/scenario manager.
//!
//! Owns the one active [`Scenario`] of an agent: starts it when the `init`
//! intention comes up, folds speaker, person, and object observations into its
//! context, and ends it on `terminate` or an achieved `quit`. Every observable
//! change is re-published on the scenario topic; nobody else mutates the
//! scenario.

pub mod location;
pub mod scenario;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::bus::{EventBus, Processor};
use crate::capsule::Capsule;
use crate::error::{ContextError, LeolaniResult, LocationError};
use crate::event::{Event, Mention, Payload, ScenarioEvent};
use crate::friends::{FriendStore, Provenance};

use location::LocationProvider;
use scenario::{Agent, Location, Scenario};

/// Topics the context service reads annotations from and writes to.
#[derive(Debug, Clone)]
pub struct ContextTopics {
    pub scenario: String,
    pub knowledge: String,
    pub speaker: String,
    pub vector_id: String,
    pub object: String,
}

impl From<&crate::config::TopicsConfig> for ContextTopics {
    fn from(t: &crate::config::TopicsConfig) -> Self {
        Self {
            scenario: t.scenario.clone(),
            knowledge: t.knowledge.clone(),
            speaker: t.speaker.clone(),
            vector_id: t.vector_id.clone(),
            object: t.object.clone(),
        }
    }
}

/// Processor owning the current scenario.
pub struct ContextService {
    topics: ContextTopics,
    agent: Agent,
    friends: Arc<dyn FriendStore>,
    locator: Option<Arc<dyn LocationProvider>>,
    location_timeout: Duration,
    bus: Arc<dyn EventBus>,
    scenario: Option<Scenario>,
}

impl ContextService {
    pub const NAME: &'static str = "context";

    pub fn new(
        topics: ContextTopics,
        friends: Arc<dyn FriendStore>,
        locator: Option<Arc<dyn LocationProvider>>,
        location_timeout: Duration,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            topics,
            agent: Agent::leolani(),
            friends,
            locator,
            location_timeout,
            bus,
            scenario: None,
        }
    }

    /// The active scenario, if any.
    pub fn scenario(&self) -> Option<&Scenario> {
        self.scenario.as_ref()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Start a new scenario, ending the active one first.
    pub async fn start_scenario(&mut self) {
        if self.scenario.is_some() {
            tracing::info!("scenario already active, replacing it");
            self.stop_scenario();
        }

        let location = match self.lookup_location().await {
            Ok(location) => location,
            Err(e) => {
                tracing::warn!(error = %e, "geolocation unavailable, using empty location");
                Location::default()
            }
        };

        let scenario = Scenario::new(self.agent.clone(), location);
        let capsule = Capsule::context(&scenario);

        self.publish(&self.topics.scenario, ScenarioEvent::started(scenario.clone()));
        self.publish(&self.topics.knowledge, vec![capsule]);
        tracing::info!(
            scenario_id = %scenario.id,
            location = ?scenario.context.location,
            "started scenario"
        );
        self.scenario = Some(scenario);
    }

    /// End the active scenario. No-op without one.
    pub fn stop_scenario(&mut self) {
        let Some(mut scenario) = self.scenario.take() else {
            tracing::debug!("no active scenario to stop");
            return;
        };
        scenario.finish();
        tracing::info!(scenario_id = %scenario.id, "stopped scenario");
        self.publish(&self.topics.scenario, ScenarioEvent::stopped(scenario));
    }

    async fn lookup_location(&self) -> Result<Location, LocationError> {
        let Some(locator) = self.locator.clone() else {
            return Ok(Location::default());
        };

        let lookup = tokio::task::spawn_blocking(move || locator.locate());
        match tokio::time::timeout(self.location_timeout, lookup).await {
            Err(_) => Err(LocationError::Timeout {
                timeout_ms: self.location_timeout.as_millis() as u64,
            }),
            Ok(Err(join)) => Err(LocationError::Request {
                url: "geolocation".into(),
                message: join.to_string(),
            }),
            Ok(Ok(result)) => result,
        }
    }

    // ── Observations ────────────────────────────────────────────────────

    fn active_scenario(&mut self, update: &str) -> Result<&mut Scenario, ContextError> {
        self.scenario
            .as_mut()
            .ok_or_else(|| ContextError::NoActiveScenario {
                update: update.to_string(),
            })
    }

    /// Register the speaker named in the first mention and make them current.
    pub fn update_speaker(&mut self, mentions: &[Mention]) -> LeolaniResult<()> {
        let scenario_id = self.active_scenario("speaker")?.id.clone();
        let Some(mention) = mentions.first() else {
            tracing::debug!("speaker event without mentions");
            return Ok(());
        };
        let name = mention
            .entity_name()
            .ok_or_else(|| ContextError::MissingAnnotation {
                mention_id: mention.id.clone(),
                annotation: "Entity".into(),
            })?;
        let identifier = mention
            .vector_identity()
            .ok_or_else(|| ContextError::MissingAnnotation {
                mention_id: mention.id.clone(),
                annotation: "VectorIdentity".into(),
            })?;

        let provenance = Provenance::new(Some(&scenario_id), Some(&mention.id));
        let uri = self
            .friends
            .add(identifier, &[name.to_string()], &provenance)?;

        let face_id = Capsule::face_id(
            Some(&scenario_id),
            Some(&mention.id),
            uri.as_deref(),
            identifier,
            name,
        );
        self.publish(&self.topics.knowledge, vec![face_id]);

        let scenario = self.active_scenario("speaker")?;
        scenario.context.speaker = Some(Agent::new(name, uri.as_deref()));
        let snapshot = scenario.clone();
        tracing::info!(scenario_id = %snapshot.id, speaker = name, uri = ?uri, "updated speaker");
        self.publish(&self.topics.scenario, ScenarioEvent::updated(snapshot));
        Ok(())
    }

    /// Add persons for every vector identity in `mentions`.
    pub fn update_persons(&mut self, mentions: &[Mention]) -> LeolaniResult<()> {
        self.active_scenario("persons")?;

        let persons: Vec<Agent> = mentions
            .iter()
            .flat_map(|m| m.vector_identities())
            .map(|face_id| self.person_for(face_id))
            .collect();

        let scenario = self.active_scenario("persons")?;
        let mut added = false;
        for person in persons {
            added |= scenario.context.add_person(person);
        }

        if added {
            let snapshot = scenario.clone();
            tracing::info!(
                scenario_id = %snapshot.id,
                persons = snapshot.context.persons.len(),
                "updated persons"
            );
            self.publish(&self.topics.scenario, ScenarioEvent::updated(snapshot));
        }
        Ok(())
    }

    fn person_for(&self, face_id: &str) -> Agent {
        let friend = match self.friends.get(face_id) {
            Ok(friend) => friend,
            Err(e) => {
                tracing::warn!(face_id, error = %e, "friend lookup failed, using raw identifier");
                None
            }
        };
        match friend {
            Some(f) => match (f.display_name(), f.uri.as_deref()) {
                (Some(name), uri) => Agent::new(name, uri),
                (None, Some(uri)) => Agent::new(uri, Some(uri)),
                (None, None) => Agent::new(face_id, None),
            },
            None => Agent::new(face_id, None),
        }
    }

    /// Add net-new object occurrences from `mentions`.
    pub fn update_objects(&mut self, mentions: &[Mention]) -> LeolaniResult<()> {
        let scenario = self.active_scenario("objects")?;
        let added = scenario
            .context
            .add_objects(mentions.iter().flat_map(|m| m.object_labels()));

        if !added.is_empty() {
            let snapshot = scenario.clone();
            tracing::info!(scenario_id = %snapshot.id, ?added, "updated objects");
            self.publish(&self.topics.scenario, ScenarioEvent::updated(snapshot));
        }
        Ok(())
    }

    fn publish(&self, topic: &str, payload: impl Into<Payload>) {
        self.bus
            .publish(topic, Event::for_payload(payload).with_source(Self::NAME));
    }
}

#[async_trait]
impl Processor for ContextService {
    async fn process(&mut self, event: &Event) -> LeolaniResult<()> {
        let result = match &event.payload {
            Payload::Intention(intention) => {
                if intention.contains("init") {
                    self.start_scenario().await;
                }
                if intention.contains("terminate") {
                    self.stop_scenario();
                }
                Ok(())
            }
            Payload::Desire(desire) => {
                if desire.contains("quit") {
                    self.stop_scenario();
                }
                Ok(())
            }
            Payload::Annotation(annotations) => {
                let topic = event.topic();
                if topic == self.topics.speaker {
                    self.update_speaker(&annotations.mentions)
                } else if topic == self.topics.vector_id {
                    self.update_persons(&annotations.mentions)
                } else if topic == self.topics.object {
                    self.update_objects(&annotations.mentions)
                } else {
                    tracing::debug!(topic, "annotations on unexpected topic");
                    Ok(())
                }
            }
            _ => {
                tracing::debug!(topic = %event.topic(), kind = event.kind(), "unhandled event");
                Ok(())
            }
        };

        match result {
            Err(crate::error::LeolaniError::Context(ContextError::NoActiveScenario { update })) => {
                tracing::debug!(update = %update, "no active scenario, dropping event");
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Recorder, SynchronousEventBus};
    use crate::event::{Annotation, AnnotationEvent, DesireEvent, IntentionEvent, ObjectValue, ScenarioPhase, Segment};
    use crate::friends::MemoryFriendStore;

    struct Failing;

    impl LocationProvider for Failing {
        fn locate(&self) -> Result<Location, LocationError> {
            Err(LocationError::Request {
                url: "http://unreachable".into(),
                message: "connection refused".into(),
            })
        }
    }

    fn topics() -> ContextTopics {
        ContextTopics::from(&crate::config::TopicsConfig::default())
    }

    fn setup(locator: Option<Arc<dyn LocationProvider>>) -> (ContextService, Recorder, Arc<MemoryFriendStore>) {
        let bus: Arc<dyn EventBus> = Arc::new(SynchronousEventBus::new());
        let t = topics();
        let recorder = Recorder::attach(bus.as_ref(), [t.scenario.clone(), t.knowledge.clone()]);
        let friends = Arc::new(MemoryFriendStore::new());
        let service = ContextService::new(t, friends.clone(), locator, Duration::from_millis(500), bus);
        (service, recorder, friends)
    }

    fn annotations(topic: &str, annotations: Vec<Annotation>) -> Event {
        let mut event = Event::for_payload(AnnotationEvent {
            mentions: vec![Mention {
                id: "mention-1".into(),
                segment: vec![Segment {
                    container_id: "signal-1".into(),
                    bounds: None,
                }],
                annotations,
            }],
        });
        event.metadata.topic = topic.to_string();
        event
    }

    fn object(label: &str) -> Annotation {
        Annotation::Object(ObjectValue {
            label: label.into(),
            confidence: 0.9,
        })
    }

    fn phases(recorder: &Recorder) -> Vec<ScenarioPhase> {
        recorder
            .events()
            .into_iter()
            .filter_map(|e| match e.payload {
                Payload::Scenario(s) => Some(s.phase),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn start_publishes_started_and_context_capsule_with_empty_location_on_failure() {
        let (mut ctx, recorder, _) = setup(Some(Arc::new(Failing)));
        ctx.process(&Event::for_payload(IntentionEvent::new(["init"])))
            .await
            .unwrap();

        assert_eq!(phases(&recorder), vec![ScenarioPhase::Started]);
        let knowledge = recorder.on(&topics().knowledge);
        assert_eq!(knowledge.len(), 1);
        let Payload::Knowledge(k) = &knowledge[0].payload else {
            panic!("expected knowledge payload");
        };
        let context = k.capsules[0].as_context().unwrap();
        assert_eq!(context.country, "");
        assert_eq!(context.region, "");
        assert_eq!(context.city, "");
        assert_eq!(context.context_id, ctx.scenario().unwrap().id);
    }

    #[tokio::test]
    async fn second_init_replaces_scenario() {
        let (mut ctx, recorder, _) = setup(None);
        let init = Event::for_payload(IntentionEvent::new(["init"]));
        ctx.process(&init).await.unwrap();
        let first = ctx.scenario().unwrap().id.clone();
        ctx.process(&init).await.unwrap();

        assert_ne!(ctx.scenario().unwrap().id, first);
        assert_eq!(
            phases(&recorder),
            vec![ScenarioPhase::Started, ScenarioPhase::Stopped, ScenarioPhase::Started]
        );
    }

    #[tokio::test]
    async fn quit_and_terminate_end_the_scenario() {
        let (mut ctx, recorder, _) = setup(None);
        ctx.start_scenario().await;
        ctx.process(&Event::for_payload(DesireEvent::new(["quit"])))
            .await
            .unwrap();
        assert!(ctx.scenario().is_none());

        ctx.start_scenario().await;
        ctx.process(&Event::for_payload(IntentionEvent::new(["terminate"])))
            .await
            .unwrap();
        assert!(ctx.scenario().is_none());

        let stopped: Vec<_> = recorder
            .events()
            .into_iter()
            .filter_map(|e| match e.payload {
                Payload::Scenario(s) if s.phase == ScenarioPhase::Stopped => Some(s.scenario),
                _ => None,
            })
            .collect();
        assert_eq!(stopped.len(), 2);
        assert!(stopped.iter().all(|s| s.end.is_some()));
    }

    #[tokio::test]
    async fn perception_without_scenario_is_dropped() {
        let (mut ctx, recorder, _) = setup(None);
        let t = topics();
        let event = annotations(&t.object, vec![object("chair")]);
        assert!(ctx.process(&event).await.is_ok());
        assert!(recorder.is_empty());
    }

    #[tokio::test]
    async fn speaker_is_registered_and_published() {
        let (mut ctx, recorder, friends) = setup(None);
        ctx.start_scenario().await;
        recorder.clear();

        let t = topics();
        let event = annotations(
            &t.speaker,
            vec![
                Annotation::Entity {
                    text: "Thomas".into(),
                },
                Annotation::VectorIdentity("face_1".into()),
            ],
        );
        ctx.process(&event).await.unwrap();

        let speaker = ctx.scenario().unwrap().context.speaker.clone().unwrap();
        assert_eq!(speaker.name, "Thomas");
        assert_eq!(speaker.uri.as_deref(), Some("http://cltl.nl/leolani/world/thomas"));
        assert_eq!(friends.get("face_1").unwrap().unwrap().names, vec!["Thomas"]);
        assert_eq!(phases(&recorder), vec![ScenarioPhase::Updated]);

        let face_id = recorder.on(&t.knowledge);
        assert_eq!(face_id.len(), 1);
    }

    #[tokio::test]
    async fn speaker_without_identity_is_an_error() {
        let (mut ctx, _recorder, _) = setup(None);
        ctx.start_scenario().await;
        let event = annotations(
            &topics().speaker,
            vec![Annotation::Entity {
                text: "Thomas".into(),
            }],
        );
        assert!(ctx.process(&event).await.is_err());
    }

    #[tokio::test]
    async fn persons_use_friend_names_and_publish_only_new() {
        let (mut ctx, recorder, friends) = setup(None);
        friends
            .add("face_1", &["Anna".to_string()], &Provenance::default())
            .unwrap();
        ctx.start_scenario().await;
        recorder.clear();

        let t = topics();
        let event = annotations(
            &t.vector_id,
            vec![
                Annotation::VectorIdentity("face_1".into()),
                Annotation::VectorIdentity("face_2".into()),
            ],
        );
        ctx.process(&event).await.unwrap();
        ctx.process(&event).await.unwrap();

        let persons = &ctx.scenario().unwrap().context.persons;
        assert_eq!(persons.len(), 2);
        assert_eq!(persons[0].name, "Anna");
        assert_eq!(persons[1].name, "face_2");
        assert_eq!(phases(&recorder), vec![ScenarioPhase::Updated]);
    }

    #[tokio::test]
    async fn repeated_object_delta_is_idempotent() {
        let (mut ctx, recorder, _) = setup(None);
        ctx.start_scenario().await;
        recorder.clear();

        let t = topics();
        let event = annotations(&t.object, vec![object("chair"), object("chair"), object("cup")]);
        ctx.process(&event).await.unwrap();
        ctx.process(&event).await.unwrap();

        let context = &ctx.scenario().unwrap().context;
        assert_eq!(context.object_count("chair"), 2);
        assert_eq!(context.object_count("cup"), 1);
        assert_eq!(phases(&recorder), vec![ScenarioPhase::Updated]);
    }
}
