//! Identity resolution: reconcile a perceptual identifier with a named friend.
//!
//! When a speaker introduces themselves, the context service registers the
//! face id under the spoken name while this service, independently, checks
//! whether that name already belonged to someone known under a different
//! identity. The registration is written by another worker, so the face id is
//! polled until it becomes visible or the retry budget is spent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::bus::{EventBus, Processor};
use crate::capsule::Capsule;
use crate::error::{ContextError, LeolaniResult};
use crate::event::{Event, Payload, ScenarioPhase};
use crate::friends::FriendStore;

/// Processor that publishes `owl:sameAs` capsules for reconciled identities.
pub struct IdResolutionService {
    friends: Arc<dyn FriendStore>,
    max_attempts: u32,
    retry_interval: Duration,
    knowledge_topic: String,
    bus: Arc<dyn EventBus>,
    scenario_id: Option<String>,
}

impl IdResolutionService {
    pub const NAME: &'static str = "idresolution";

    pub fn new(
        friends: Arc<dyn FriendStore>,
        max_attempts: u32,
        retry_interval: Duration,
        knowledge_topic: impl Into<String>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            friends,
            max_attempts: max_attempts.max(1),
            retry_interval,
            knowledge_topic: knowledge_topic.into(),
            bus,
            scenario_id: None,
        }
    }

    /// Scenario the published capsules are attributed to.
    pub fn set_scenario_id(&mut self, scenario_id: Option<String>) {
        self.scenario_id = scenario_id;
    }

    /// Same-as capsule linking `perceptual_id` to the identity known as
    /// `asserted_name`, if both resolve to different URIs.
    pub async fn resolve_same_as(
        &self,
        perceptual_id: &str,
        asserted_name: &str,
        turn: Option<&str>,
    ) -> Option<Capsule> {
        if perceptual_id == asserted_name {
            return None;
        }

        let name_uri = self.lookup_uri(asserted_name);

        let mut id_uri = None;
        let mut attempts = 0;
        while attempts < self.max_attempts {
            attempts += 1;
            id_uri = self.lookup_uri(perceptual_id);
            if id_uri.is_some() {
                break;
            }
            if attempts < self.max_attempts {
                tokio::time::sleep(self.retry_interval).await;
            }
        }
        tracing::debug!(perceptual_id, ?id_uri, attempts, "face id lookup finished");

        let (Some(id_uri), Some(name_uri)) = (id_uri, name_uri) else {
            tracing::info!(
                perceptual_id,
                asserted_name,
                attempts,
                "identity not resolvable yet"
            );
            return None;
        };
        if id_uri == name_uri {
            return None;
        }

        Some(Capsule::same_as(
            self.scenario_id.as_deref(),
            turn,
            asserted_name,
            &id_uri,
            &name_uri,
        ))
    }

    fn lookup_uri(&self, identifier: &str) -> Option<String> {
        match self.friends.get(identifier) {
            Ok(friend) => friend.and_then(|f| f.uri),
            Err(e) => {
                tracing::error!(identifier, error = %e, "friend lookup failed");
                None
            }
        }
    }
}

#[async_trait]
impl Processor for IdResolutionService {
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
            Payload::Annotation(annotations) => {
                let Some(mention) = annotations.mentions.first() else {
                    return Ok(());
                };
                let (Some(name), Some(identifier)) = (mention.entity_name(), mention.vector_identity())
                else {
                    return Err(ContextError::MissingAnnotation {
                        mention_id: mention.id.clone(),
                        annotation: "Entity/VectorIdentity".into(),
                    }
                    .into());
                };

                match self.resolve_same_as(identifier, name, mention.signal_id()).await {
                    Some(capsule) => {
                        tracing::info!(identifier, name, "resolved identity");
                        self.bus.publish(
                            &self.knowledge_topic,
                            Event::for_payload(vec![capsule]).with_source(Self::NAME),
                        );
                    }
                    None => tracing::info!(identifier, name, "no identity resolution"),
                }
            }
            _ => tracing::debug!(topic = %event.topic(), kind = event.kind(), "unhandled event"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::bus::{Recorder, SynchronousEventBus};
    use crate::error::FriendError;
    use crate::friends::{Friend, FriendResult, MemoryFriendStore, Provenance};

    /// Hides one identifier for the first `hidden_reads` lookups.
    struct Delayed {
        inner: MemoryFriendStore,
        identifier: String,
        hidden_reads: u32,
        reads: AtomicU32,
    }

    impl FriendStore for Delayed {
        fn add(&self, identifier: &str, names: &[String], p: &Provenance) -> FriendResult<Option<String>> {
            self.inner.add(identifier, names, p)
        }

        fn get(&self, identifier: &str) -> FriendResult<Option<Friend>> {
            if identifier == self.identifier
                && self.reads.fetch_add(1, Ordering::SeqCst) < self.hidden_reads
            {
                return Ok(None);
            }
            self.inner.get(identifier)
        }

        fn get_all(&self) -> FriendResult<BTreeMap<String, Friend>> {
            self.inner.get_all()
        }
    }

    struct Broken;

    impl FriendStore for Broken {
        fn add(&self, _: &str, _: &[String], _: &Provenance) -> FriendResult<Option<String>> {
            Err(FriendError::Redb { message: "down".into() })
        }
        fn get(&self, _: &str) -> FriendResult<Option<Friend>> {
            Err(FriendError::Redb { message: "down".into() })
        }
        fn get_all(&self) -> FriendResult<BTreeMap<String, Friend>> {
            Err(FriendError::Redb { message: "down".into() })
        }
    }

    fn names(n: &str) -> Vec<String> {
        vec![n.to_string()]
    }

    fn service(friends: Arc<dyn FriendStore>, attempts: u32) -> IdResolutionService {
        let bus: Arc<dyn EventBus> = Arc::new(SynchronousEventBus::new());
        IdResolutionService::new(friends, attempts, Duration::from_millis(5), "knowledge", bus)
    }

    fn delayed(hidden_reads: u32) -> Arc<Delayed> {
        let inner = MemoryFriendStore::new();
        let p = Provenance::default();
        // "Thomas" was known before under another identity.
        inner.add("Thomas", &names("Thomas Anderson"), &p).unwrap();
        inner.add("face_1", &names("Thomas"), &p).unwrap();
        Arc::new(Delayed {
            inner,
            identifier: "face_1".into(),
            hidden_reads,
            reads: AtomicU32::new(0),
        })
    }

    #[tokio::test]
    async fn equal_inputs_need_no_resolution() {
        let svc = service(delayed(0), 3);
        assert!(svc.resolve_same_as("Thomas", "Thomas", None).await.is_none());
    }

    #[tokio::test]
    async fn distinct_uris_yield_same_as_after_retries() {
        let store = delayed(2);
        let mut svc = service(store.clone(), 5);
        svc.set_scenario_id(Some("scenario-1".into()));

        let capsule = svc
            .resolve_same_as("face_1", "Thomas", Some("signal-1"))
            .await
            .expect("same-as capsule");
        let statement = capsule.as_statement().unwrap();
        assert_eq!(
            statement.subject.uri.as_deref(),
            Some("http://cltl.nl/leolani/world/thomas")
        );
        assert_eq!(
            statement.object.uri.as_deref(),
            Some("http://cltl.nl/leolani/world/thomas-anderson")
        );
        assert_eq!(statement.chat.as_deref(), Some("scenario-1"));
        assert_eq!(statement.turn.as_deref(), Some("signal-1"));
        assert_eq!(store.reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_return_none() {
        let store = delayed(u32::MAX);
        let svc = service(store.clone(), 4);
        assert!(svc.resolve_same_as("face_1", "Thomas", None).await.is_none());
        assert_eq!(store.reads.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn identical_uris_return_none() {
        let store = MemoryFriendStore::new();
        store.add("face_1", &names("Thomas"), &Provenance::default()).unwrap();
        store.add("Thomas", &names("Thomas"), &Provenance::default()).unwrap();
        let svc = service(Arc::new(store), 2);
        assert!(svc.resolve_same_as("face_1", "Thomas", None).await.is_none());
    }

    #[tokio::test]
    async fn store_errors_count_as_unresolved() {
        let svc = service(Arc::new(Broken), 2);
        assert!(svc.resolve_same_as("face_1", "Thomas", None).await.is_none());
    }

    #[tokio::test]
    async fn speaker_event_publishes_capsule_for_current_scenario() {
        use crate::context::scenario::{Agent, Location, Scenario};
        use crate::event::{Annotation, AnnotationEvent, Mention, ScenarioEvent, Segment};

        let bus: Arc<dyn EventBus> = Arc::new(SynchronousEventBus::new());
        let recorder = Recorder::attach(bus.as_ref(), ["knowledge"]);
        let mut svc = IdResolutionService::new(
            delayed(0),
            2,
            Duration::from_millis(5),
            "knowledge",
            Arc::clone(&bus),
        );

        let scenario = Scenario::new(Agent::leolani(), Location::default());
        let scenario_id = scenario.id.clone();
        svc.process(&Event::for_payload(ScenarioEvent::started(scenario)))
            .await
            .unwrap();

        let speaker = Event::for_payload(AnnotationEvent {
            mentions: vec![Mention {
                id: "m".into(),
                segment: vec![Segment {
                    container_id: "signal-7".into(),
                    bounds: None,
                }],
                annotations: vec![
                    Annotation::Entity {
                        text: "Thomas".into(),
                    },
                    Annotation::VectorIdentity("face_1".into()),
                ],
            }],
        });
        svc.process(&speaker).await.unwrap();

        let published = recorder.events();
        assert_eq!(published.len(), 1);
        let Payload::Knowledge(k) = &published[0].payload else {
            panic!("expected knowledge");
        };
        let statement = k.capsules[0].as_statement().unwrap();
        assert_eq!(statement.context_id.as_deref(), Some(scenario_id.as_str()));
        assert_eq!(statement.turn.as_deref(), Some("signal-7"));
    }
}
