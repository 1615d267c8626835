//! End-to-end tests of the wired application.
//!
//! Every component runs in its own topic worker on a shared in-process bus,
//! exactly as `leolani run` starts them. Geolocation fails on purpose and the
//! HTTP view is disabled.

use std::sync::Arc;
use std::time::Duration;

use leolani::app::{Application, Collaborators};
use leolani::bus::{EventBus, Recorder, SynchronousEventBus};
use leolani::capsule::{Capsule, OWL_SAME_AS, world_uri};
use leolani::config::LeolaniConfig;
use leolani::context::location::LocationProvider;
use leolani::context::scenario::Location;
use leolani::error::LocationError;
use leolani::event::{
    Annotation, AnnotationEvent, DesireEvent, Event, ImageSignal, ImageSignalEvent, Mention,
    ObjectValue, Payload, ScenarioPhase, Segment, TextSignal, TextSignalEvent,
};
use leolani::friends::{FriendStore, MemoryFriendStore, Provenance};
use leolani::sentences::GOODBYE;

struct Unreachable;

impl LocationProvider for Unreachable {
    fn locate(&self) -> Result<Location, LocationError> {
        Err(LocationError::Request {
            url: "http://geolocation.invalid".into(),
            message: "dns error".into(),
        })
    }
}

fn test_config() -> LeolaniConfig {
    let mut config = LeolaniConfig::default();
    config.monitoring.enabled = false;
    config.init.tick_secs = 3_600;
    config.idresolution.max_attempts = 20;
    config.idresolution.retry_interval_ms = 10;
    config
}

async fn start(friends: Arc<MemoryFriendStore>) -> (Application, Arc<dyn EventBus>, Recorder) {
    let config = test_config();
    let bus: Arc<dyn EventBus> = Arc::new(SynchronousEventBus::new());
    let t = &config.topics;
    let recorder = Recorder::attach(
        bus.as_ref(),
        [
            t.intention.clone(),
            t.scenario.clone(),
            t.knowledge.clone(),
            t.text_out.clone(),
        ],
    );
    let app = Application::start_with(
        config.clone(),
        Collaborators {
            bus: Some(Arc::clone(&bus)),
            friends: Some(friends as Arc<dyn FriendStore>),
            locator: Some(Some(Arc::new(Unreachable) as Arc<dyn LocationProvider>)),
        },
    )
    .await
    .unwrap();
    (app, bus, recorder)
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn topics() -> leolani::config::TopicsConfig {
    LeolaniConfig::default().topics
}

fn intentions(recorder: &Recorder) -> Vec<Vec<String>> {
    recorder
        .on(&topics().intention)
        .into_iter()
        .filter_map(|e| match e.payload {
            Payload::Intention(i) => Some(i.intentions),
            _ => None,
        })
        .collect()
}

fn agent_utterances(recorder: &Recorder) -> Vec<String> {
    recorder
        .on(&topics().text_out)
        .into_iter()
        .filter_map(|e| match e.payload {
            Payload::TextSignal(t) => Some(t.signal.text),
            _ => None,
        })
        .collect()
}

fn agent_scenario_ids(recorder: &Recorder) -> Vec<Option<String>> {
    recorder
        .on(&topics().text_out)
        .into_iter()
        .filter_map(|e| match e.payload {
            Payload::TextSignal(t) => Some(t.signal.scenario_id),
            _ => None,
        })
        .collect()
}

fn first_scenario_id(recorder: &Recorder) -> Option<String> {
    recorder
        .on(&topics().scenario)
        .into_iter()
        .find_map(|e| match e.payload {
            Payload::Scenario(s) if s.phase == ScenarioPhase::Started => Some(s.scenario.id),
            _ => None,
        })
}

fn capsules(recorder: &Recorder) -> Vec<Capsule> {
    recorder
        .on(&topics().knowledge)
        .into_iter()
        .filter_map(|e| match e.payload {
            Payload::Knowledge(k) => Some(k.capsules),
            _ => None,
        })
        .flatten()
        .collect()
}

fn started_scenarios(recorder: &Recorder) -> usize {
    recorder
        .on(&topics().scenario)
        .into_iter()
        .filter(|e| matches!(&e.payload, Payload::Scenario(s) if s.phase == ScenarioPhase::Started))
        .count()
}

fn say(bus: &Arc<dyn EventBus>, text: &str) {
    let signal = TextSignal::new(None, text);
    bus.publish(
        &topics().text_in,
        Event::for_payload(TextSignalEvent::for_user(signal)),
    );
}

fn mention(id: &str, annotations: Vec<Annotation>) -> Mention {
    Mention {
        id: id.into(),
        segment: vec![Segment {
            container_id: "signal-1".into(),
            bounds: Some([0, 0, 64, 64]),
        }],
        annotations,
    }
}

fn speaker(name: &str, face_id: &str) -> Event {
    Event::for_payload(AnnotationEvent {
        mentions: vec![mention(
            "speaker-1",
            vec![
                Annotation::Entity { text: name.into() },
                Annotation::VectorIdentity(face_id.into()),
            ],
        )],
    })
}

fn objects(labels: &[&str]) -> Event {
    Event::for_payload(AnnotationEvent {
        mentions: labels
            .iter()
            .enumerate()
            .map(|(i, label)| {
                mention(
                    &format!("object-{i}"),
                    vec![Annotation::Object(ObjectValue {
                        label: label.to_string(),
                        confidence: 0.9,
                    })],
                )
            })
            .collect(),
    })
}

#[tokio::test]
async fn intentions_follow_the_conversation() {
    let (app, bus, recorder) = start(Arc::new(MemoryFriendStore::new())).await;
    assert_eq!(intentions(&recorder), vec![vec!["init".to_string()]]);
    let initial = recorder.on(&topics().intention);
    assert_eq!(initial[0].metadata.source.as_deref(), Some("application"));
    wait_until("scenario start", || started_scenarios(&recorder) == 1).await;
    let scenario_id = first_scenario_id(&recorder);
    assert!(scenario_id.is_some());

    say(&bus, "Hello there");
    wait_until("invitation", || {
        agent_utterances(&recorder)
            .iter()
            .any(|u| u.contains("Would you like to talk with me?"))
    })
    .await;

    say(&bus, "yes");
    wait_until("chat intention", || intentions(&recorder).len() == 2).await;
    assert_eq!(intentions(&recorder)[1], vec!["chat".to_string()]);

    say(&bus, "Goodbye");
    wait_until("back to init", || intentions(&recorder).len() == 3).await;
    assert_eq!(intentions(&recorder)[2], vec!["init".to_string()]);
    assert!(
        agent_utterances(&recorder)
            .iter()
            .any(|u| GOODBYE.contains(&u.as_str()))
    );
    let stamped = agent_scenario_ids(&recorder);
    assert!(!stamped.is_empty());
    assert!(stamped.iter().all(|id| *id == scenario_id));

    app.stop().await;
}

#[tokio::test]
async fn scenario_starts_without_geolocation() {
    let (app, _bus, recorder) = start(Arc::new(MemoryFriendStore::new())).await;
    wait_until("scenario start", || started_scenarios(&recorder) == 1).await;
    wait_until("context capsule", || !capsules(&recorder).is_empty()).await;

    let scenario_events = recorder.on(&topics().scenario);
    let Payload::Scenario(started) = &scenario_events[0].payload else {
        panic!("expected scenario event");
    };
    assert!(started.scenario.context.location.is_unknown());
    assert!(started.scenario.is_active());

    let context = capsules(&recorder)
        .into_iter()
        .find_map(|c| c.as_context().cloned())
        .unwrap();
    assert_eq!(context.context_id, started.scenario.id);
    assert!(context.city.is_empty());
    assert_eq!(started_scenarios(&recorder), 1);

    app.stop().await;
}

#[tokio::test]
async fn introduced_speaker_becomes_a_friend() {
    let friends = Arc::new(MemoryFriendStore::new());
    let (app, bus, recorder) = start(Arc::clone(&friends)).await;
    wait_until("scenario start", || started_scenarios(&recorder) == 1).await;

    bus.publish(&topics().speaker, speaker("Thomas", "face_1"));
    wait_until("registration", || matches!(friends.get("face_1"), Ok(Some(_)))).await;
    bus.publish(&topics().speaker, speaker("Tom", "face_1"));
    wait_until("second name", || {
        friends
            .get("face_1")
            .ok()
            .flatten()
            .is_some_and(|f| f.names.len() == 2)
    })
    .await;

    let friend = friends.get("face_1").unwrap().unwrap();
    assert_eq!(friend.uri.as_deref(), Some(world_uri("thomas").as_str()));
    assert_eq!(friend.names, vec!["Thomas".to_string(), "Tom".to_string()]);

    wait_until("speaker update", || {
        recorder.on(&topics().scenario).iter().any(|e| {
            matches!(&e.payload, Payload::Scenario(s)
                if s.scenario.context.speaker.as_ref().is_some_and(|a| a.name == "Tom"))
        })
    })
    .await;

    app.stop().await;
}

#[tokio::test]
async fn speaker_known_under_another_identity_is_linked() {
    let friends = Arc::new(MemoryFriendStore::new());
    let provenance = Provenance::default();
    friends
        .add("face_1", &["Thomas".to_string()], &provenance)
        .unwrap();
    friends.add("Tom", &["Tom".to_string()], &provenance).unwrap();

    let (app, bus, recorder) = start(Arc::clone(&friends)).await;
    wait_until("scenario start", || started_scenarios(&recorder) == 1).await;

    bus.publish(&topics().speaker, speaker("Tom", "face_1"));
    wait_until("same-as capsule", || {
        capsules(&recorder).iter().any(|c| {
            c.as_statement()
                .is_some_and(|s| s.predicate.uri.as_deref() == Some(OWL_SAME_AS))
        })
    })
    .await;

    let same_as = capsules(&recorder)
        .into_iter()
        .filter_map(|c| c.as_statement().cloned())
        .filter(|s| s.predicate.uri.as_deref() == Some(OWL_SAME_AS))
        .collect::<Vec<_>>();
    assert_eq!(same_as.len(), 1);
    assert_eq!(same_as[0].subject.uri.as_deref(), Some(world_uri("thomas").as_str()));
    assert_eq!(same_as[0].object.uri.as_deref(), Some(world_uri("tom").as_str()));

    app.stop().await;
}

#[tokio::test]
async fn repeated_object_observations_are_counted_once() {
    let (app, bus, recorder) = start(Arc::new(MemoryFriendStore::new())).await;
    wait_until("scenario start", || started_scenarios(&recorder) == 1).await;

    bus.publish(&topics().object, objects(&["chair", "chair", "table"]));
    bus.publish(&topics().object, objects(&["chair"]));
    bus.publish(&topics().object, objects(&["chair", "chair", "cup"]));

    let objects_of = |e: &Event| match &e.payload {
        Payload::Scenario(s) if s.phase == ScenarioPhase::Updated => {
            Some(s.scenario.context.objects.clone())
        }
        _ => None,
    };
    wait_until("object updates", || {
        recorder.on(&topics().scenario).iter().filter_map(objects_of).count() == 2
    })
    .await;

    let updates: Vec<Vec<String>> = recorder
        .on(&topics().scenario)
        .iter()
        .filter_map(objects_of)
        .collect();
    let mut last = updates[1].clone();
    last.sort();
    assert_eq!(last, vec!["chair", "chair", "cup", "table"]);

    app.stop().await;
}

#[tokio::test]
async fn objects_in_a_seen_image_are_announced() {
    let (app, bus, recorder) = start(Arc::new(MemoryFriendStore::new())).await;
    wait_until("scenario start", || started_scenarios(&recorder) == 1).await;

    bus.publish(
        &topics().image,
        Event::for_payload(ImageSignalEvent {
            signal: ImageSignal {
                id: "signal-1".into(),
                files: vec!["file:///frames/signal-1.png".into()],
                image: None,
            },
        }),
    );
    bus.publish(&topics().object, objects(&["chair"]));
    wait_until("object utterance", || {
        agent_utterances(&recorder)
            .iter()
            .any(|u| u == "Oh, I see objects: chair [0, 0, 64, 64]")
    })
    .await;

    app.stop().await;
}

#[tokio::test]
async fn quit_ends_the_scenario_and_starts_a_new_one() {
    let (app, bus, recorder) = start(Arc::new(MemoryFriendStore::new())).await;
    wait_until("scenario start", || started_scenarios(&recorder) == 1).await;

    bus.publish(
        &topics().desire,
        Event::for_payload(DesireEvent::new(["initialized"])),
    );
    wait_until("chat", || intentions(&recorder).len() == 2).await;
    bus.publish(&topics().desire, Event::for_payload(DesireEvent::new(["quit"])));
    wait_until("second scenario", || started_scenarios(&recorder) == 2).await;

    let phases: Vec<ScenarioPhase> = recorder
        .on(&topics().scenario)
        .iter()
        .filter_map(|e| match &e.payload {
            Payload::Scenario(s) => Some(s.phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![ScenarioPhase::Started, ScenarioPhase::Stopped, ScenarioPhase::Started]
    );

    app.stop().await;
}

#[tokio::test]
async fn monitoring_view_tracks_the_dialogue() {
    let (app, bus, recorder) = start(Arc::new(MemoryFriendStore::new())).await;
    wait_until("scenario start", || started_scenarios(&recorder) == 1).await;

    say(&bus, "I passed my exam");
    wait_until("monitor text", || app.view().text().is_some()).await;
    wait_until("agent reply shown", || {
        app.view().text().is_some_and(|t| t.speaker == "Leolani")
    })
    .await;

    app.stop().await;
}
