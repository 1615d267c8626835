//! Object location: tells the user which objects it sees in recent images.
//!
//! Images are remembered in a small bounded cache keyed by signal id. An
//! object detection is only reported when the image it was made on is still
//! cached, since locating the objects needs the frame.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::{EventBus, Processor};
use crate::error::LeolaniResult;
use crate::event::{
    AnnotationEvent, Bounds, Event, ImageSignalEvent, Payload, ScenarioPhase, TextSignal,
    TextSignalEvent,
};

/// Images remembered by default.
pub const DEFAULT_CACHE_SIZE: usize = 6;

/// Estimates where a detected object is, relative to the camera.
pub trait ObjectLocator: Send + Sync {
    /// `image` is the location of the frame file, `bounds` the object's box in it.
    fn locate(&self, image: &str, bounds: Bounds) -> [f64; 3];
}

/// Places every object at the origin.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyLocator;

impl ObjectLocator for DummyLocator {
    fn locate(&self, _image: &str, _bounds: Bounds) -> [f64; 3] {
        [0.0, 0.0, 0.0]
    }
}

/// Insertion-ordered image id to file map that evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct ImageCache {
    capacity: usize,
    entries: VecDeque<(String, String)>,
}

impl ImageCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Remember `file` for `id`. A known id keeps its position.
    pub fn insert(&mut self, id: impl Into<String>, file: impl Into<String>) {
        let id = id.into();
        let file = file.into();
        if let Some(entry) = self.entries.iter_mut().find(|(known, _)| *known == id) {
            entry.1 = file;
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((id, file));
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(known, _)| known == id)
            .map(|(_, file)| file.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An object detected in an image.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
    pub label: String,
    pub bounds: Bounds,
}

/// Objects of an annotation event, with the id of the image they were found in.
///
/// All mentions of one detection share an image, so the first mention with a
/// segment names it.
pub fn detected_objects(annotations: &AnnotationEvent) -> Option<(String, Vec<DetectedObject>)> {
    let mut image_id = None;
    let mut objects = Vec::new();
    for mention in &annotations.mentions {
        let Some(bounds) = mention.bounds() else {
            continue;
        };
        for label in mention.object_labels() {
            if image_id.is_none() {
                image_id = mention.signal_id().map(str::to_string);
            }
            objects.push(DetectedObject {
                label: label.to_string(),
                bounds,
            });
        }
    }
    if objects.is_empty() {
        return None;
    }
    image_id.map(|id| (id, objects))
}

/// Agent utterance listing `objects`.
pub fn describe(objects: &[DetectedObject]) -> String {
    let listed = objects
        .iter()
        .map(|o| {
            let [x0, y0, x1, y1] = o.bounds;
            format!("{} [{x0}, {y0}, {x1}, {y1}]", o.label)
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("Oh, I see objects: {listed}")
}

pub struct ObjectLocationService<L> {
    locator: L,
    cache: ImageCache,
    scenario_id: Option<String>,
    text_out_topic: String,
    bus: Arc<dyn EventBus>,
}

impl<L: ObjectLocator> ObjectLocationService<L> {
    pub const NAME: &'static str = "objectloc";

    pub fn new(
        locator: L,
        cache_size: usize,
        text_out_topic: impl Into<String>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            locator,
            cache: ImageCache::new(cache_size),
            scenario_id: None,
            text_out_topic: text_out_topic.into(),
            bus,
        }
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    fn update_image(&mut self, image: &ImageSignalEvent) {
        let Some(file) = image.signal.files.first() else {
            tracing::debug!(image = %image.signal.id, "image without files, not cached");
            return;
        };
        self.cache.insert(image.signal.id.clone(), file.clone());
        tracing::debug!(image = %image.signal.id, cached = self.cache.len(), "updated image");
    }

    fn update_objects(&mut self, annotations: &AnnotationEvent) {
        let Some((image_id, objects)) = detected_objects(annotations) else {
            return;
        };
        let Some(file) = self.cache.get(&image_id) else {
            tracing::debug!(image = %image_id, "objects in an image no longer cached");
            return;
        };
        for object in &objects {
            let position = self.locator.locate(file, object.bounds);
            tracing::debug!(label = %object.label, ?position, "located object");
        }

        let signal = TextSignal::new(self.scenario_id.clone(), describe(&objects));
        self.bus.publish(
            &self.text_out_topic,
            Event::for_payload(TextSignalEvent::for_agent(signal)).with_source(Self::NAME),
        );
    }
}

#[async_trait]
impl<L: ObjectLocator + 'static> Processor for ObjectLocationService<L> {
    async fn process(&mut self, event: &Event) -> LeolaniResult<()> {
        match &event.payload {
            Payload::Image(image) => self.update_image(image),
            Payload::Annotation(annotations) => self.update_objects(annotations),
            Payload::Scenario(scenario) => {
                self.scenario_id = match scenario.phase {
                    ScenarioPhase::Stopped => None,
                    ScenarioPhase::Started | ScenarioPhase::Updated => {
                        Some(scenario.scenario.id.clone())
                    }
                };
            }
            Payload::TextSignal(_) => {}
            _ => tracing::warn!(topic = %event.topic(), kind = event.kind(), "unhandled event"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Recorder, SynchronousEventBus};
    use crate::context::scenario::{Agent, Location, Scenario};
    use crate::event::{Annotation, ImageSignal, Mention, ObjectValue, ScenarioEvent, Segment};

    fn image(id: &str) -> Event {
        Event::for_payload(ImageSignalEvent {
            signal: ImageSignal {
                id: id.into(),
                files: vec![format!("file:///frames/{id}.png")],
                image: None,
            },
        })
    }

    fn objects(image_id: &str, labels: &[&str]) -> Event {
        Event::for_payload(AnnotationEvent {
            mentions: labels
                .iter()
                .enumerate()
                .map(|(i, label)| Mention {
                    id: format!("object-{i}"),
                    segment: vec![Segment {
                        container_id: image_id.into(),
                        bounds: Some([i as i32, 0, 10, 20]),
                    }],
                    annotations: vec![Annotation::Object(ObjectValue {
                        label: label.to_string(),
                        confidence: 0.8,
                    })],
                })
                .collect(),
        })
    }

    fn service(bus: &Arc<dyn EventBus>) -> ObjectLocationService<DummyLocator> {
        ObjectLocationService::new(DummyLocator, DEFAULT_CACHE_SIZE, "text_out", Arc::clone(bus))
    }

    #[test]
    fn cache_evicts_the_oldest_image_at_capacity() {
        let mut cache = ImageCache::new(3);
        for id in ["a", "b", "c"] {
            cache.insert(id, format!("{id}.png"));
        }
        cache.insert("a", "a2.png");
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("a"), Some("a2.png"));

        cache.insert("d", "d.png");
        assert_eq!(cache.len(), 3);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b"), Some("b.png"));
        assert_eq!(cache.get("d"), Some("d.png"));
    }

    #[test]
    fn detections_without_objects_or_bounds_are_skipped() {
        let no_bounds = AnnotationEvent {
            mentions: vec![Mention {
                id: "m".into(),
                segment: vec![Segment {
                    container_id: "img".into(),
                    bounds: None,
                }],
                annotations: vec![Annotation::Object(ObjectValue {
                    label: "cup".into(),
                    confidence: 0.5,
                })],
            }],
        };
        assert!(detected_objects(&no_bounds).is_none());
        assert!(detected_objects(&AnnotationEvent { mentions: vec![] }).is_none());
    }

    #[tokio::test]
    async fn objects_in_a_cached_image_are_reported() {
        let bus: Arc<dyn EventBus> = Arc::new(SynchronousEventBus::new());
        let recorder = Recorder::attach(bus.as_ref(), ["text_out"]);
        let mut objectloc = service(&bus);

        let scenario = Scenario::new(Agent::leolani(), Location::default());
        objectloc
            .process(&Event::for_payload(ScenarioEvent::started(scenario.clone())))
            .await
            .unwrap();
        objectloc.process(&image("img-1")).await.unwrap();
        objectloc.process(&objects("img-1", &["chair", "cup"])).await.unwrap();

        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metadata.source.as_deref(), Some("objectloc"));
        let Payload::TextSignal(text) = &events[0].payload else {
            panic!("expected text");
        };
        assert!(text.from_agent);
        assert_eq!(text.signal.text, "Oh, I see objects: chair [0, 0, 10, 20], cup [1, 0, 10, 20]");
        assert_eq!(text.signal.scenario_id.as_deref(), Some(scenario.id.as_str()));
    }

    #[tokio::test]
    async fn objects_in_an_evicted_image_are_ignored() {
        let bus: Arc<dyn EventBus> = Arc::new(SynchronousEventBus::new());
        let recorder = Recorder::attach(bus.as_ref(), ["text_out"]);
        let mut objectloc = service(&bus);

        for i in 0..=DEFAULT_CACHE_SIZE {
            objectloc.process(&image(&format!("img-{i}"))).await.unwrap();
        }
        assert_eq!(objectloc.cache().len(), DEFAULT_CACHE_SIZE);

        objectloc.process(&objects("img-0", &["chair"])).await.unwrap();
        objectloc.process(&objects("never-seen", &["chair"])).await.unwrap();
        assert!(recorder.is_empty());

        objectloc.process(&objects("img-1", &["chair"])).await.unwrap();
        assert_eq!(recorder.len(), 1);
    }

    #[tokio::test]
    async fn user_text_is_ignored() {
        let bus: Arc<dyn EventBus> = Arc::new(SynchronousEventBus::new());
        let recorder = Recorder::attach(bus.as_ref(), ["text_out"]);
        let mut objectloc = service(&bus);

        objectloc
            .process(&Event::for_payload(TextSignalEvent::for_user(TextSignal::new(None, "look"))))
            .await
            .unwrap();
        assert!(recorder.is_empty());
        assert!(objectloc.cache().is_empty());
    }
}
