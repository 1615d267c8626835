//! Event envelope and typed payloads exchanged over the bus.
//!
//! Every topic carries one [`Payload`] variant. Components match on the variant
//! instead of comparing topic names, so a new kind of event has to be handled
//! explicitly wherever it can arrive.

use serde::{Deserialize, Serialize};

use crate::capsule::Capsule;
use crate::context::scenario::Scenario;

/// Milliseconds since the UNIX epoch.
pub fn timestamp_now() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

// ── Envelope ────────────────────────────────────────────────────────────

/// Delivery metadata attached to every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Topic the event was published on (set by the bus).
    pub topic: String,
    /// Creation time in milliseconds since the epoch.
    pub timestamp: u64,
    /// Name of the publishing component, if it identified itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// An event as delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub metadata: Metadata,
    pub payload: Payload,
}

impl Event {
    /// Wrap a payload; the topic is filled in on publish.
    pub fn for_payload(payload: impl Into<Payload>) -> Self {
        Self {
            metadata: Metadata {
                topic: String::new(),
                timestamp: timestamp_now(),
                source: None,
            },
            payload: payload.into(),
        }
    }

    /// Mark the publishing component.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    /// Override the creation timestamp.
    pub fn at(mut self, timestamp: u64) -> Self {
        self.metadata.timestamp = timestamp;
        self
    }

    pub fn topic(&self) -> &str {
        &self.metadata.topic
    }

    /// Short name of the payload variant, for log lines.
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            Payload::Intention(_) => "intention",
            Payload::Desire(_) => "desire",
            Payload::TextSignal(_) => "text",
            Payload::Annotation(_) => "annotation",
            Payload::Image(_) => "image",
            Payload::Scenario(_) => "scenario",
            Payload::Knowledge(_) => "knowledge",
        }
    }
}

// ── Payloads ────────────────────────────────────────────────────────────

/// All payload kinds that travel over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Payload {
    Intention(IntentionEvent),
    Desire(DesireEvent),
    TextSignal(TextSignalEvent),
    Annotation(AnnotationEvent),
    Image(ImageSignalEvent),
    Scenario(ScenarioEvent),
    Knowledge(KnowledgeEvent),
}

/// The agent's current intentions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentionEvent {
    pub intentions: Vec<String>,
}

impl IntentionEvent {
    pub fn new<S: Into<String>>(intentions: impl IntoIterator<Item = S>) -> Self {
        Self {
            intentions: intentions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, intention: &str) -> bool {
        self.intentions.iter().any(|i| i == intention)
    }
}

/// Desires some component has achieved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesireEvent {
    pub achieved: Vec<String>,
}

impl DesireEvent {
    pub fn new<S: Into<String>>(achieved: impl IntoIterator<Item = S>) -> Self {
        Self {
            achieved: achieved.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, desire: &str) -> bool {
        self.achieved.iter().any(|d| d == desire)
    }
}

/// A single utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSignal {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,
    pub timestamp: u64,
    pub text: String,
}

impl TextSignal {
    /// New signal with a fresh id.
    pub fn new(scenario_id: Option<String>, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            scenario_id,
            timestamp: timestamp_now(),
            text: text.into(),
        }
    }
}

/// An utterance together with who produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSignalEvent {
    pub signal: TextSignal,
    /// True when the agent itself is the speaker.
    pub from_agent: bool,
}

impl TextSignalEvent {
    pub fn for_agent(signal: TextSignal) -> Self {
        Self {
            signal,
            from_agent: true,
        }
    }

    pub fn for_user(signal: TextSignal) -> Self {
        Self {
            signal,
            from_agent: false,
        }
    }
}

/// Bounding box `[x0, y0, x1, y1]` in image coordinates.
pub type Bounds = [i32; 4];

/// Part of a signal a mention refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Id of the signal containing the segment.
    pub container_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
}

/// Detected object class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectValue {
    /// Object class label, e.g. "chair".
    #[serde(rename = "type")]
    pub label: String,
    #[serde(default)]
    pub confidence: f32,
}

/// Typed annotation on a mention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Annotation {
    /// A named entity, e.g. the name a speaker introduced themselves with.
    Entity { text: String },
    /// Opaque perceptual identifier (face-embedding cluster key).
    VectorIdentity(String),
    /// A recognised object.
    Object(ObjectValue),
}

/// A mention of something in a signal, with its annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub id: String,
    #[serde(default)]
    pub segment: Vec<Segment>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl Mention {
    /// First `Entity` annotation text.
    pub fn entity_name(&self) -> Option<&str> {
        self.annotations.iter().find_map(|a| match a {
            Annotation::Entity { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// First `VectorIdentity` annotation value.
    pub fn vector_identity(&self) -> Option<&str> {
        self.annotations.iter().find_map(|a| match a {
            Annotation::VectorIdentity(id) => Some(id.as_str()),
            _ => None,
        })
    }

    /// Values of all `VectorIdentity` annotations.
    pub fn vector_identities(&self) -> impl Iterator<Item = &str> {
        self.annotations.iter().filter_map(|a| match a {
            Annotation::VectorIdentity(id) => Some(id.as_str()),
            _ => None,
        })
    }

    /// Labels of all `Object` annotations.
    pub fn object_labels(&self) -> impl Iterator<Item = &str> {
        self.annotations.iter().filter_map(|a| match a {
            Annotation::Object(obj) => Some(obj.label.as_str()),
            _ => None,
        })
    }

    /// Id of the signal this mention belongs to.
    pub fn signal_id(&self) -> Option<&str> {
        self.segment.first().map(|s| s.container_id.as_str())
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.segment.first().and_then(|s| s.bounds)
    }
}

/// Annotations produced by a perception or NLP component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationEvent {
    pub mentions: Vec<Mention>,
}

/// A captured camera frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSignal {
    pub id: String,
    /// Locations of the image files backing the signal.
    #[serde(default)]
    pub files: Vec<String>,
    /// Base64-encoded PNG, when the producer inlined the frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSignalEvent {
    pub signal: ImageSignal,
}

/// Scenario lifecycle phase carried by a [`ScenarioEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScenarioPhase {
    Started,
    Updated,
    Stopped,
}

/// Snapshot of the scenario at a lifecycle step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioEvent {
    pub phase: ScenarioPhase,
    pub scenario: Scenario,
}

impl ScenarioEvent {
    pub fn started(scenario: Scenario) -> Self {
        Self {
            phase: ScenarioPhase::Started,
            scenario,
        }
    }

    pub fn updated(scenario: Scenario) -> Self {
        Self {
            phase: ScenarioPhase::Updated,
            scenario,
        }
    }

    pub fn stopped(scenario: Scenario) -> Self {
        Self {
            phase: ScenarioPhase::Stopped,
            scenario,
        }
    }
}

/// Capsules destined for the knowledge store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEvent {
    pub capsules: Vec<Capsule>,
}

// ── Conversions ─────────────────────────────────────────────────────────

impl From<IntentionEvent> for Payload {
    fn from(e: IntentionEvent) -> Self {
        Self::Intention(e)
    }
}

impl From<DesireEvent> for Payload {
    fn from(e: DesireEvent) -> Self {
        Self::Desire(e)
    }
}

impl From<TextSignalEvent> for Payload {
    fn from(e: TextSignalEvent) -> Self {
        Self::TextSignal(e)
    }
}

impl From<AnnotationEvent> for Payload {
    fn from(e: AnnotationEvent) -> Self {
        Self::Annotation(e)
    }
}

impl From<ImageSignalEvent> for Payload {
    fn from(e: ImageSignalEvent) -> Self {
        Self::Image(e)
    }
}

impl From<ScenarioEvent> for Payload {
    fn from(e: ScenarioEvent) -> Self {
        Self::Scenario(e)
    }
}

impl From<Vec<Capsule>> for Payload {
    fn from(capsules: Vec<Capsule>) -> Self {
        Self::Knowledge(KnowledgeEvent { capsules })
    }
}
