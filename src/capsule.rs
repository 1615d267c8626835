//! Knowledge capsules: the update records accepted by the external knowledge store.
//!
//! Field names and nesting follow the store's wire format exactly; anything
//! emitting capsules goes through the constructors here.

use serde::{Deserialize, Serialize};

use crate::context::scenario::{Agent, Scenario};
use crate::event::timestamp_now;

/// Namespace for resources in the agent's world model.
pub const WORLD_NS: &str = "http://cltl.nl/leolani/world/";
/// The agent's own URI.
pub const LEOLANI_URI: &str = "http://cltl.nl/leolani/world/leolani";
/// `owl:sameAs`.
pub const OWL_SAME_AS: &str = "http://www.w3.org/2002/07/owl#sameAs";
/// Predicate linking a person to a perceptual identifier.
pub const FACE_ID_URI: &str = "http://cltl.nl/leolani/n2mu/faceID";

/// Build the world-namespace URI for a label (lower-cased, whitespace as `-`).
pub fn world_uri(label: &str) -> String {
    let local: String = label
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");
    format!("{WORLD_NS}{local}")
}

/// Utterance classification tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UtteranceType {
    Statement,
    Question,
    TextMention,
}

/// Subject, predicate, object, or author of a capsule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapsuleEntity {
    pub label: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
    pub uri: Option<String>,
}

impl CapsuleEntity {
    pub fn new(label: Option<&str>, types: &[&str], uri: Option<&str>) -> Self {
        Self {
            label: label.map(str::to_string),
            types: Some(types.iter().map(|t| t.to_string()).collect()),
            uri: uri.map(str::to_string),
        }
    }

    /// Entity without a `type` field (used for bare predicates).
    pub fn untyped(label: Option<&str>, uri: Option<&str>) -> Self {
        Self {
            label: label.map(str::to_string),
            types: None,
            uri: uri.map(str::to_string),
        }
    }

    pub fn person(agent: &Agent) -> Self {
        Self::new(Some(&agent.name), &["person"], agent.uri.as_deref())
    }
}

/// Mentioned item in a text-mention capsule: an entity plus an optional id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapsuleItem {
    #[serde(flatten)]
    pub entity: CapsuleEntity,
    pub id: Option<String>,
}

/// A perspective value. Integral and fractional scores keep their JSON form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Score {
    Int(i64),
    Float(f64),
}

impl From<i64> for Score {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Score {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Perspective scores attached to a statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Perspective {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Score>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certainty: Option<Score>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polarity: Option<Score>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<Score>,
}

/// Subject-predicate-object statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementCapsule {
    pub chat: Option<String>,
    pub turn: Option<String>,
    pub author: CapsuleEntity,
    pub utterance: String,
    pub utterance_type: UtteranceType,
    pub position: String,
    pub subject: CapsuleEntity,
    pub predicate: CapsuleEntity,
    pub object: CapsuleEntity,
    pub perspective: Perspective,
    pub context_id: Option<String>,
    pub timestamp: u64,
}

/// Mention of an entity in the conversation (no predicate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionCapsule {
    pub chat: Option<String>,
    pub turn: Option<String>,
    pub author: CapsuleEntity,
    pub utterance: String,
    pub utterance_type: UtteranceType,
    pub position: String,
    pub item: CapsuleItem,
    pub perspective: Perspective,
    pub confidence: f64,
    pub timestamp: u64,
    pub context_id: Option<String>,
}

/// Scenario context: when and where the interaction takes place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextCapsule {
    #[serde(rename = "type")]
    pub kind: String,
    pub context_id: String,
    pub date: String,
    pub place: Option<String>,
    pub place_id: Option<String>,
    pub country: String,
    pub region: String,
    pub city: String,
}

/// Any record accepted by the knowledge store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Capsule {
    Statement(StatementCapsule),
    Mention(MentionCapsule),
    Context(ContextCapsule),
}

impl Capsule {
    /// `id_uri owl:sameAs name_uri`, authored by the agent.
    pub fn same_as(
        scenario_id: Option<&str>,
        turn: Option<&str>,
        name: &str,
        id_uri: &str,
        name_uri: &str,
    ) -> Self {
        Self::Statement(StatementCapsule {
            chat: scenario_id.map(str::to_string),
            turn: turn.map(str::to_string),
            author: CapsuleEntity::new(Some("Leolani"), &["robot"], Some(LEOLANI_URI)),
            utterance: String::new(),
            utterance_type: UtteranceType::Statement,
            position: String::new(),
            subject: CapsuleEntity::new(Some(name), &["person"], Some(id_uri)),
            predicate: CapsuleEntity::untyped(None, Some(OWL_SAME_AS)),
            object: CapsuleEntity::new(Some(name), &["person"], Some(name_uri)),
            perspective: Perspective {
                certainty: Some(Score::Int(1)),
                polarity: Some(Score::Int(0)),
                sentiment: Some(Score::Int(0)),
                emotion: None,
            },
            context_id: scenario_id.map(str::to_string),
            timestamp: timestamp_now(),
        })
    }

    /// `person faceID identifier`: links a named person to a perceptual id.
    pub fn face_id(
        scenario_id: Option<&str>,
        mention_id: Option<&str>,
        uri: Option<&str>,
        identifier: &str,
        name: &str,
    ) -> Self {
        Self::Statement(StatementCapsule {
            chat: scenario_id.map(str::to_string),
            turn: mention_id.map(str::to_string),
            author: CapsuleEntity::new(Some("Leolani"), &["agent"], None),
            utterance: String::new(),
            utterance_type: UtteranceType::Statement,
            position: String::new(),
            subject: CapsuleEntity::new(Some(name), &["person"], uri),
            predicate: CapsuleEntity::new(Some("faceID"), &["DatatypeProperty"], Some(FACE_ID_URI)),
            object: CapsuleEntity::new(Some(identifier), &["Literal"], None),
            perspective: Perspective {
                sentiment: Some(Score::Float(0.0)),
                certainty: Some(Score::Float(1.0)),
                polarity: Some(Score::Float(1.0)),
                emotion: Some(Score::Float(0.0)),
            },
            context_id: scenario_id.map(str::to_string),
            timestamp: timestamp_now(),
        })
    }

    /// Marks that the conversation is now about `speaker`.
    pub fn text_mention(scenario_id: Option<&str>, turn: Option<&str>, speaker: Option<&Agent>) -> Self {
        let author = CapsuleEntity {
            label: speaker.map(|s| s.name.clone()),
            types: Some(vec!["person".to_string()]),
            uri: speaker.and_then(|s| s.uri.clone()),
        };
        Self::Mention(MentionCapsule {
            chat: scenario_id.map(str::to_string),
            turn: turn.map(str::to_string),
            author: author.clone(),
            utterance: String::new(),
            utterance_type: UtteranceType::TextMention,
            position: String::new(),
            item: CapsuleItem {
                entity: author,
                id: None,
            },
            perspective: Perspective::default(),
            confidence: 1.0,
            timestamp: timestamp_now(),
            context_id: scenario_id.map(str::to_string),
        })
    }

    /// Initial context record for a freshly started scenario.
    pub fn context(scenario: &Scenario) -> Self {
        let location = &scenario.context.location;
        Self::Context(ContextCapsule {
            kind: "context".to_string(),
            context_id: scenario.id.clone(),
            date: scenario.start_date(),
            place: None,
            place_id: None,
            country: location.country.clone(),
            region: location.region.clone(),
            city: location.city.clone(),
        })
    }

    pub fn as_statement(&self) -> Option<&StatementCapsule> {
        match self {
            Self::Statement(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_context(&self) -> Option<&ContextCapsule> {
        match self {
            Self::Context(c) => Some(c),
            _ => None,
        }
    }
}
