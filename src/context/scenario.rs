//! Scenario: one bounded interaction session and its accumulated context.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::capsule::LEOLANI_URI;
use crate::event::timestamp_now;

/// A person or agent taking part in a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub uri: Option<String>,
}

impl Agent {
    pub fn new(name: impl Into<String>, uri: Option<&str>) -> Self {
        Self {
            name: name.into(),
            uri: uri.map(str::to_string),
        }
    }

    /// The robot itself.
    pub fn leolani() -> Self {
        Self::new("Leolani", Some(LEOLANI_URI))
    }

    /// Whether both denote the same individual: by URI when both have one,
    /// by name otherwise.
    pub fn same_identity(&self, other: &Agent) -> bool {
        match (&self.uri, &other.uri) {
            (Some(a), Some(b)) => a == b,
            _ => self.name == other.name,
        }
    }
}

/// Where the interaction takes place. Empty strings when unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub city: String,
}

impl Location {
    pub fn is_unknown(&self) -> bool {
        self.country.is_empty() && self.region.is_empty() && self.city.is_empty()
    }
}

/// What the agent knows about the ongoing interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioContext {
    pub agent: Agent,
    pub speaker: Option<Agent>,
    pub location_id: String,
    pub location: Location,
    pub persons: Vec<Agent>,
    /// Multiset of object labels seen during the scenario.
    pub objects: Vec<String>,
}

impl ScenarioContext {
    /// Append a person unless someone with the same identity is present.
    /// Returns whether the person was added.
    pub fn add_person(&mut self, person: Agent) -> bool {
        if self.persons.iter().any(|p| p.same_identity(&person)) {
            return false;
        }
        self.persons.push(person);
        true
    }

    /// Add the occurrences in `observed` that exceed the running tally.
    ///
    /// Objects are cumulative: a label seen three times in one frame and once
    /// in the next still counts three. Returns the labels that were appended.
    pub fn add_objects<'a>(&mut self, observed: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut observed_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for label in observed {
            *observed_counts.entry(label).or_default() += 1;
        }

        let mut tally: HashMap<&str, usize> = HashMap::new();
        for label in &self.objects {
            *tally.entry(label.as_str()).or_default() += 1;
        }

        let mut added = Vec::new();
        for (label, count) in observed_counts {
            let known = tally.get(label).copied().unwrap_or(0);
            for _ in known..count {
                added.push(label.to_string());
            }
        }

        self.objects.extend(added.iter().cloned());
        added
    }

    /// Occurrence count of an object label.
    pub fn object_count(&self, label: &str) -> usize {
        self.objects.iter().filter(|o| o.as_str() == label).count()
    }
}

/// One bounded human-agent interaction session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    /// Start time in milliseconds since the epoch.
    pub start: u64,
    /// End time; `None` while the scenario is active.
    pub end: Option<u64>,
    pub context: ScenarioContext,
    /// Modality → signal file.
    pub signals: BTreeMap<String, String>,
}

impl Scenario {
    /// New active scenario with a fresh id.
    pub fn new(agent: Agent, location: Location) -> Self {
        let signals = [
            ("image", "./image.json"),
            ("text", "./text.json"),
            ("audio", "./audio.json"),
        ]
        .into_iter()
        .map(|(m, f)| (m.to_string(), f.to_string()))
        .collect();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            start: timestamp_now(),
            end: None,
            context: ScenarioContext {
                agent,
                speaker: None,
                location_id: uuid::Uuid::new_v4().to_string(),
                location,
                persons: Vec::new(),
                objects: Vec::new(),
            },
            signals,
        }
    }

    pub fn is_active(&self) -> bool {
        self.end.is_none()
    }

    /// Start date as `YYYY-MM-DD` (UTC).
    pub fn start_date(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.start as i64)
            .unwrap_or_default()
            .format("%Y-%m-%d")
            .to_string()
    }

    /// Mark the scenario as ended now. Ending twice keeps the first timestamp.
    pub fn finish(&mut self) {
        if self.end.is_none() {
            self.end = Some(timestamp_now().max(self.start));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> Scenario {
        Scenario::new(Agent::leolani(), Location::default())
    }

    #[test]
    fn objects_are_added_as_delta() {
        let mut s = scenario();
        let added = s.context.add_objects(["chair", "chair", "cup"]);
        assert_eq!(added.len(), 3);

        // Same frame again: nothing new.
        assert!(s.context.add_objects(["chair", "cup", "chair"]).is_empty());

        // Fewer chairs, one more cup: only the extra cup counts.
        let added = s.context.add_objects(["chair", "cup", "cup"]);
        assert_eq!(added, vec!["cup".to_string()]);
        assert_eq!(s.context.object_count("chair"), 2);
        assert_eq!(s.context.object_count("cup"), 2);
    }

    #[test]
    fn objects_never_decrease() {
        let mut s = scenario();
        s.context.add_objects(["plant", "plant"]);
        s.context.add_objects(std::iter::empty());
        assert_eq!(s.context.object_count("plant"), 2);
    }

    #[test]
    fn persons_dedup_by_uri_then_name() {
        let mut s = scenario();
        assert!(s.context.add_person(Agent::new("Thomas", Some("uri:thomas"))));
        assert!(!s.context.add_person(Agent::new("Tom", Some("uri:thomas"))));
        assert!(s.context.add_person(Agent::new("face_2", None)));
        assert!(!s.context.add_person(Agent::new("face_2", None)));
        assert_eq!(s.context.persons.len(), 2);
    }

    #[test]
    fn finish_sets_end_once() {
        let mut s = scenario();
        assert!(s.is_active());
        s.finish();
        let end = s.end;
        assert!(end.is_some());
        s.finish();
        assert_eq!(s.end, end);
        assert!(!s.is_active());
    }

    #[test]
    fn start_date_is_iso_day() {
        let mut s = scenario();
        s.start = 1_700_000_000_000;
        assert_eq!(s.start_date(), "2023-11-14");
    }
}
