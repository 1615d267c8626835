//! Friend store: registry from perceptual identifiers to known identities.
//!
//! Entries are kept as individual facts `(identifier, uri, name)`, the way the
//! external knowledge store records `faceID` statements. An identity is the
//! fold of all facts for one identifier; two facts with different URIs for the
//! same identifier are a data-integrity violation and are reported, never
//! merged.
//!
//! Writes are fire-and-eventually-visible from the point of view of other
//! components: callers that depend on another component's registration poll
//! (see [`crate::idresolution`]).

pub mod durable;
pub mod memory;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::FriendError;

pub use durable::DurableFriendStore;
pub use memory::MemoryFriendStore;

/// Result type for friend store operations.
pub type FriendResult<T> = std::result::Result<T, FriendError>;

/// A resolved identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friend {
    /// `None` while the identity is not yet resolved.
    pub uri: Option<String>,
    /// Display names in registration order, without duplicates.
    pub names: Vec<String>,
}

impl Friend {
    /// The first registered name.
    pub fn display_name(&self) -> Option<&str> {
        self.names.first().map(String::as_str)
    }
}

/// Where a registration came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub scenario_id: Option<String>,
    pub mention_id: Option<String>,
}

impl Provenance {
    pub fn new(scenario_id: Option<&str>, mention_id: Option<&str>) -> Self {
        Self {
            scenario_id: scenario_id.map(str::to_string),
            mention_id: mention_id.map(str::to_string),
        }
    }
}

/// One stored statement `identifier --faceID--> uri` labelled `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendFact {
    pub uri: Option<String>,
    pub name: String,
    pub provenance: Provenance,
}

/// Identity registry shared by all workers.
pub trait FriendStore: Send + Sync {
    /// Register `names` under `identifier` and return its URI.
    ///
    /// The first name of a first registration allocates the URI; later calls
    /// only append names not yet known. Empty `names` is a no-op returning
    /// `Ok(None)`.
    fn add(
        &self,
        identifier: &str,
        names: &[String],
        provenance: &Provenance,
    ) -> FriendResult<Option<String>>;

    /// Current identity for `identifier`, `None` if never registered.
    fn get(&self, identifier: &str) -> FriendResult<Option<Friend>>;

    /// Snapshot of all identities.
    ///
    /// Fails with [`FriendError::ConflictingUris`] if any identifier is
    /// associated with more than one URI.
    fn get_all(&self) -> FriendResult<BTreeMap<String, Friend>>;

    /// All registered identifiers.
    fn identifiers(&self) -> FriendResult<Vec<String>> {
        Ok(self.get_all()?.into_keys().collect())
    }
}

/// Fold the facts of one identifier into a [`Friend`].
///
/// Facts without a URI are pending registrations and do not conflict with
/// resolved ones.
pub fn fold_facts(identifier: &str, facts: &[FriendFact]) -> FriendResult<Option<Friend>> {
    if facts.is_empty() {
        return Ok(None);
    }

    let mut uris: Vec<String> = Vec::new();
    let mut names: Vec<String> = Vec::new();
    for fact in facts {
        if let Some(uri) = &fact.uri {
            if !uris.contains(uri) {
                uris.push(uri.clone());
            }
        }
        if !names.contains(&fact.name) {
            names.push(fact.name.clone());
        }
    }

    if uris.len() > 1 {
        tracing::error!(identifier, ?uris, "identifier claimed by multiple URIs");
        return Err(FriendError::ConflictingUris {
            identifier: identifier.to_string(),
            uris,
        });
    }

    Ok(Some(Friend {
        uri: uris.pop(),
        names,
    }))
}

/// Facts to append for an `add` call given the facts already stored.
///
/// Returns the URI the identifier resolves to and the new facts.
pub(crate) fn plan_add(
    identifier: &str,
    existing: &[FriendFact],
    names: &[String],
    provenance: &Provenance,
) -> FriendResult<(Option<String>, Vec<FriendFact>)> {
    let Some(first) = names.first() else {
        return Ok((None, Vec::new()));
    };
    let current = fold_facts(identifier, existing)?;
    let uri = match current.as_ref().and_then(|f| f.uri.clone()) {
        Some(uri) => uri,
        None => crate::capsule::world_uri(first),
    };

    let known: Vec<&str> = current
        .as_ref()
        .map(|f| f.names.iter().map(String::as_str).collect())
        .unwrap_or_default();

    let mut added = Vec::new();
    for name in names {
        if known.contains(&name.as_str()) || added.iter().any(|f: &FriendFact| &f.name == name) {
            continue;
        }
        added.push(FriendFact {
            uri: Some(uri.clone()),
            name: name.clone(),
            provenance: provenance.clone(),
        });
    }

    Ok((Some(uri), added))
}
