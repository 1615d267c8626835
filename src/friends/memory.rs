//! In-memory friend store shared across workers.

use std::collections::BTreeMap;

use dashmap::DashMap;

use super::{Friend, FriendFact, FriendResult, FriendStore, Provenance, fold_facts, plan_add};

/// Friend store backed by a concurrent hash map of facts.
///
/// Each identifier's facts live in one shard entry, so an `add` is atomic
/// with respect to other writers of the same identifier.
#[derive(Debug, Default)]
pub struct MemoryFriendStore {
    facts: DashMap<String, Vec<FriendFact>>,
}

impl MemoryFriendStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw fact, bypassing URI allocation. Used to import facts
    /// written by other stores.
    pub fn insert_fact(&self, identifier: &str, fact: FriendFact) {
        self.facts
            .entry(identifier.to_string())
            .or_default()
            .push(fact);
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

impl FriendStore for MemoryFriendStore {
    fn add(
        &self,
        identifier: &str,
        names: &[String],
        provenance: &Provenance,
    ) -> FriendResult<Option<String>> {
        if names.is_empty() {
            return Ok(None);
        }
        let mut entry = self.facts.entry(identifier.to_string()).or_default();
        let (uri, added) = plan_add(identifier, entry.value(), names, provenance)?;
        if !added.is_empty() {
            tracing::debug!(identifier, uri = ?uri, added = added.len(), "registered friend names");
        }
        entry.value_mut().extend(added);
        Ok(uri)
    }

    fn get(&self, identifier: &str) -> FriendResult<Option<Friend>> {
        match self.facts.get(identifier) {
            Some(facts) => fold_facts(identifier, facts.value()),
            None => Ok(None),
        }
    }

    fn get_all(&self) -> FriendResult<BTreeMap<String, Friend>> {
        let snapshot: Vec<(String, Vec<FriendFact>)> = self
            .facts
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut all = BTreeMap::new();
        for (identifier, facts) in snapshot {
            if let Some(friend) = fold_facts(&identifier, &facts)? {
                all.insert(identifier, friend);
            }
        }
        Ok(all)
    }
}
