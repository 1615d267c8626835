//! Friend store persisted with redb.
//!
//! One table maps identifier → bincode-encoded list of [`FriendFact`]s. Each
//! `add` runs in its own write transaction, so registrations survive crashes
//! and concurrent writers of one identifier are serialized.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use super::{Friend, FriendFact, FriendResult, FriendStore, Provenance, fold_facts, plan_add};
use crate::error::FriendError;

/// identifier → bincode(Vec<FriendFact>)
const FRIENDS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("friends");

/// File name of the database inside the data directory.
pub const DB_FILE: &str = "friends.redb";

fn redb_err<E: Display>(context: &'static str) -> impl Fn(E) -> FriendError {
    move |e| FriendError::Redb {
        message: format!("{context}: {e}"),
    }
}

fn decode(bytes: &[u8]) -> FriendResult<Vec<FriendFact>> {
    bincode::deserialize(bytes).map_err(|e| FriendError::Serialization {
        message: e.to_string(),
    })
}

fn encode(facts: &[FriendFact]) -> FriendResult<Vec<u8>> {
    bincode::serialize(facts).map_err(|e| FriendError::Serialization {
        message: e.to_string(),
    })
}

/// ACID-durable friend store.
pub struct DurableFriendStore {
    db: Arc<Database>,
}

impl DurableFriendStore {
    /// Open or create the store in `data_dir`.
    pub fn open(data_dir: &Path) -> FriendResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| FriendError::Io { source: e })?;
        let db_path = data_dir.join(DB_FILE);
        let db = Database::create(&db_path).map_err(|e| FriendError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;

        // Create the table up front so read transactions never miss it.
        let txn = db.begin_write().map_err(redb_err("begin_write failed"))?;
        txn.open_table(FRIENDS_TABLE)
            .map_err(redb_err("open_table failed"))?;
        txn.commit().map_err(redb_err("commit failed"))?;

        tracing::info!(path = %db_path.display(), "opened durable friend store");
        Ok(Self { db: Arc::new(db) })
    }

    /// Append a raw fact without URI allocation.
    pub fn insert_fact(&self, identifier: &str, fact: FriendFact) -> FriendResult<()> {
        let txn = self.db.begin_write().map_err(redb_err("begin_write failed"))?;
        {
            let mut table = txn
                .open_table(FRIENDS_TABLE)
                .map_err(redb_err("open_table failed"))?;
            let mut facts = match table.get(identifier).map_err(redb_err("get failed"))? {
                Some(guard) => decode(guard.value())?,
                None => Vec::new(),
            };
            facts.push(fact);
            let bytes = encode(&facts)?;
            table
                .insert(identifier, bytes.as_slice())
                .map_err(redb_err("insert failed"))?;
        }
        txn.commit().map_err(redb_err("commit failed"))?;
        Ok(())
    }

    fn read_facts(&self, identifier: &str) -> FriendResult<Vec<FriendFact>> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read failed"))?;
        let table = txn
            .open_table(FRIENDS_TABLE)
            .map_err(redb_err("open_table failed"))?;
        match table.get(identifier).map_err(redb_err("get failed"))? {
            Some(guard) => decode(guard.value()),
            None => Ok(Vec::new()),
        }
    }
}

impl FriendStore for DurableFriendStore {
    fn add(
        &self,
        identifier: &str,
        names: &[String],
        provenance: &Provenance,
    ) -> FriendResult<Option<String>> {
        if names.is_empty() {
            return Ok(None);
        }

        let txn = self.db.begin_write().map_err(redb_err("begin_write failed"))?;
        let uri = {
            let mut table = txn
                .open_table(FRIENDS_TABLE)
                .map_err(redb_err("open_table failed"))?;
            let mut facts = match table.get(identifier).map_err(redb_err("get failed"))? {
                Some(guard) => decode(guard.value())?,
                None => Vec::new(),
            };
            let (uri, added) = plan_add(identifier, &facts, names, provenance)?;
            if !added.is_empty() {
                facts.extend(added);
                let bytes = encode(&facts)?;
                table
                    .insert(identifier, bytes.as_slice())
                    .map_err(redb_err("insert failed"))?;
            }
            uri
        };
        txn.commit().map_err(redb_err("commit failed"))?;
        Ok(uri)
    }

    fn get(&self, identifier: &str) -> FriendResult<Option<Friend>> {
        let facts = self.read_facts(identifier)?;
        fold_facts(identifier, &facts)
    }

    fn get_all(&self) -> FriendResult<BTreeMap<String, Friend>> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read failed"))?;
        let table = txn
            .open_table(FRIENDS_TABLE)
            .map_err(redb_err("open_table failed"))?;

        let mut all = BTreeMap::new();
        for entry in table.iter().map_err(redb_err("iter failed"))? {
            let (key, value) = entry.map_err(redb_err("iter failed"))?;
            let identifier = key.value().to_string();
            let facts = decode(value.value())?;
            if let Some(friend) = fold_facts(&identifier, &facts)? {
                all.insert(identifier, friend);
            }
        }
        Ok(all)
    }
}

impl std::fmt::Debug for DurableFriendStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableFriendStore").finish()
    }
}
