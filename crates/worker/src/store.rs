//! Durable per-worker list store.
//!
//! An ordered map of `key → ListRecord` backed by the append-only
//! journal. Deletes tombstone the record (`active = false`); the row is
//! retained so a re-delivered delete stays idempotent. All operations are
//! serialized by a single-writer lock, and the in-memory map mutates only
//! after the journal append succeeds.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use corelib::{Journal, ListKey, Result, WorkerAddress};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Whether a record is the key's primary copy or a replica copy.
///
/// Local bookkeeping only; the router's placement decision is what
/// actually routes reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Primary,
    Replica,
}

/// One stored list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRecord {
    pub key: ListKey,
    pub name: String,
    pub creator: String,
    /// False once the key is tombstoned.
    pub active: bool,
    pub role: Role,
    /// Worker this replica was seeded from, when it arrived by push.
    pub source: Option<WorkerAddress>,
    /// Milliseconds since the epoch; strictly increasing per key.
    pub last_modified: u64,
}

/// Existence probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListStatus {
    pub exists: bool,
    pub active: bool,
}

/// One journaled statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum StoreOp {
    Put(ListRecord),
    Delete { key: ListKey, at: u64 },
}

struct Inner {
    journal: Journal<StoreOp>,
    lists: BTreeMap<ListKey, ListRecord>,
}

/// The worker's durable state.
pub struct ListStore {
    inner: Mutex<Inner>,
}

impl ListStore {
    /// Open or create the store, replaying the journal.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (journal, ops) = Journal::open(path)?;
        let mut lists = BTreeMap::new();
        for op in ops {
            apply(&mut lists, op);
        }
        Ok(Self {
            inner: Mutex::new(Inner { journal, lists }),
        })
    }

    /// Upsert a record. Re-delivery of the same create is a no-op apart
    /// from bumping `last_modified`.
    pub fn put(
        &self,
        key: &ListKey,
        name: &str,
        creator: &str,
        role: Role,
        source: Option<WorkerAddress>,
    ) -> Result<ListRecord> {
        let mut inner = self.inner.lock();
        let at = next_timestamp(inner.lists.get(key));
        let record = ListRecord {
            key: key.clone(),
            name: name.to_owned(),
            creator: creator.to_owned(),
            active: true,
            role,
            source,
            last_modified: at,
        };
        inner.journal.append(&StoreOp::Put(record.clone()))?;
        apply(&mut inner.lists, StoreOp::Put(record.clone()));
        Ok(record)
    }

    /// Tombstone a record, retaining the row. Returns the status the key
    /// had before the delete so callers can report `had_list`.
    pub fn delete(&self, key: &ListKey) -> Result<ListStatus> {
        let mut inner = self.inner.lock();
        let before = status_of(inner.lists.get(key));
        if before.active {
            let at = next_timestamp(inner.lists.get(key));
            inner.journal.append(&StoreOp::Delete {
                key: key.clone(),
                at,
            })?;
            apply(
                &mut inner.lists,
                StoreOp::Delete {
                    key: key.clone(),
                    at,
                },
            );
        }
        Ok(before)
    }

    /// Existence probe: does the row exist, and is it still active?
    pub fn status(&self, key: &ListKey) -> ListStatus {
        status_of(self.inner.lock().lists.get(key))
    }

    /// The full record, or None when absent or tombstoned.
    pub fn fetch(&self, key: &ListKey) -> Option<ListRecord> {
        self.inner
            .lock()
            .lists
            .get(key)
            .filter(|record| record.active)
            .cloned()
    }

    /// All active keys, in order.
    pub fn keys(&self) -> Vec<ListKey> {
        self.inner
            .lock()
            .lists
            .values()
            .filter(|record| record.active)
            .map(|record| record.key.clone())
            .collect()
    }
}

fn apply(lists: &mut BTreeMap<ListKey, ListRecord>, op: StoreOp) {
    match op {
        StoreOp::Put(record) => {
            lists.insert(record.key.clone(), record);
        }
        StoreOp::Delete { key, at } => {
            if let Some(record) = lists.get_mut(&key) {
                record.active = false;
                record.last_modified = at;
            }
        }
    }
}

fn status_of(record: Option<&ListRecord>) -> ListStatus {
    match record {
        Some(record) => ListStatus {
            exists: true,
            active: record.active,
        },
        None => ListStatus {
            exists: false,
            active: false,
        },
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Wall-clock time, nudged forward so timestamps stay strictly
/// increasing per key even when the clock stalls or steps back.
fn next_timestamp(previous: Option<&ListRecord>) -> u64 {
    let now = now_millis();
    match previous {
        Some(record) => now.max(record.last_modified + 1),
        None => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &tempfile::TempDir) -> ListStore {
        ListStore::open(dir.path().join("worker.db")).unwrap()
    }

    fn key(name: &str) -> ListKey {
        ListKey::new(name)
    }

    #[test]
    fn put_then_fetch_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store
            .put(&key("k1"), "groceries", "carol", Role::Primary, None)
            .unwrap();
        let record = store.fetch(&key("k1")).unwrap();
        assert_eq!(record.name, "groceries");
        assert_eq!(record.role, Role::Primary);
        assert!(record.active);
    }

    #[test]
    fn repeated_put_is_idempotent_apart_from_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let first = store
            .put(&key("k1"), "groceries", "carol", Role::Primary, None)
            .unwrap();
        let second = store
            .put(&key("k1"), "groceries", "carol", Role::Primary, None)
            .unwrap();

        assert!(second.last_modified > first.last_modified);
        let mut normalized = second.clone();
        normalized.last_modified = first.last_modified;
        assert_eq!(normalized, first);
    }

    #[test]
    fn delete_tombstones_but_retains_the_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store
            .put(&key("k1"), "groceries", "carol", Role::Primary, None)
            .unwrap();

        let before = store.delete(&key("k1")).unwrap();
        assert!(before.exists && before.active);

        let status = store.status(&key("k1"));
        assert!(status.exists && !status.active);
        assert!(store.fetch(&key("k1")).is_none());
    }

    #[test]
    fn double_delete_reports_the_tombstoned_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store
            .put(&key("k1"), "groceries", "carol", Role::Primary, None)
            .unwrap();

        store.delete(&key("k1")).unwrap();
        let before = store.delete(&key("k1")).unwrap();
        // The row still exists; only `active` changed, and only once.
        assert!(before.exists && !before.active);
    }

    #[test]
    fn delete_of_absent_key_reports_absence() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let before = store.delete(&key("missing")).unwrap();
        assert!(!before.exists && !before.active);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.db");
        {
            let store = ListStore::open(&path).unwrap();
            store
                .put(&key("kept"), "groceries", "carol", Role::Primary, None)
                .unwrap();
            store
                .put(
                    &key("copied"),
                    "hardware",
                    "dave",
                    Role::Replica,
                    Some(WorkerAddress::new("127.0.0.1:6000")),
                )
                .unwrap();
            store.put(&key("gone"), "party", "erin", Role::Primary, None).unwrap();
            store.delete(&key("gone")).unwrap();
        }

        let store = ListStore::open(&path).unwrap();
        assert_eq!(store.keys(), vec![key("copied"), key("kept")]);
        let copied = store.fetch(&key("copied")).unwrap();
        assert_eq!(copied.role, Role::Replica);
        assert_eq!(copied.source, Some(WorkerAddress::new("127.0.0.1:6000")));
        let gone = store.status(&key("gone"));
        assert!(gone.exists && !gone.active);
    }
}
