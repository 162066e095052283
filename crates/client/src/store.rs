//! Durable pending-write log.
//!
//! One row per key, journal-backed: every mutation appends the full row,
//! and replay keeps the last version of each. Rows carry the sync state
//! machine: `unsynced → synced` on an ack, or `unsynced → poisoned`
//! (marked permanently synced) once the retry budget is spent.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use corelib::{Journal, ListKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ClientError;

/// Retry budget before a row is poisoned.
pub const MAX_RETRIES: u32 = 3;

/// One pending (or settled) mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingList {
    pub key: ListKey,
    pub name: String,
    pub creator: String,
    /// True once the server acked, or once the row was poisoned.
    pub synced: bool,
    /// True when the pending mutation is a delete.
    pub deleted: bool,
    pub retry_count: u32,
    /// Milliseconds since the epoch of the last sync attempt.
    pub last_attempt_at: Option<u64>,
    /// Milliseconds since the epoch; orders the sync pass.
    pub last_modified: u64,
}

/// What a local delete amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The list was synced before; the delete is queued for the server.
    Queued,
    /// The list never reached the server; nothing to sync.
    LocalOnly,
    /// The list was already deleted.
    AlreadyDeleted,
}

struct Inner {
    journal: Journal<PendingList>,
    rows: BTreeMap<ListKey, PendingList>,
}

/// The client's durable log of pending mutations.
pub struct LocalStore {
    inner: Mutex<Inner>,
}

impl LocalStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let (journal, replayed) = Journal::<PendingList>::open(path)?;
        let mut rows = BTreeMap::new();
        for row in replayed {
            rows.insert(row.key.clone(), row);
        }
        Ok(Self {
            inner: Mutex::new(Inner { journal, rows }),
        })
    }

    /// Record a new list; it starts unsynced with a fresh key.
    pub fn create(&self, name: &str, creator: &str) -> Result<PendingList, ClientError> {
        let row = PendingList {
            key: ListKey::generate(),
            name: name.to_owned(),
            creator: creator.to_owned(),
            synced: false,
            deleted: false,
            retry_count: 0,
            last_attempt_at: None,
            last_modified: now_millis(),
        };
        self.write(row.clone())?;
        Ok(row)
    }

    /// Mark a list deleted.
    ///
    /// A synced list becomes a pending delete; a list the server never
    /// saw is settled locally and stays inert.
    pub fn delete(&self, key: &ListKey) -> Result<DeleteOutcome, ClientError> {
        let mut inner = self.inner.lock();
        let Some(row) = inner.rows.get(key).cloned() else {
            return Err(ClientError::UnknownList(key.clone()));
        };
        if row.deleted {
            return Ok(DeleteOutcome::AlreadyDeleted);
        }

        let mut updated = row;
        updated.deleted = true;
        updated.last_modified = now_millis();
        let outcome = if updated.synced {
            updated.synced = false;
            updated.retry_count = 0;
            DeleteOutcome::Queued
        } else {
            // Never synced: settle it locally so the sync pass skips it.
            updated.synced = true;
            DeleteOutcome::LocalOnly
        };
        write_locked(&mut inner, updated)?;
        Ok(outcome)
    }

    /// An ack arrived: settle the row and clear its retries.
    pub fn mark_synced(&self, key: &ListKey) -> Result<(), ClientError> {
        self.update(key, |row| {
            row.synced = true;
            row.retry_count = 0;
            row.last_attempt_at = Some(now_millis());
        })
    }

    /// A sync attempt failed.
    pub fn bump_retry(&self, key: &ListKey) -> Result<(), ClientError> {
        self.update(key, |row| {
            row.retry_count += 1;
            row.last_attempt_at = Some(now_millis());
        })
    }

    /// Retry budget exhausted: mark the row permanently synced so the
    /// pass stops attempting it.
    pub fn poison(&self, key: &ListKey) -> Result<(), ClientError> {
        warn!(%key, "retry budget exhausted; poisoning row");
        self.update(key, |row| {
            row.synced = true;
            row.last_attempt_at = Some(now_millis());
        })
    }

    /// Revive poisoned rows after a success elsewhere: sustained failure,
    /// not a transient burst, is what should retire a row for good.
    pub fn reset_poisoned(&self) -> Result<usize, ClientError> {
        let mut inner = self.inner.lock();
        let poisoned: Vec<PendingList> = inner
            .rows
            .values()
            .filter(|row| row.synced && row.retry_count >= MAX_RETRIES)
            .cloned()
            .collect();
        let revived = poisoned.len();
        for mut row in poisoned {
            row.synced = false;
            row.retry_count = 0;
            write_locked(&mut inner, row)?;
        }
        Ok(revived)
    }

    /// Unsynced rows, oldest modification first. This ordering is what
    /// keeps one client's mutations applied in insertion order.
    pub fn unsynced(&self) -> Vec<PendingList> {
        let inner = self.inner.lock();
        let mut rows: Vec<PendingList> = inner
            .rows
            .values()
            .filter(|row| !row.synced)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.last_modified);
        rows
    }

    /// Live lists for display (not deleted), newest first.
    pub fn lists(&self) -> Vec<PendingList> {
        let inner = self.inner.lock();
        let mut rows: Vec<PendingList> = inner
            .rows
            .values()
            .filter(|row| !row.deleted)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        rows
    }

    pub fn get(&self, key: &ListKey) -> Option<PendingList> {
        self.inner.lock().rows.get(key).cloned()
    }

    fn write(&self, row: PendingList) -> Result<(), ClientError> {
        let mut inner = self.inner.lock();
        write_locked(&mut inner, row)
    }

    fn update(
        &self,
        key: &ListKey,
        mutate: impl FnOnce(&mut PendingList),
    ) -> Result<(), ClientError> {
        let mut inner = self.inner.lock();
        let Some(mut row) = inner.rows.get(key).cloned() else {
            return Err(ClientError::UnknownList(key.clone()));
        };
        mutate(&mut row);
        write_locked(&mut inner, row)
    }
}

fn write_locked(inner: &mut Inner, row: PendingList) -> Result<(), ClientError> {
    inner.journal.append(&row)?;
    inner.rows.insert(row.key.clone(), row);
    Ok(())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
