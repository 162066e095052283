//! Hash ring data structure.
//!
//! A sorted vector of `(position, worker)` pairs with binary-search
//! insertion. Collisions are rare enough at 256 bits that first-insert-wins
//! is an acceptable tie-break.
//!
//! # Performance
//!
//! - **Lookup**: O(log n) where n = total positions
//! - **Add**: O(n) per virtual position (sorted insert)
//! - **Remove**: O(n) scan
//!
//! With three positions per worker and clusters of tens of workers, the
//! vector stays small enough that none of this matters.

use std::collections::BTreeSet;

use crate::address::WorkerAddress;
use crate::error::{Error, Result};
use crate::key::ListKey;
use crate::ring::position::RingPosition;

/// Virtual positions each worker occupies on the ring.
pub const VNODES_PER_WORKER: usize = 3;

/// The consistent hash ring.
///
/// # Invariants
///
/// - Every member worker occupies exactly [`VNODES_PER_WORKER`] positions,
///   inserted on join and all removed on leave.
/// - `positions` is sorted by position at all times.
///
/// The worker set is a `BTreeSet` so that iteration order is deterministic;
/// replica selection depends on it.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    positions: Vec<(RingPosition, WorkerAddress)>,
    workers: BTreeSet<WorkerAddress>,
}

impl HashRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a worker's virtual positions.
    ///
    /// Positions are the digests of `"{addr}:0"` through `"{addr}:2"`.
    /// Returns false (and changes nothing) if the worker is already a
    /// member. A colliding position keeps the worker inserted first.
    pub fn add(&mut self, worker: &WorkerAddress) -> bool {
        if !self.workers.insert(worker.clone()) {
            return false;
        }
        for index in 0..VNODES_PER_WORKER {
            let position = RingPosition::digest(&format!("{worker}:{index}"));
            match self.positions.binary_search_by(|(p, _)| p.cmp(&position)) {
                Ok(_) => {}
                Err(slot) => self.positions.insert(slot, (position, worker.clone())),
            }
        }
        true
    }

    /// Remove every position mapped to a worker.
    ///
    /// Returns false if the worker was not a member.
    pub fn remove(&mut self, worker: &WorkerAddress) -> bool {
        if !self.workers.remove(worker) {
            return false;
        }
        self.positions.retain(|(_, w)| w != worker);
        true
    }

    pub fn contains(&self, worker: &WorkerAddress) -> bool {
        self.workers.contains(worker)
    }

    /// The worker owning a key: the smallest position at or after the
    /// key's position, wrapping around.
    ///
    /// Fails with [`Error::EmptyRing`] when no workers are present.
    pub fn primary(&self, key: &ListKey) -> Result<WorkerAddress> {
        if self.positions.is_empty() {
            return Err(Error::EmptyRing);
        }
        let hashed = RingPosition::digest(key.as_str());
        let index = self.positions.partition_point(|(p, _)| *p < hashed);
        let index = if index == self.positions.len() { 0 } else { index };
        Ok(self.positions[index].1.clone())
    }

    /// Distinct workers currently represented, in deterministic order.
    pub fn workers(&self) -> &BTreeSet<WorkerAddress> {
        &self.workers
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
