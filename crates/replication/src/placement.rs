//! Placement planner.
//!
//! The planner combines three pieces of state:
//! - the hash ring (desired placement),
//! - the location map (workers *observed* to hold each key),
//! - the tombstone set (deleted keys).
//!
//! Desired placement is a pure function of the ring and the live worker
//! set; the location map records reality as acknowledgements arrive. Diff
//! plans for joins and leaves compare the two.

use std::collections::{BTreeMap, BTreeSet};

use corelib::{HashRing, ListKey, WorkerAddress};
use tracing::{debug, warn};

use crate::error::PlacementError;
use crate::strategy::{PlacementStrategy, RingOrder};

/// Copies of a key worth keeping: one primary plus two replicas.
pub const MAX_COPIES: usize = 3;

/// Where a key should live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementDecision {
    pub primary: WorkerAddress,
    pub replicas: Vec<WorkerAddress>,
}

impl PlacementDecision {
    /// Primary followed by replicas, in placement order.
    pub fn members(&self) -> impl Iterator<Item = &WorkerAddress> {
        std::iter::once(&self.primary).chain(self.replicas.iter())
    }

    pub fn contains(&self, worker: &WorkerAddress) -> bool {
        self.members().any(|member| member == worker)
    }
}

/// One copy to move: send `key` from `source` to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationTask {
    pub key: ListKey,
    pub source: WorkerAddress,
    pub target: WorkerAddress,
}

/// Placement state owned by the router event loop.
#[derive(Debug)]
pub struct PlacementPlanner<S: PlacementStrategy = RingOrder> {
    ring: HashRing,
    strategy: S,
    locations: BTreeMap<ListKey, BTreeSet<WorkerAddress>>,
    tombstones: BTreeSet<ListKey>,
}

impl PlacementPlanner<RingOrder> {
    pub fn new() -> Self {
        Self::with_strategy(RingOrder::default())
    }
}

impl Default for PlacementPlanner<RingOrder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: PlacementStrategy> PlacementPlanner<S> {
    pub fn with_strategy(strategy: S) -> Self {
        Self {
            ring: HashRing::new(),
            strategy,
            locations: BTreeMap::new(),
            tombstones: BTreeSet::new(),
        }
    }

    /// Desired placement for a key.
    ///
    /// Pure in `(ring, live workers, tombstone set)`; observed locations
    /// play no part.
    pub fn placement(&self, key: &ListKey) -> Result<PlacementDecision, PlacementError> {
        if self.tombstones.contains(key) {
            return Err(PlacementError::Tombstoned(key.clone()));
        }
        let primary = self
            .ring
            .primary(key)
            .map_err(|_| PlacementError::EmptyCluster)?;
        let replicas = self.strategy.replicas_for(&self.ring, &primary);
        Ok(PlacementDecision { primary, replicas })
    }

    /// Add a worker to the ring and plan the copies it should receive.
    ///
    /// For every known key that the new placement puts on the joiner, a
    /// task is emitted when the joiner does not already hold the key,
    /// fewer than [`MAX_COPIES`] copies are observed, and some current
    /// holder can act as the source. A worker already in the ring yields
    /// an empty plan.
    pub fn on_join(&mut self, worker: &WorkerAddress) -> Vec<ReplicationTask> {
        if !self.ring.add(worker) {
            return Vec::new();
        }

        let mut tasks = Vec::new();
        for (key, holders) in &self.locations {
            if self.tombstones.contains(key) {
                continue;
            }
            let Ok(decision) = self.placement(key) else {
                continue;
            };
            if !decision.contains(worker)
                || holders.contains(worker)
                || holders.len() >= MAX_COPIES
            {
                continue;
            }
            if let Some(source) = holders.iter().next() {
                debug!(%key, %source, target = %worker, "planning copy for joining worker");
                tasks.push(ReplicationTask {
                    key: key.clone(),
                    source: source.clone(),
                    target: worker.clone(),
                });
            }
        }
        tasks
    }

    /// Remove a worker from the ring and report the keys it held.
    ///
    /// Returns each affected key with the holders that remain. Keys whose
    /// last copy left the cluster are logged and dropped; nothing can
    /// bring them back.
    pub fn on_leave(&mut self, worker: &WorkerAddress) -> Vec<(ListKey, BTreeSet<WorkerAddress>)> {
        if !self.ring.remove(worker) {
            return Vec::new();
        }

        let mut affected = Vec::new();
        for (key, holders) in &mut self.locations {
            if holders.remove(worker) {
                if holders.is_empty() {
                    if !self.tombstones.contains(key) {
                        warn!(%key, %worker, "lost the last copy of a key");
                    }
                } else {
                    affected.push((key.clone(), holders.clone()));
                }
            }
        }
        self.locations.retain(|_, holders| !holders.is_empty());
        affected
    }

    /// Tasks that converge observed locations with desired placement:
    /// for every placement member missing a key that still has fewer
    /// than [`MAX_COPIES`] observed copies, copy from a current holder.
    ///
    /// Replica writes that failed in fan-out are healed here, one tick
    /// at a time.
    pub fn reconciliation_tasks(&self) -> Vec<ReplicationTask> {
        let mut tasks = Vec::new();
        for (key, holders) in &self.locations {
            if self.tombstones.contains(key) || holders.len() >= MAX_COPIES {
                continue;
            }
            let Ok(decision) = self.placement(key) else {
                continue;
            };
            let Some(source) = holders.iter().next() else {
                continue;
            };
            for member in decision.members() {
                if !holders.contains(member) {
                    tasks.push(ReplicationTask {
                        key: key.clone(),
                        source: source.clone(),
                        target: member.clone(),
                    });
                }
            }
        }
        tasks
    }

    /// Record that a worker acknowledged holding a key.
    ///
    /// Tombstoned keys never re-enter the location map.
    pub fn record_location(&mut self, key: &ListKey, worker: &WorkerAddress) {
        if self.tombstones.contains(key) {
            debug!(%key, %worker, "ignoring location record for tombstoned key");
            return;
        }
        self.locations
            .entry(key.clone())
            .or_default()
            .insert(worker.clone());
    }

    /// Drop one observed location; the key's entry goes with its last
    /// holder.
    pub fn forget_location(&mut self, key: &ListKey, worker: &WorkerAddress) {
        if let Some(holders) = self.locations.get_mut(key) {
            holders.remove(worker);
            if holders.is_empty() {
                self.locations.remove(key);
            }
        }
    }

    /// Mark a key deleted. Terminal: placement refuses the key from now
    /// on and its locations are forgotten.
    pub fn tombstone(&mut self, key: &ListKey) {
        self.tombstones.insert(key.clone());
        self.locations.remove(key);
    }

    pub fn is_tombstoned(&self, key: &ListKey) -> bool {
        self.tombstones.contains(key)
    }

    /// Workers observed to hold a key.
    pub fn locations(&self, key: &ListKey) -> BTreeSet<WorkerAddress> {
        self.locations.get(key).cloned().unwrap_or_default()
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }
}
