//! Ring-order replica placement.
//!
//! Takes the first N members of the ring's worker set, skipping the
//! primary. The worker set iterates in a stable order, so the replica
//! list is a pure function of `(ring, primary)`.
//!
//! # Limitations
//!
//! - No awareness of racks or failure domains
//! - Small clusters put every key's replicas on the same few workers
//!
//! Both are fine at this system's scale.

use corelib::{HashRing, WorkerAddress};

use crate::strategy::PlacementStrategy;

/// Default replica cap: primary plus at most two copies.
pub const DEFAULT_REPLICA_CAP: usize = 2;

/// Replicas in worker-set order.
///
/// For a cluster of N workers this yields:
/// - 1 worker:  no replicas
/// - 2 workers: one replica
/// - 3+ workers: `replica_cap` replicas
#[derive(Debug, Clone)]
pub struct RingOrder {
    replica_cap: usize,
}

impl RingOrder {
    pub fn new(replica_cap: usize) -> Self {
        Self { replica_cap }
    }
}

impl Default for RingOrder {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICA_CAP)
    }
}

impl PlacementStrategy for RingOrder {
    fn replica_cap(&self) -> usize {
        self.replica_cap
    }

    fn replicas_for(&self, ring: &HashRing, primary: &WorkerAddress) -> Vec<WorkerAddress> {
        ring.workers()
            .iter()
            .filter(|worker| *worker != primary)
            .take(self.replica_cap)
            .cloned()
            .collect()
    }

    fn name(&self) -> &'static str {
        "RingOrder"
    }
}
