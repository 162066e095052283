//! Replica placement strategies.
//!
//! A strategy determines which workers hold the additional copies of a
//! key once the ring has named the primary. Strategies are deterministic:
//! the same ring and primary always produce the same replica list.

pub mod ring_order;

pub use ring_order::RingOrder;

use corelib::{HashRing, WorkerAddress};

/// Trait for replica placement strategies.
///
/// Implementations must be thread-safe (Send + Sync) as they may be
/// shared across tasks.
pub trait PlacementStrategy: Send + Sync + 'static {
    /// Maximum number of replicas this strategy places (excluding the
    /// primary).
    fn replica_cap(&self) -> usize;

    /// Replica workers for a key owned by `primary`.
    ///
    /// Never includes the primary; returns fewer than the cap when the
    /// cluster is small.
    fn replicas_for(&self, ring: &HashRing, primary: &WorkerAddress) -> Vec<WorkerAddress>;

    /// Strategy name (for logging/debugging).
    fn name(&self) -> &'static str;
}
