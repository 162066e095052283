//! Placement and replication planning.
//!
//! This crate decides where keys live:
//! - How many replicas to keep and on which workers (the strategy)
//! - Diff plans when workers join or leave (the planner)
//! - Observed locations and tombstones for deleted keys

pub mod error;
pub mod placement;
pub mod strategy;

pub use error::PlacementError;
pub use placement::{PlacementDecision, PlacementPlanner, ReplicationTask};
pub use strategy::{PlacementStrategy, RingOrder};
