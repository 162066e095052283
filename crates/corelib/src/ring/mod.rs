//! Consistent hash ring.
//!
//! The ring maps keys to workers. Each worker occupies a small fixed
//! number of virtual positions; lookups walk clockwise to the first
//! position at or after the key's own position.

pub mod position;
pub mod ring;

pub use position::RingPosition;
pub use ring::{HashRing, VNODES_PER_WORKER};
