//! Core library for the distributed shopping-list store.
//!
//! This crate provides the fundamental abstractions shared by the router,
//! the workers, and the client:
//! - List keys and worker addresses
//! - Ring positions and the consistent hash ring
//! - The append-only journal backing all durable state

pub mod address;
pub mod error;
pub mod journal;
pub mod key;
pub mod ring;

pub use address::WorkerAddress;
pub use error::{Error, Result};
pub use journal::Journal;
pub use key::ListKey;
pub use ring::{HashRing, RingPosition, VNODES_PER_WORKER};
