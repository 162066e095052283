//! Worker node.
//!
//! A worker owns one durable list store and serves three channels:
//! - the router channel (client-ward and internal requests),
//! - its replication channel (direct worker-to-worker pushes),
//! - the heartbeat channel (periodic liveness to the router).

pub mod error;
pub mod node;
pub mod service;
pub mod store;

pub use error::WorkerError;
pub use node::WorkerNode;
pub use service::{WorkerConfig, HEARTBEAT_INTERVAL};
pub use store::{ListRecord, ListStatus, ListStore, Role};
