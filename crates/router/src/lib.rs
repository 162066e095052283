//! Router: the client-facing front of the cluster.
//!
//! The router classifies requests, fans writes out to replicas, fails
//! reads over, tombstones deleted keys, tracks worker liveness by
//! heartbeat, and drives rebalancing when workers join or leave.
//!
//! All routing state (ring, placement planner, registry, worker links)
//! is owned by a single event-loop task; acceptor tasks post events to
//! it over a channel. No locks.

pub mod dispatch;
pub mod links;
pub mod registry;
pub mod server;

pub use registry::{WorkerRegistry, WORKER_TIMEOUT};
pub use server::{run, RouterConfig, RouterError};
