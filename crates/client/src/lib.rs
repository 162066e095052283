//! Client-side sync engine.
//!
//! User actions land in a durable local log first; a background sync
//! task replays unsynced rows against the router with bounded retries.
//! The user-facing API never blocks on the network.

pub mod error;
pub mod store;
pub mod sync;

pub use error::ClientError;
pub use store::{DeleteOutcome, LocalStore, PendingList, MAX_RETRIES};
pub use sync::{
    RouterTransport, SyncEngine, SyncReport, TcpRouterTransport, RETRY_DELAYS, SYNC_INTERVAL,
};
