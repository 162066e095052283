//! Worker error types.

use thiserror::Error;

/// Errors that stop a worker, as opposed to per-request failures which
/// are answered with structured error responses.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The durable store could not be opened or written.
    #[error("store: {0}")]
    Store(#[from] corelib::Error),

    /// A channel could not be bound or dialed at startup.
    #[error("transport: {0}")]
    Transport(#[from] protocol::ProtocolError),

    /// The configured worker address is unusable.
    #[error("address: {0}")]
    Address(String),
}
