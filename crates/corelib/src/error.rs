//! Error types for the core library.

use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Error)]
pub enum Error {
    /// A key was looked up on a ring with no workers.
    #[error("no workers available")]
    EmptyRing,

    /// A worker address did not parse as `host:port`.
    #[error("invalid worker address `{0}`: expected host:port")]
    InvalidAddress(String),

    /// The journal file could not be read or written.
    #[error("journal I/O: {0}")]
    JournalIo(#[from] std::io::Error),

    /// A journal record could not be encoded or decoded.
    #[error("journal record: {0}")]
    JournalCodec(#[from] bincode::Error),
}
