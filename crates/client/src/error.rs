//! Client error types.

use corelib::ListKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// A delete named a key the local log has never seen.
    #[error("list {0} not found")]
    UnknownList(ListKey),

    /// The local log could not be read or written.
    #[error("local log: {0}")]
    Log(#[from] corelib::Error),
}
