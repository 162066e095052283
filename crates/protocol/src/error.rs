//! Protocol error types.

use std::time::Duration;

use thiserror::Error;

use crate::codec::MAX_FRAME_BYTES;

/// Errors raised by the codec and transport layers.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The underlying stream failed.
    #[error("transport I/O: {0}")]
    Io(#[from] std::io::Error),

    /// No frame arrived within the receive deadline.
    #[error("receive timed out after {0:?}")]
    Timeout(Duration),

    /// A frame did not parse as the expected message.
    #[error("malformed frame: {0}")]
    Codec(#[from] serde_json::Error),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// A frame exceeded the size limit.
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_BYTES}-byte limit")]
    Oversized(usize),
}

impl ProtocolError {
    /// Whether the failure is transient: worth retrying after the caller
    /// re-opens the transport. Malformed or oversized frames are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_) | ProtocolError::Timeout(_) | ProtocolError::Closed
        )
    }
}
