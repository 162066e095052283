//! Error types for placement decisions.

use corelib::ListKey;
use thiserror::Error;

/// Why no placement could be produced for a key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    /// The ring has no live workers.
    #[error("no workers available")]
    EmptyCluster,

    /// The key was deleted; it yields no placement and must not be
    /// written again.
    #[error("list {0} has been deleted")]
    Tombstoned(ListKey),
}
