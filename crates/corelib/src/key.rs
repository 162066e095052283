//! List key abstraction.
//!
//! Keys are opaque, stable, globally unique identifiers chosen by the
//! client at creation time. A key is never reused: over its lifetime it is
//! either absent, live, or tombstoned.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a shopping list.
///
/// Newtype over the key string so keys cannot be confused with names or
/// other payload fields. Cheap to clone, comparable, hashable.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListKey(String);

impl ListKey {
    /// Wrap an existing key string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generate a fresh random key (a UUID v4, 128 bits of randomness).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ListKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for ListKey {
    fn from(key: &str) -> Self {
        Self(key.to_owned())
    }
}
