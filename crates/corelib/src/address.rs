//! Worker identity.
//!
//! Workers are identified by an opaque `host:port` address. The address is
//! identity only; liveness, connections, and stored data live elsewhere.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Port offset at which a worker binds its replication channel.
pub const REPLICATION_PORT_OFFSET: u16 = 1000;

/// Address of a worker in the cluster.
///
/// Equality-comparable and hashable; used as the key of the registry, the
/// ring, and the location map. Keep this cheap to clone.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerAddress(String);

impl WorkerAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The host part of the address.
    pub fn host(&self) -> &str {
        match self.0.rsplit_once(':') {
            Some((host, _)) => host,
            None => &self.0,
        }
    }

    /// The port part of the address.
    pub fn port(&self) -> Result<u16> {
        self.0
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .ok_or_else(|| Error::InvalidAddress(self.0.clone()))
    }

    /// The address of this worker's replication channel (`port + 1000`).
    pub fn replication_addr(&self) -> Result<WorkerAddress> {
        let port = self
            .port()?
            .checked_add(REPLICATION_PORT_OFFSET)
            .ok_or_else(|| Error::InvalidAddress(self.0.clone()))?;
        Ok(WorkerAddress(format!("{}:{}", self.host(), port)))
    }
}

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for WorkerAddress {
    fn from(addr: String) -> Self {
        Self(addr)
    }
}

impl From<&str> for WorkerAddress {
    fn from(addr: &str) -> Self {
        Self(addr.to_owned())
    }
}
