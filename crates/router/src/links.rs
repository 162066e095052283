//! Worker link table.
//!
//! Workers dial the router's worker channel and identify themselves; the
//! router keeps the resulting connection as a link it can push requests
//! down. One request is in flight per link at a time, which serializes
//! writes to a given worker the same way the event loop serializes
//! everything else.

use std::collections::HashMap;

use corelib::WorkerAddress;
use protocol::{Connection, ProtocolError, Request, RequestEnvelope, Response, ResponseEnvelope};
use tracing::debug;

/// An identified connection to one worker.
#[derive(Debug)]
pub struct WorkerLink {
    address: WorkerAddress,
    conn: Connection,
}

impl WorkerLink {
    pub fn new(address: WorkerAddress, conn: Connection) -> Self {
        Self { address, conn }
    }

    pub fn address(&self) -> &WorkerAddress {
        &self.address
    }

    /// Forward a request and wait (bounded) for the worker's reply.
    ///
    /// `client` carries the client identity for client-ward frames;
    /// internal frames pass None.
    pub async fn call(
        &mut self,
        client: Option<&str>,
        request: &Request,
    ) -> Result<Response, ProtocolError> {
        debug!(worker = %self.address, ?client, "forwarding request");
        let envelope = RequestEnvelope {
            client: client.map(str::to_owned),
            request: request.clone(),
        };
        self.conn.send(&envelope).await?;
        let reply: ResponseEnvelope = self.conn.recv().await?;
        Ok(reply.response)
    }
}

/// The links the router currently holds, keyed by worker address.
#[derive(Debug, Default)]
pub struct LinkTable {
    links: HashMap<WorkerAddress, WorkerLink>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a link, replacing any previous connection from the same
    /// worker (a reconnect supersedes the dead link).
    pub fn insert(&mut self, link: WorkerLink) {
        self.links.insert(link.address().clone(), link);
    }

    pub fn get_mut(&mut self, worker: &WorkerAddress) -> Option<&mut WorkerLink> {
        self.links.get_mut(worker)
    }

    pub fn remove(&mut self, worker: &WorkerAddress) -> Option<WorkerLink> {
        self.links.remove(worker)
    }

    pub fn contains(&self, worker: &WorkerAddress) -> bool {
        self.links.contains_key(worker)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
