//! Request handling.
//!
//! The handler is a pure function from a request to a structured
//! response, plus the store side effects the request implies. Nothing in
//! here panics on bad input: unknown shapes and store failures become
//! error responses with a message.

use corelib::{ListKey, WorkerAddress};
use metrics::counter;
use protocol::{Connection, ListPayload, ProtocolError, Request, Response};
use tracing::{info, warn};

use crate::store::{ListStore, Role};

/// One worker's request-handling state: its identity and its store.
pub struct WorkerNode {
    address: WorkerAddress,
    store: ListStore,
}

impl WorkerNode {
    pub fn new(address: WorkerAddress, store: ListStore) -> Self {
        Self { address, store }
    }

    pub fn address(&self) -> &WorkerAddress {
        &self.address
    }

    pub fn store(&self) -> &ListStore {
        &self.store
    }

    /// Apply one request. Never fails; failures are responses.
    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::CreateList {
                url,
                name,
                creator,
                is_replica,
            } => self.apply_create(&url, &name, &creator, is_replica),
            Request::DeleteList { list_url } => self.apply_delete(&list_url),
            Request::CheckList { list_url } => {
                let status = self.store.status(&list_url);
                Response::success().with_existence(status.exists, status.active)
            }
            Request::GetList { url } => match self.store.fetch(&url) {
                Some(record) => Response::success().with_list(ListPayload {
                    url: record.key,
                    name: record.name,
                    creator: record.creator,
                }),
                None => Response::error("List not found"),
            },
            Request::ReplicateWrite { original_data } => match *original_data {
                Request::CreateList {
                    url, name, creator, ..
                } => {
                    info!(key = %url, "re-applying write as replica");
                    self.apply_create(&url, &name, &creator, true)
                }
                Request::DeleteList { list_url } => self.apply_delete(&list_url),
                other => Response::error(format!(
                    "cannot replicate this action: {:?}",
                    other.key()
                )),
            },
            Request::ReplicateData {
                data_key,
                target_worker,
            } => self.push_copy(&data_key, &target_worker).await,
            Request::ReceiveReplication {
                data,
                source_worker,
            } => {
                info!(key = %data.url, source = %source_worker, "storing pushed replica");
                counter!("worker_replications_received").increment(1);
                match self.store.put(
                    &data.url,
                    &data.name,
                    &data.creator,
                    Role::Replica,
                    Some(source_worker),
                ) {
                    Ok(_) => {
                        Response::success().with_message("Replication data received and stored")
                    }
                    Err(err) => internal_error(err),
                }
            }
            Request::ListKeys => Response::success().with_keys(self.store.keys()),
        }
    }

    fn apply_create(&self, key: &ListKey, name: &str, creator: &str, is_replica: bool) -> Response {
        let role = if is_replica {
            Role::Replica
        } else {
            Role::Primary
        };
        info!(key = %key, ?role, "creating list");
        counter!("worker_applies").increment(1);
        match self.store.put(key, name, creator, role, None) {
            Ok(record) => Response::success()
                .with_message("List created successfully")
                .with_list(ListPayload {
                    url: record.key,
                    name: record.name,
                    creator: record.creator,
                })
                .with_requires_replication(!is_replica),
            Err(err) => internal_error(err),
        }
    }

    fn apply_delete(&self, key: &ListKey) -> Response {
        match self.store.delete(key) {
            Ok(before) if before.exists && before.active => {
                info!(key = %key, "deleted list");
                Response::success()
                    .with_message("List deleted successfully")
                    .with_had_list(true)
            }
            // Re-delivered delete: same state, same answer.
            Ok(before) if before.exists => Response::success()
                .with_message("List was already deleted")
                .with_had_list(true),
            Ok(_) => Response::error("List not found").with_had_list(false),
            Err(err) => internal_error(err),
        }
    }

    /// Push one key to another worker over its replication channel.
    async fn push_copy(&self, key: &ListKey, target: &WorkerAddress) -> Response {
        let Some(record) = self.store.fetch(key) else {
            return Response::error(format!("Data not found for replication: {key}"));
        };

        let endpoint = match target.replication_addr() {
            Ok(endpoint) => endpoint,
            Err(err) => return Response::error(format!("Replication failed: {err}")),
        };
        let push = Request::ReceiveReplication {
            data: ListPayload {
                url: record.key,
                name: record.name,
                creator: record.creator,
            },
            source_worker: self.address.clone(),
        };

        match self.send_to_replica(&endpoint, &push).await {
            Ok(response) if response.is_success() => {
                info!(key = %key, target = %target, "replication push completed");
                Response::success().with_message("Replication completed successfully")
            }
            Ok(response) => {
                warn!(key = %key, target = %target, ?response.message, "replica refused push");
                Response::error(
                    response
                        .message
                        .unwrap_or_else(|| "Replication failed".to_owned()),
                )
            }
            Err(err) => {
                warn!(key = %key, target = %target, %err, "replication push failed");
                Response::error(format!("Replication failed: {err}"))
            }
        }
    }

    async fn send_to_replica(
        &self,
        endpoint: &WorkerAddress,
        push: &Request,
    ) -> Result<Response, ProtocolError> {
        let mut conn = Connection::connect(endpoint.as_str()).await?;
        conn.call(push).await
    }
}

fn internal_error(err: corelib::Error) -> Response {
    warn!(%err, "store operation failed");
    Response::error(format!("Internal error: {err}"))
}
