//! Request classification and routing policy.
//!
//! Writes go to the primary and fan out to replicas; reads fail over from
//! the primary to replicas in placement order; deletes ask every observed
//! holder and tombstone on the first acknowledgement. Replica failures
//! are never surfaced to clients; they are reconciled by later rebalance
//! work.

use std::time::Duration;

use corelib::{ListKey, WorkerAddress};
use metrics::counter;
use protocol::{ProtocolError, Request, Response};
use replication::{PlacementError, PlacementPlanner, ReplicationTask};
use tracing::{debug, info, warn};

use crate::links::LinkTable;
use crate::registry::WorkerRegistry;

/// Replica fan-out owed after a create has been acked to the client.
#[derive(Debug)]
pub struct FanOut {
    pub key: ListKey,
    pub original: Request,
    pub replicas: Vec<WorkerAddress>,
}

/// Routing state, exclusively owned by the event-loop task.
pub struct Router {
    planner: PlacementPlanner,
    registry: WorkerRegistry,
    links: LinkTable,
}

impl Router {
    pub fn new(worker_timeout: Duration) -> Self {
        Self {
            planner: PlacementPlanner::new(),
            registry: WorkerRegistry::with_timeout(worker_timeout),
            links: LinkTable::new(),
        }
    }

    pub fn links_mut(&mut self) -> &mut LinkTable {
        &mut self.links
    }

    /// Forward one request to one worker, dropping the link on transport
    /// failure so the worker's reconnect replaces it.
    async fn call_worker(
        &mut self,
        worker: &WorkerAddress,
        client: Option<&str>,
        request: &Request,
    ) -> Result<Response, ProtocolError> {
        let Some(link) = self.links.get_mut(worker) else {
            debug!(%worker, "no link to worker");
            return Err(ProtocolError::Closed);
        };
        match link.call(client, request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                warn!(%worker, %err, "worker call failed; dropping link");
                self.links.remove(worker);
                Err(err)
            }
        }
    }

    /// Create: route to the primary, record the ack, and hand back the
    /// replica fan-out to run after the client has its reply.
    pub async fn handle_create(
        &mut self,
        client_id: &str,
        request: Request,
    ) -> (Response, Option<FanOut>) {
        counter!("router_requests").increment(1);
        let Request::CreateList { url, .. } = &request else {
            return (Response::error("unsupported action"), None);
        };
        let key = url.clone();

        let decision = match self.planner.placement(&key) {
            Ok(decision) => decision,
            Err(PlacementError::Tombstoned(_)) => {
                return (
                    Response::error("List has been deleted and cannot be recreated"),
                    None,
                );
            }
            Err(PlacementError::EmptyCluster) => {
                return (Response::error("no workers available"), None);
            }
        };

        match self
            .call_worker(&decision.primary, Some(client_id), &request)
            .await
        {
            Ok(response) => {
                if response.is_success() {
                    self.planner.record_location(&key, &decision.primary);
                    let fan_out = FanOut {
                        key,
                        original: request,
                        replicas: decision.replicas,
                    };
                    (response, Some(fan_out))
                } else {
                    (response, None)
                }
            }
            Err(_) => (Response::error("primary worker unavailable"), None),
        }
    }

    /// Replica fan-out for a create. Failures are logged only; the next
    /// rebalance pass re-converges.
    pub async fn fan_out_create(&mut self, plan: FanOut) {
        let wrapped = Request::ReplicateWrite {
            original_data: Box::new(plan.original.clone()),
        };
        for replica in &plan.replicas {
            match self.call_worker(replica, None, &wrapped).await {
                Ok(response) if response.is_success() => {
                    counter!("router_replica_fanouts").increment(1);
                    self.planner.record_location(&plan.key, replica);
                }
                Ok(response) => {
                    warn!(key = %plan.key, %replica, ?response.message, "replica refused write");
                }
                Err(err) => {
                    warn!(key = %plan.key, %replica, %err, "replica write failed");
                }
            }
        }
    }

    /// Delete: ask every observed holder; any `had_list` acknowledgement
    /// tombstones the key. The primary's answer is the client-facing one
    /// when the primary held the list.
    pub async fn handle_delete(&mut self, client_id: &str, request: Request) -> Response {
        counter!("router_requests").increment(1);
        let Request::DeleteList { list_url } = &request else {
            return Response::error("unsupported action");
        };
        let key = list_url.clone();

        if self.planner.is_tombstoned(&key) {
            return Response::error("List not found");
        }
        let observed = self.planner.locations(&key);
        let decision = match self.planner.placement(&key) {
            Ok(decision) => decision,
            Err(PlacementError::EmptyCluster) => {
                return Response::error("no workers available");
            }
            Err(PlacementError::Tombstoned(_)) => {
                return Response::error("List not found");
            }
        };

        let candidates: Vec<WorkerAddress> = decision
            .members()
            .filter(|member| observed.contains(*member))
            .cloned()
            .collect();

        let mut client_facing: Option<Response> = None;
        let mut acknowledged = false;
        for candidate in &candidates {
            let framing = (*candidate == decision.primary).then_some(client_id);
            match self.call_worker(candidate, framing, &request).await {
                Ok(response) => {
                    if response.had_list == Some(true) {
                        acknowledged = true;
                        self.planner.forget_location(&key, candidate);
                        if *candidate == decision.primary || client_facing.is_none() {
                            client_facing = Some(response);
                        }
                    }
                }
                Err(err) => {
                    warn!(key = %key, worker = %candidate, %err, "delete forward failed");
                }
            }
        }

        if acknowledged {
            info!(key = %key, "tombstoning deleted key");
            self.planner.tombstone(&key);
            client_facing.unwrap_or_else(|| Response::success().with_had_list(true))
        } else {
            Response::error("List not found")
        }
    }

    /// Read: primary first, then replicas in placement order; the first
    /// transport-level success is relayed verbatim.
    pub async fn handle_read(&mut self, client_id: &str, request: Request) -> Response {
        counter!("router_requests").increment(1);
        let Some(key) = request.key().cloned() else {
            return Response::error("unsupported action");
        };

        if self.planner.is_tombstoned(&key) {
            return Response::error("List not found");
        }
        let decision = match self.planner.placement(&key) {
            Ok(decision) => decision,
            Err(PlacementError::EmptyCluster) => {
                return Response::error("no workers available");
            }
            Err(PlacementError::Tombstoned(_)) => {
                return Response::error("List not found");
            }
        };

        let members: Vec<WorkerAddress> = decision.members().cloned().collect();
        for member in &members {
            match self.call_worker(member, Some(client_id), &request).await {
                Ok(response) => return response,
                Err(err) => {
                    warn!(key = %key, worker = %member, %err, "read attempt failed; failing over");
                }
            }
        }
        Response::error("Unable to process read request")
    }

    /// Heartbeat: refresh liveness; a first heartbeat is a join and
    /// schedules the planner's replication plan.
    pub async fn handle_heartbeat(&mut self, worker: WorkerAddress) {
        if self.registry.register(&worker) {
            let tasks = self.planner.on_join(&worker);
            info!(%worker, planned = tasks.len(), "worker joined");
            for task in tasks {
                self.run_replication_task(task).await;
            }
        }
    }

    /// Rebalance tick: evict workers whose heartbeat lapsed, re-plan the
    /// keys they held, then heal any key still short of its placement
    /// (replica writes that failed in fan-out land here).
    pub async fn sweep(&mut self) {
        self.evict_lapsed().await;
        for task in self.planner.reconciliation_tasks() {
            self.run_replication_task(task).await;
        }
    }

    async fn evict_lapsed(&mut self) {
        for worker in self.registry.inactive() {
            info!(%worker, "evicting inactive worker");
            counter!("router_evictions").increment(1);
            self.registry.remove(&worker);
            self.links.remove(&worker);

            let affected = self.planner.on_leave(&worker);
            for (key, remaining) in affected {
                let Ok(decision) = self.planner.placement(&key) else {
                    continue;
                };
                // Prefer a holder the router can still reach as the source.
                let Some(source) = remaining
                    .iter()
                    .find(|holder| self.links.contains(*holder))
                    .or_else(|| remaining.iter().next())
                    .cloned()
                else {
                    continue;
                };
                let targets: Vec<WorkerAddress> = decision
                    .members()
                    .filter(|member| !remaining.contains(*member))
                    .cloned()
                    .collect();
                for target in targets {
                    self.run_replication_task(ReplicationTask {
                        key: key.clone(),
                        source: source.clone(),
                        target,
                    })
                    .await;
                }
            }
        }
    }

    /// Ask `source` to push one key to `target`; record the new location
    /// on success.
    async fn run_replication_task(&mut self, task: ReplicationTask) {
        let request = Request::ReplicateData {
            data_key: task.key.clone(),
            target_worker: task.target.clone(),
        };
        match self.call_worker(&task.source, None, &request).await {
            Ok(response) if response.is_success() => {
                info!(key = %task.key, source = %task.source, target = %task.target,
                      "replication completed");
                self.planner.record_location(&task.key, &task.target);
            }
            Ok(response) => {
                warn!(key = %task.key, target = %task.target, ?response.message,
                      "replication refused");
            }
            Err(err) => {
                warn!(key = %task.key, target = %task.target, %err, "replication failed");
            }
        }
    }
}
