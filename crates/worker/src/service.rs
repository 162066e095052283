//! Worker service loops.
//!
//! Three long-lived activities share one [`WorkerNode`]:
//! - the router channel: an outbound connection the worker identifies
//!   itself on, then serves request envelopes from,
//! - the replication listener at `port + 1000`: transient inbound
//!   connections carrying one request each,
//! - the heartbeat sender: a liveness frame to the router every
//!   interval, warning on a missing ack but never backing off.
//!
//! Connection loss anywhere is recoverable: the affected loop sleeps
//! briefly and redials.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use corelib::WorkerAddress;
use protocol::{
    Connection, Heartbeat, HeartbeatAck, Request, RequestEnvelope, Response, ResponseEnvelope,
    WorkerHello,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::node::WorkerNode;
use crate::store::ListStore;

/// How often the worker announces itself to the router.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Pause before redialing a lost connection.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Everything a worker needs to run.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Host other nodes use to reach this worker.
    pub host: String,
    /// The worker's identity port; the replication channel binds at
    /// `port + 1000`.
    pub port: u16,
    /// The router's worker channel.
    pub router_addr: String,
    /// The router's heartbeat channel.
    pub heartbeat_addr: String,
    /// Durable store path.
    pub db_path: PathBuf,
    /// Liveness announcement interval.
    pub heartbeat_interval: Duration,
}

impl WorkerConfig {
    pub fn new(port: u16, router_host: &str, router_port: u16, heartbeat_port: u16) -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port,
            router_addr: format!("{router_host}:{router_port}"),
            heartbeat_addr: format!("{router_host}:{heartbeat_port}"),
            db_path: PathBuf::from(format!("worker_{port}.db")),
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }

    pub fn address(&self) -> WorkerAddress {
        WorkerAddress::new(format!("{}:{}", self.host, self.port))
    }
}

/// Run a worker until the stop flag flips.
///
/// Binding the replication channel is the only fatal startup step;
/// everything else retries.
pub async fn run(config: WorkerConfig, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
    let address = config.address();
    let store = ListStore::open(&config.db_path)?;
    let node = Arc::new(WorkerNode::new(address.clone(), store));

    let replication_endpoint = address
        .replication_addr()
        .map_err(|err| WorkerError::Address(err.to_string()))?;
    let replication_listener = TcpListener::bind(replication_endpoint.as_str())
        .await
        .map_err(protocol::ProtocolError::from)?;
    info!(%address, replication = %replication_endpoint, "worker started");

    let replication_task = tokio::spawn(serve_replication(
        replication_listener,
        Arc::clone(&node),
        shutdown.clone(),
    ));
    let heartbeat_task = tokio::spawn(send_heartbeats(
        config.heartbeat_addr.clone(),
        address.clone(),
        config.heartbeat_interval,
        shutdown.clone(),
    ));

    serve_router_channel(&config, &node, &mut shutdown).await;

    replication_task.abort();
    heartbeat_task.abort();
    info!(%address, "worker shut down");
    Ok(())
}

/// Serve the router channel, redialing whenever it drops.
async fn serve_router_channel(
    config: &WorkerConfig,
    node: &Arc<WorkerNode>,
    shutdown: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        match Connection::connect(&config.router_addr).await {
            Ok(mut conn) => {
                let hello = WorkerHello {
                    worker_address: node.address().clone(),
                };
                if let Err(err) = conn.send(&hello).await {
                    warn!(%err, "failed to identify to router");
                } else {
                    debug!(router = %config.router_addr, "router channel connected");
                    if serve_envelopes(&mut conn, node, shutdown).await {
                        return;
                    }
                }
            }
            Err(err) => {
                warn!(router = %config.router_addr, %err, "router channel connect failed");
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// Serve envelopes on one router connection. Returns true on shutdown,
/// false when the connection was lost and should be redialed.
async fn serve_envelopes(
    conn: &mut Connection,
    node: &Arc<WorkerNode>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        let envelope: RequestEnvelope = tokio::select! {
            received = conn.next() => match received {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(%err, "router channel lost");
                    return false;
                }
            },
            _ = shutdown.changed() => return true,
        };

        let client = envelope.client;
        debug!(?client, "processing request");
        let response = node.handle(envelope.request).await;
        let reply = ResponseEnvelope { client, response };
        if let Err(err) = conn.send(&reply).await {
            warn!(%err, "failed to send response to router");
            return false;
        }
    }
}

/// Accept transient replication connections, one request each.
async fn serve_replication(
    listener: TcpListener,
    node: Arc<WorkerNode>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.changed() => return,
        };
        match accepted {
            Ok((stream, peer)) => {
                let node = Arc::clone(&node);
                tokio::spawn(async move {
                    let mut conn = Connection::from_stream(stream);
                    match conn.recv::<Request>().await {
                        Ok(request) => {
                            let response = node.handle(request).await;
                            if let Err(err) = conn.send(&response).await {
                                warn!(%peer, %err, "failed to answer replication request");
                            }
                        }
                        Err(err) => {
                            warn!(%peer, %err, "malformed replication request");
                            let _ = conn
                                .send(&Response::error("malformed replication request"))
                                .await;
                        }
                    }
                });
            }
            Err(err) => {
                error!(%err, "replication accept failed");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Publish liveness every interval.
async fn send_heartbeats(
    heartbeat_addr: String,
    address: WorkerAddress,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let beat = Heartbeat {
        worker_address: address,
    };
    let mut conn: Option<Connection> = None;
    loop {
        if conn.is_none() {
            match Connection::connect(&heartbeat_addr).await {
                Ok(fresh) => conn = Some(fresh),
                Err(err) => warn!(%err, "heartbeat connect failed"),
            }
        }

        if let Some(active) = conn.as_mut() {
            match active.call::<_, HeartbeatAck>(&beat).await {
                Ok(ack) if ack.is_ack() => {}
                Ok(_) => warn!("invalid heartbeat response"),
                Err(err) => {
                    warn!(%err, "heartbeat failed");
                    conn = None;
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => return,
        }
    }
}
