//! Router server: listeners, acceptor tasks, and the event loop.
//!
//! The event loop owns all routing state. Acceptor tasks translate socket
//! activity into [`Event`]s posted over a channel; client connections
//! wait on a oneshot for their reply. The eviction sweep runs on the same
//! loop, so no state is ever touched from two tasks.

use std::time::Duration;

use corelib::WorkerAddress;
use protocol::{Connection, Heartbeat, HeartbeatAck, ProtocolError, Request, Response, WorkerHello};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::dispatch::Router;
use crate::links::WorkerLink;
use crate::registry::WORKER_TIMEOUT;

/// Cadence of the eviction sweep (one heartbeat interval).
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Fatal router failures. Everything after startup is handled in-loop.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("failed to bind {channel} channel: {source}")]
    Bind {
        channel: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Addresses and timings for one router instance.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub client_addr: String,
    pub worker_addr: String,
    pub heartbeat_addr: String,
    pub worker_timeout: Duration,
    pub sweep_interval: Duration,
}

impl RouterConfig {
    pub fn new(client_port: u16, worker_port: u16, heartbeat_port: u16) -> Self {
        Self {
            client_addr: format!("0.0.0.0:{client_port}"),
            worker_addr: format!("0.0.0.0:{worker_port}"),
            heartbeat_addr: format!("0.0.0.0:{heartbeat_port}"),
            worker_timeout: WORKER_TIMEOUT,
            sweep_interval: SWEEP_INTERVAL,
        }
    }
}

/// What acceptor tasks post to the event loop.
enum Event {
    /// A client request awaiting a reply.
    Client {
        client_id: String,
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    /// A worker identified itself on the worker channel.
    WorkerConnected(WorkerLink),
    /// A liveness frame arrived on the heartbeat channel.
    Heartbeat(WorkerAddress),
}

/// Run a router until the stop flag flips.
pub async fn run(config: RouterConfig, mut shutdown: watch::Receiver<bool>) -> Result<(), RouterError> {
    let client_listener = bind("client", &config.client_addr).await?;
    let worker_listener = bind("worker", &config.worker_addr).await?;
    let heartbeat_listener = bind("heartbeat", &config.heartbeat_addr).await?;
    info!(
        client = %config.client_addr,
        worker = %config.worker_addr,
        heartbeat = %config.heartbeat_addr,
        "router listening"
    );

    let (events, mut inbox) = mpsc::channel::<Event>(256);
    let acceptors = [
        tokio::spawn(accept_clients(client_listener, events.clone(), shutdown.clone())),
        tokio::spawn(accept_workers(worker_listener, events.clone(), shutdown.clone())),
        tokio::spawn(accept_heartbeats(heartbeat_listener, events.clone(), shutdown.clone())),
    ];
    drop(events);

    let mut router = Router::new(config.worker_timeout);
    let mut sweep = tokio::time::interval(config.sweep_interval);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = inbox.recv() => match event {
                Some(event) => handle_event(&mut router, event).await,
                None => break,
            },
            _ = sweep.tick() => router.sweep().await,
            _ = shutdown.changed() => break,
        }
    }

    for acceptor in acceptors {
        acceptor.abort();
    }
    info!("router shut down");
    Ok(())
}

async fn bind(channel: &'static str, addr: &str) -> Result<TcpListener, RouterError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| RouterError::Bind { channel, source })
}

async fn handle_event(router: &mut Router, event: Event) {
    match event {
        Event::Client {
            client_id,
            request,
            reply,
        } => match request {
            request @ Request::CreateList { .. } => {
                let (response, fan_out) = router.handle_create(&client_id, request).await;
                // The client gets its ack before replicas are written.
                let _ = reply.send(response);
                if let Some(plan) = fan_out {
                    router.fan_out_create(plan).await;
                }
            }
            request @ Request::DeleteList { .. } => {
                let _ = reply.send(router.handle_delete(&client_id, request).await);
            }
            request @ (Request::GetList { .. } | Request::CheckList { .. }) => {
                let _ = reply.send(router.handle_read(&client_id, request).await);
            }
            other => {
                debug!(?other, "refusing unsupported client action");
                let _ = reply.send(Response::error("unsupported action"));
            }
        },
        Event::WorkerConnected(link) => {
            info!(worker = %link.address(), "worker channel connected");
            router.links_mut().insert(link);
        }
        Event::Heartbeat(worker) => router.handle_heartbeat(worker).await,
    }
}

/// Accept client connections; each serves requests until the peer hangs
/// up.
async fn accept_clients(
    listener: TcpListener,
    events: mpsc::Sender<Event>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connected: u64 = 0;
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.changed() => return,
        };
        match accepted {
            Ok((stream, peer)) => {
                connected += 1;
                let client_id = format!("client-{connected}");
                debug!(%peer, %client_id, "client connected");
                tokio::spawn(serve_client(stream, client_id, events.clone()));
            }
            Err(err) => warn!(%err, "client accept failed"),
        }
    }
}

async fn serve_client(stream: TcpStream, client_id: String, events: mpsc::Sender<Event>) {
    let mut conn = Connection::from_stream(stream);
    loop {
        let request: Request = match conn.next().await {
            Ok(request) => request,
            Err(ProtocolError::Closed) => return,
            Err(err @ ProtocolError::Codec(_)) => {
                // The frame layer is still aligned; answer and carry on.
                warn!(%client_id, %err, "malformed client request");
                if conn.send(&Response::error("malformed request")).await.is_err() {
                    return;
                }
                continue;
            }
            Err(err) => {
                warn!(%client_id, %err, "client connection failed");
                return;
            }
        };

        let (reply, pending) = oneshot::channel();
        let event = Event::Client {
            client_id: client_id.clone(),
            request,
            reply,
        };
        if events.send(event).await.is_err() {
            return;
        }
        match pending.await {
            Ok(response) => {
                if conn.send(&response).await.is_err() {
                    return;
                }
            }
            Err(_) => return,
        }
    }
}

/// Accept worker-channel connections. A worker's first frame names it;
/// the identified connection becomes a link owned by the event loop.
async fn accept_workers(
    listener: TcpListener,
    events: mpsc::Sender<Event>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.changed() => return,
        };
        match accepted {
            Ok((stream, peer)) => {
                let events = events.clone();
                tokio::spawn(async move {
                    let mut conn = Connection::from_stream(stream);
                    match conn.recv::<WorkerHello>().await {
                        Ok(hello) => {
                            let link = WorkerLink::new(hello.worker_address, conn);
                            let _ = events.send(Event::WorkerConnected(link)).await;
                        }
                        Err(err) => {
                            warn!(%peer, %err, "worker connection did not identify itself");
                        }
                    }
                });
            }
            Err(err) => warn!(%err, "worker accept failed"),
        }
    }
}

/// Accept heartbeat connections; acks are written by the connection task
/// so a slow sweep never stalls a worker.
async fn accept_heartbeats(
    listener: TcpListener,
    events: mpsc::Sender<Event>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.changed() => return,
        };
        match accepted {
            Ok((stream, _)) => {
                let events = events.clone();
                tokio::spawn(async move {
                    let mut conn = Connection::from_stream(stream);
                    loop {
                        let beat: Heartbeat = match conn.next().await {
                            Ok(beat) => beat,
                            Err(_) => return,
                        };
                        if events.send(Event::Heartbeat(beat.worker_address)).await.is_err() {
                            return;
                        }
                        if conn.send(&HeartbeatAck::ack()).await.is_err() {
                            return;
                        }
                    }
                });
            }
            Err(err) => warn!(%err, "heartbeat accept failed"),
        }
    }
}
