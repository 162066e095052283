//! CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;
use tokio::sync::watch;
use tracing::info;

use client::{DeleteOutcome, LocalStore, SyncEngine, TcpRouterTransport};
use corelib::ListKey;
use router::RouterConfig;
use worker::WorkerConfig;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the router: client, worker, and heartbeat channels.
    Router {
        #[arg(long, default_value_t = 5555)]
        client_port: u16,
        #[arg(long, default_value_t = 5556)]
        worker_port: u16,
        #[arg(long, default_value_t = 5557)]
        heartbeat_port: u16,
    },
    /// Run a worker; its replication channel binds at `port + 1000`.
    Worker {
        #[arg(long)]
        port: u16,
        #[arg(long, default_value = "127.0.0.1")]
        router_host: String,
        #[arg(long, default_value_t = 5556)]
        router_port: u16,
        #[arg(long, default_value_t = 5557)]
        heartbeat_port: u16,
        /// Store path (defaults to `worker_<port>.db`).
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Operate on the local pending log and sync it to the router.
    Client {
        #[arg(long, default_value = "127.0.0.1:5555")]
        router: String,
        #[arg(long, default_value = "client.db")]
        db: PathBuf,
        #[command(subcommand)]
        action: ClientAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ClientAction {
    /// Record a new list locally.
    Create { name: String, creator: String },
    /// Mark a list deleted locally.
    Delete { url: String },
    /// Print the live lists.
    Lists,
    /// Print rows still waiting to sync.
    Status,
    /// Run the sync task until interrupted.
    Sync,
}

impl Command {
    pub async fn run(self) -> anyhow::Result<()> {
        match self {
            Command::Router {
                client_port,
                worker_port,
                heartbeat_port,
            } => {
                let config = RouterConfig::new(client_port, worker_port, heartbeat_port);
                router::run(config, shutdown_on_ctrl_c()).await?;
                Ok(())
            }
            Command::Worker {
                port,
                router_host,
                router_port,
                heartbeat_port,
                db,
            } => {
                let mut config = WorkerConfig::new(port, &router_host, router_port, heartbeat_port);
                if let Some(db) = db {
                    config.db_path = db;
                }
                worker::service::run(config, shutdown_on_ctrl_c()).await?;
                Ok(())
            }
            Command::Client { router, db, action } => run_client(router, db, action).await,
        }
    }
}

/// A stop flag flipped by Ctrl-C, observed by every service loop.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
        }
        let _ = tx.send(true);
    });
    rx
}

async fn run_client(router: String, db: PathBuf, action: ClientAction) -> anyhow::Result<()> {
    let store = Arc::new(LocalStore::open(&db)?);
    match action {
        ClientAction::Create { name, creator } => {
            let row = store.create(&name, &creator)?;
            println!("Created list \"{}\" with key {}", row.name, row.key);
            println!("It will reach the server on the next sync run.");
        }
        ClientAction::Delete { url } => {
            match store.delete(&ListKey::new(url))? {
                DeleteOutcome::Queued => println!("List deleted; removal will sync to the server."),
                DeleteOutcome::LocalOnly => println!("List deleted (it never reached the server)."),
                DeleteOutcome::AlreadyDeleted => println!("List was already deleted."),
            };
        }
        ClientAction::Lists => {
            let rows = store.lists();
            if rows.is_empty() {
                println!("No lists.");
            }
            for row in rows {
                let state = if row.synced {
                    "synced".to_owned()
                } else {
                    format!("not synced, retries: {}", row.retry_count)
                };
                println!("{}  {} by {} ({state})", row.key, row.name, row.creator);
            }
        }
        ClientAction::Status => {
            let pending = store.unsynced();
            if pending.is_empty() {
                println!("All lists are synced.");
            }
            for row in pending {
                let kind = if row.deleted { "delete" } else { "create" };
                println!("{}  pending {kind} (retries: {})", row.key, row.retry_count);
            }
        }
        ClientAction::Sync => {
            let engine = SyncEngine::new(Arc::clone(&store), TcpRouterTransport::new(router));
            engine.run(shutdown_on_ctrl_c()).await;
        }
    }
    Ok(())
}
