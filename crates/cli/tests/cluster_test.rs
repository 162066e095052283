//! End-to-end cluster tests over loopback TCP.
//!
//! Each test stands up a real router and real workers on ephemeral ports
//! with shortened heartbeat/sweep intervals, then drives them through the
//! client channel exactly as a client process would.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use client::{LocalStore, SyncEngine, TcpRouterTransport};
use corelib::ListKey;
use protocol::{Connection, Request, Response};
use router::RouterConfig;
use tokio::sync::watch;
use worker::WorkerConfig;

/// Outer deadline for anything that converges asynchronously.
const DEADLINE: Duration = Duration::from_secs(15);
const POLL: Duration = Duration::from_millis(100);

const HEARTBEAT: Duration = Duration::from_millis(200);
const SWEEP: Duration = Duration::from_millis(300);
const EVICT_AFTER: Duration = Duration::from_millis(1200);

struct TestRouter {
    config: RouterConfig,
    client_addr: String,
    stop: watch::Sender<bool>,
}

impl TestRouter {
    async fn start() -> Self {
        let client_port = free_port();
        let worker_port = free_port();
        let heartbeat_port = free_port();
        let mut config = RouterConfig::new(client_port, worker_port, heartbeat_port);
        config.worker_timeout = EVICT_AFTER;
        config.sweep_interval = SWEEP;

        let (stop, shutdown) = watch::channel(false);
        let run_config = config.clone();
        tokio::spawn(async move {
            router::run(run_config, shutdown).await.expect("router run");
        });

        let this = Self {
            config,
            client_addr: format!("127.0.0.1:{client_port}"),
            stop,
        };
        // Wait until the client channel accepts connections.
        wait_for(|| async {
            Connection::connect(&this.client_addr).await.ok().map(|_| ())
        })
        .await;
        this
    }

    fn worker_config(&self, port: u16, db_path: PathBuf) -> WorkerConfig {
        let router_port: u16 = self.config.worker_addr.rsplit(':').next().unwrap().parse().unwrap();
        let heartbeat_port: u16 =
            self.config.heartbeat_addr.rsplit(':').next().unwrap().parse().unwrap();
        let mut config = WorkerConfig::new(port, "127.0.0.1", router_port, heartbeat_port);
        config.db_path = db_path;
        config.heartbeat_interval = HEARTBEAT;
        config
    }

    fn start_worker(&self, config: WorkerConfig) -> watch::Sender<bool> {
        let (stop, shutdown) = watch::channel(false);
        tokio::spawn(async move {
            worker::service::run(config, shutdown).await.expect("worker run");
        });
        stop
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Worker identity ports: below the ephemeral range and spread out so
/// `port + 1000` is free too.
fn worker_port(offset: u16) -> u16 {
    17000 + offset * 1500 + (std::process::id() % 500) as u16
}

async fn wait_for<F, Fut, T>(mut probe: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + DEADLINE;
    loop {
        if let Some(value) = probe().await {
            return value;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {DEADLINE:?}"
        );
        tokio::time::sleep(POLL).await;
    }
}

/// One request/response against an address, on a fresh connection.
async fn call(addr: &str, request: &Request) -> Option<Response> {
    let mut conn = Connection::connect(addr).await.ok()?;
    conn.call(request).await.ok()
}

fn create_request(key: &ListKey, name: &str) -> Request {
    Request::CreateList {
        url: key.clone(),
        name: name.to_owned(),
        creator: "carol".to_owned(),
        is_replica: false,
    }
}

/// Retry a create until the cluster has a registered worker to place it
/// on.
async fn create_until_placed(client_addr: &str, key: &ListKey, name: &str) -> Response {
    let request = create_request(key, name);
    wait_for(|| {
        let request = request.clone();
        async move {
            match call(client_addr, &request).await {
                Some(response) if response.is_success() => Some(response),
                _ => None,
            }
        }
    })
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn create_then_read_on_a_single_worker() {
    let router = TestRouter::start().await;
    let dir = tempfile::tempdir().unwrap();
    let _worker = router.start_worker(
        router.worker_config(worker_port(0), dir.path().join("a.db")),
    );

    let key = ListKey::generate();
    let created = create_until_placed(&router.client_addr, &key, "groceries").await;
    assert_eq!(created.list.as_ref().unwrap().name, "groceries");

    let read = call(&router.client_addr, &Request::GetList { url: key.clone() })
        .await
        .unwrap();
    assert!(read.is_success(), "read failed: {read:?}");
    let list = read.list.unwrap();
    assert_eq!(list.url, key);
    assert_eq!(list.creator, "carol");

    let _ = router.stop.send(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tombstone_is_terminal() {
    let router = TestRouter::start().await;
    let dir = tempfile::tempdir().unwrap();
    let _worker = router.start_worker(
        router.worker_config(worker_port(1), dir.path().join("a.db")),
    );

    let key = ListKey::generate();
    create_until_placed(&router.client_addr, &key, "party").await;

    let deleted = call(&router.client_addr, &Request::DeleteList { list_url: key.clone() })
        .await
        .unwrap();
    assert!(deleted.is_success(), "delete failed: {deleted:?}");
    assert_eq!(deleted.had_list, Some(true));

    // Recreating the same key must be refused, not placed again.
    let recreated = call(&router.client_addr, &create_request(&key, "party"))
        .await
        .unwrap();
    assert!(!recreated.is_success());

    // And the key stays unreadable.
    let read = call(&router.client_addr, &Request::GetList { url: key.clone() })
        .await
        .unwrap();
    assert!(!read.is_success());

    let _ = router.stop.send(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn joining_worker_receives_existing_keys() {
    let router = TestRouter::start().await;
    let dir = tempfile::tempdir().unwrap();
    let _worker_a = router.start_worker(
        router.worker_config(worker_port(2), dir.path().join("a.db")),
    );

    let key = ListKey::generate();
    create_until_placed(&router.client_addr, &key, "groceries").await;

    // Start a second worker; the join rebalance should hand it a copy,
    // observable through its own replication channel.
    let b_port = worker_port(3);
    let _worker_b = router.start_worker(
        router.worker_config(b_port, dir.path().join("b.db")),
    );
    let b_replication = format!("127.0.0.1:{}", b_port + 1000);

    wait_for(|| {
        let addr = b_replication.clone();
        let key = key.clone();
        async move {
            let response = call(&addr, &Request::CheckList { list_url: key }).await?;
            (response.exists == Some(true) && response.active == Some(true)).then_some(())
        }
    })
    .await;

    let _ = router.stop.send(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reads_fail_over_when_the_primary_dies() {
    let router = TestRouter::start().await;
    let dir = tempfile::tempdir().unwrap();
    let a_port = worker_port(4);
    let b_port = worker_port(5);
    let worker_a = router.start_worker(
        router.worker_config(a_port, dir.path().join("a.db")),
    );
    let _worker_b = router.start_worker(
        router.worker_config(b_port, dir.path().join("b.db")),
    );

    let key = ListKey::generate();
    create_until_placed(&router.client_addr, &key, "groceries").await;

    // Wait until both workers hold the key (write fan-out or join
    // rebalance, whichever placement chose).
    for port in [a_port, b_port] {
        let replication = format!("127.0.0.1:{}", port + 1000);
        wait_for(|| {
            let addr = replication.clone();
            let key = key.clone();
            async move {
                let response = call(&addr, &Request::CheckList { list_url: key }).await?;
                (response.exists == Some(true)).then_some(())
            }
        })
        .await;
    }

    // Kill A; after eviction the read must come from B.
    let _ = worker_a.send(true);
    wait_for(|| {
        let addr = router.client_addr.clone();
        let key = key.clone();
        async move {
            let response = call(&addr, &Request::GetList { url: key }).await?;
            response.is_success().then_some(())
        }
    })
    .await;

    let _ = router.stop.send(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn client_log_syncs_after_the_router_comes_back() {
    // The router is not up yet: the first pass fails and bumps retries.
    let client_port = free_port();
    let client_addr = format!("127.0.0.1:{client_port}");

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStore::open(dir.path().join("client.db")).unwrap());
    let first = store.create("groceries", "carol").unwrap();
    let second = store.create("hardware", "dave").unwrap();

    let short = Duration::from_millis(50);
    let mut engine = SyncEngine::new(
        Arc::clone(&store),
        TcpRouterTransport::new(client_addr.clone()),
    )
    .with_delays([short, short, short]);
    let report = engine.sync_pass().await.unwrap();
    assert_eq!(report.synced, 0);
    assert!(store.get(&first.key).unwrap().retry_count >= 1);

    // Bring the cluster up on the port the client is already using.
    let worker_port_base = worker_port(6);
    let mut config = RouterConfig::new(client_port, free_port(), free_port());
    config.worker_timeout = EVICT_AFTER;
    config.sweep_interval = SWEEP;
    let (router_stop, shutdown) = watch::channel(false);
    let run_config = config.clone();
    tokio::spawn(async move {
        router::run(run_config, shutdown).await.expect("router run");
    });

    let router_port: u16 = config.worker_addr.rsplit(':').next().unwrap().parse().unwrap();
    let heartbeat_port: u16 = config.heartbeat_addr.rsplit(':').next().unwrap().parse().unwrap();
    let mut worker_config =
        WorkerConfig::new(worker_port_base, "127.0.0.1", router_port, heartbeat_port);
    worker_config.db_path = dir.path().join("worker.db");
    worker_config.heartbeat_interval = HEARTBEAT;
    let (_worker_stop, worker_shutdown) = watch::channel(false);
    tokio::spawn(async move {
        worker::service::run(worker_config, worker_shutdown)
            .await
            .expect("worker run");
    });

    // Hold the passes until the cluster can actually place keys, so the
    // pending rows do not burn their whole retry budget on startup.
    create_until_placed(&client_addr, &ListKey::generate(), "probe").await;

    // Within a few passes both rows settle.
    let deadline = tokio::time::Instant::now() + DEADLINE;
    while !store.unsynced().is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "rows did not sync in time: {:?}",
            store.unsynced()
        );
        let _ = engine.sync_pass().await.unwrap();
        tokio::time::sleep(POLL).await;
    }
    assert!(store.get(&first.key).unwrap().synced);
    assert!(store.get(&second.key).unwrap().synced);

    // And the data really is on the cluster.
    let read = wait_for(|| {
        let addr = client_addr.clone();
        let key = first.key.clone();
        async move { call(&addr, &Request::GetList { url: key }).await }
    })
    .await;
    assert!(read.is_success());

    let _ = router_stop.send(true);
}
