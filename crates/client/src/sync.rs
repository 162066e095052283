//! Sync engine.
//!
//! A cooperative loop that replays unsynced rows against the router, in
//! order, one request at a time. One outstanding RPC per key is
//! structural: a single pass walks the log and never parallelizes.
//!
//! Failures bump the row's retry counter and back the pass off; a row
//! that spends its whole budget is poisoned. Any success in a pass
//! revives the poisoned rows, so only sustained failure retires a row.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use protocol::{Connection, ProtocolError, Request, Response};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::store::{LocalStore, PendingList, MAX_RETRIES};

/// How often a pass runs.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(5);

/// Backoff ladder, indexed by retry count (clamped to the last rung).
pub const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(30),
    Duration::from_secs(60),
];

/// The router as the sync engine sees it: send one request, get one
/// response, and be told when to start over on a fresh transport.
#[async_trait]
pub trait RouterTransport: Send {
    async fn call(&mut self, request: &Request) -> Result<Response, ProtocolError>;

    /// Discard connection state after a transport-level failure.
    async fn reopen(&mut self);
}

/// TCP transport to the router's client channel, dialed lazily and
/// re-dialed after [`RouterTransport::reopen`].
pub struct TcpRouterTransport {
    addr: String,
    conn: Option<Connection>,
}

impl TcpRouterTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn: None,
        }
    }
}

#[async_trait]
impl RouterTransport for TcpRouterTransport {
    async fn call(&mut self, request: &Request) -> Result<Response, ProtocolError> {
        if self.conn.is_none() {
            self.conn = Some(Connection::connect(&self.addr).await?);
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(ProtocolError::Closed);
        };
        match conn.call(request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                self.conn = None;
                Err(err)
            }
        }
    }

    async fn reopen(&mut self) {
        self.conn = None;
    }
}

/// Outcome of one pass, for logs and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    pub poisoned: usize,
}

/// The background sync task.
pub struct SyncEngine<T: RouterTransport> {
    store: Arc<LocalStore>,
    transport: T,
    interval: Duration,
    delays: [Duration; 3],
}

impl<T: RouterTransport> SyncEngine<T> {
    pub fn new(store: Arc<LocalStore>, transport: T) -> Self {
        Self {
            store,
            transport,
            interval: SYNC_INTERVAL,
            delays: RETRY_DELAYS,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_delays(mut self, delays: [Duration; 3]) -> Self {
        self.delays = delays;
        self
    }

    /// Run passes until the stop flag flips. The current pass drains
    /// before the task exits.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("sync task started");
        loop {
            if let Err(err) = self.sync_pass().await {
                warn!(%err, "sync pass failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }
        info!("sync task stopped");
    }

    /// One pass over the unsynced rows, oldest first.
    pub async fn sync_pass(&mut self) -> Result<SyncReport, ClientError> {
        let mut report = SyncReport::default();
        for row in self.store.unsynced() {
            if row.retry_count >= MAX_RETRIES {
                self.store.poison(&row.key)?;
                report.poisoned += 1;
                continue;
            }

            report.attempted += 1;
            let request = build_request(&row);
            match self.transport.call(&request).await {
                Ok(response) if response.is_success() => {
                    debug!(key = %row.key, "synced");
                    self.store.mark_synced(&row.key)?;
                    report.synced += 1;
                }
                Ok(response) => {
                    warn!(key = %row.key, ?response.message, "server rejected sync");
                    report.failed += 1;
                    self.store.bump_retry(&row.key)?;
                    tokio::time::sleep(self.delay_for(row.retry_count)).await;
                }
                Err(err) => {
                    warn!(key = %row.key, %err, "sync transport failed");
                    report.failed += 1;
                    self.store.bump_retry(&row.key)?;
                    tokio::time::sleep(self.delay_for(row.retry_count)).await;
                    self.transport.reopen().await;
                }
            }
        }

        if report.synced > 0 {
            let revived = self.store.reset_poisoned()?;
            if revived > 0 {
                info!(revived, "revived poisoned rows after successful sync");
            }
        }
        Ok(report)
    }

    fn delay_for(&self, retry_count: u32) -> Duration {
        let index = (retry_count as usize).min(self.delays.len() - 1);
        self.delays[index]
    }
}

/// The request a row owes the server.
fn build_request(row: &PendingList) -> Request {
    if row.deleted {
        Request::DeleteList {
            list_url: row.key.clone(),
        }
    } else {
        Request::CreateList {
            url: row.key.clone(),
            name: row.name.clone(),
            creator: row.creator.clone(),
            is_replica: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::ListKey;
    use std::collections::VecDeque;

    /// Scripted transport: pops one outcome per call.
    struct ScriptedTransport {
        script: VecDeque<Result<Response, ProtocolError>>,
        calls: Vec<Request>,
        reopens: usize,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<Response, ProtocolError>>) -> Self {
            Self {
                script: script.into(),
                calls: Vec::new(),
                reopens: 0,
            }
        }
    }

    #[async_trait]
    impl RouterTransport for ScriptedTransport {
        async fn call(&mut self, request: &Request) -> Result<Response, ProtocolError> {
            self.calls.push(request.clone());
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(ProtocolError::Closed))
        }

        async fn reopen(&mut self) {
            self.reopens += 1;
        }
    }

    fn timeout() -> ProtocolError {
        ProtocolError::Timeout(Duration::from_secs(5))
    }

    fn store(dir: &tempfile::TempDir) -> Arc<LocalStore> {
        Arc::new(LocalStore::open(dir.path().join("client.db")).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn successful_pass_marks_rows_synced() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.create("groceries", "carol").unwrap();
        store.create("hardware", "dave").unwrap();

        let transport =
            ScriptedTransport::new(vec![Ok(Response::success()), Ok(Response::success())]);
        let mut engine = SyncEngine::new(Arc::clone(&store), transport);

        let report = engine.sync_pass().await.unwrap();
        assert_eq!(report.synced, 2);
        assert!(store.unsynced().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_rows_send_delete_requests() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let row = store.create("groceries", "carol").unwrap();
        store.mark_synced(&row.key).unwrap();
        store.delete(&row.key).unwrap();

        let transport = ScriptedTransport::new(vec![Ok(Response::success().with_had_list(true))]);
        let mut engine = SyncEngine::new(Arc::clone(&store), transport);
        engine.sync_pass().await.unwrap();

        assert!(matches!(
            engine.transport.calls[0],
            Request::DeleteList { .. }
        ));
        assert!(store.unsynced().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_bumps_retry_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let row = store.create("groceries", "carol").unwrap();

        let transport = ScriptedTransport::new(vec![Err(timeout())]);
        let mut engine = SyncEngine::new(Arc::clone(&store), transport);

        let report = engine.sync_pass().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(engine.transport.reopens, 1);
        assert_eq!(store.get(&row.key).unwrap().retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn row_poisons_after_the_retry_budget() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let row = store.create("groceries", "carol").unwrap();

        let mut engine = SyncEngine::new(
            Arc::clone(&store),
            ScriptedTransport::new(vec![Err(timeout()), Err(timeout()), Err(timeout())]),
        );
        for _ in 0..3 {
            engine.sync_pass().await.unwrap();
        }
        // Budget spent; the next pass poisons instead of attempting.
        let report = engine.sync_pass().await.unwrap();
        assert_eq!(report.poisoned, 1);
        assert_eq!(report.attempted, 0);
        assert!(store.get(&row.key).unwrap().synced);
        assert!(store.unsynced().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn success_elsewhere_revives_poisoned_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let stuck = store.create("groceries", "carol").unwrap();

        // Poison the first row.
        let mut engine = SyncEngine::new(
            Arc::clone(&store),
            ScriptedTransport::new(vec![Err(timeout()), Err(timeout()), Err(timeout())]),
        );
        for _ in 0..4 {
            engine.sync_pass().await.unwrap();
        }
        assert!(store.get(&stuck.key).unwrap().synced);

        // A new row syncs; the poisoned row must come back unsynced
        // with a clean retry counter.
        store.create("hardware", "dave").unwrap();
        let mut engine = SyncEngine::new(
            Arc::clone(&store),
            ScriptedTransport::new(vec![Ok(Response::success())]),
        );
        engine.sync_pass().await.unwrap();

        let revived = store.get(&stuck.key).unwrap();
        assert!(!revived.synced);
        assert_eq!(revived.retry_count, 0);
        assert_eq!(store.unsynced().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pass_iterates_rows_in_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let first = store.create("one", "carol").unwrap();
        // Wall-clock sleep: `last_modified` comes from SystemTime, which
        // a paused tokio clock does not advance.
        std::thread::sleep(Duration::from_millis(5));
        let second = store.create("two", "carol").unwrap();

        let transport =
            ScriptedTransport::new(vec![Ok(Response::success()), Ok(Response::success())]);
        let mut engine = SyncEngine::new(Arc::clone(&store), transport);
        engine.sync_pass().await.unwrap();

        let keys: Vec<ListKey> = engine
            .transport
            .calls
            .iter()
            .filter_map(|request| request.key().cloned())
            .collect();
        assert_eq!(keys, vec![first.key, second.key]);
    }
}
