//! Worker liveness registry.
//!
//! Soft state fed by heartbeats: a worker is live while its last
//! heartbeat is within the eviction timeout. The registry is owned by the
//! router event loop, so no locking is involved; eviction happens in the
//! periodic sweep.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use corelib::WorkerAddress;
use tracing::info;

/// Workers unseen for this long are evicted (2x the heartbeat interval).
pub const WORKER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct WorkerRegistry {
    timeout: Duration,
    last_seen: HashMap<WorkerAddress, Instant>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::with_timeout(WORKER_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            last_seen: HashMap::new(),
        }
    }

    /// Refresh a worker's `last_seen`; true when the worker is new.
    pub fn register(&mut self, worker: &WorkerAddress) -> bool {
        let is_new = self
            .last_seen
            .insert(worker.clone(), Instant::now())
            .is_none();
        if is_new {
            info!(%worker, "registered new worker");
        }
        is_new
    }

    pub fn remove(&mut self, worker: &WorkerAddress) {
        if self.last_seen.remove(worker).is_some() {
            info!(%worker, "removed worker");
        }
    }

    /// Workers seen within the timeout.
    pub fn active(&self) -> Vec<WorkerAddress> {
        let now = Instant::now();
        self.last_seen
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) <= self.timeout)
            .map(|(worker, _)| worker.clone())
            .collect()
    }

    /// Known workers whose heartbeat has lapsed.
    pub fn inactive(&self) -> Vec<WorkerAddress> {
        let now = Instant::now();
        self.last_seen
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) > self.timeout)
            .map(|(worker, _)| worker.clone())
            .collect()
    }

    pub fn contains(&self, worker: &WorkerAddress) -> bool {
        self.last_seen.contains_key(worker)
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(port: u16) -> WorkerAddress {
        WorkerAddress::new(format!("127.0.0.1:{port}"))
    }

    #[test]
    fn first_heartbeat_is_new_refresh_is_not() {
        let mut registry = WorkerRegistry::new();
        assert!(registry.register(&worker(6000)));
        assert!(!registry.register(&worker(6000)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_workers_become_inactive_but_stay_known() {
        let mut registry = WorkerRegistry::with_timeout(Duration::from_millis(10));
        registry.register(&worker(6000));
        std::thread::sleep(Duration::from_millis(25));
        registry.register(&worker(6001));

        assert_eq!(registry.active(), vec![worker(6001)]);
        assert_eq!(registry.inactive(), vec![worker(6000)]);
        assert!(registry.contains(&worker(6000)));
    }

    #[test]
    fn refresh_revives_a_stale_worker() {
        let mut registry = WorkerRegistry::with_timeout(Duration::from_millis(10));
        registry.register(&worker(6000));
        std::thread::sleep(Duration::from_millis(25));
        assert!(registry.active().is_empty());

        // A late heartbeat before the sweep runs keeps the worker alive.
        assert!(!registry.register(&worker(6000)));
        assert_eq!(registry.active(), vec![worker(6000)]);
    }

    #[test]
    fn remove_forgets_the_worker() {
        let mut registry = WorkerRegistry::new();
        registry.register(&worker(6000));
        registry.remove(&worker(6000));
        assert!(registry.is_empty());
        // The next heartbeat counts as a fresh join.
        assert!(registry.register(&worker(6000)));
    }
}
