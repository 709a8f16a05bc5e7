//! The background metadata-sync worker.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, warn};

use crate::registry::{SyncWait, TreeRegistry};

/// Owns the background thread that drains the registry's metadata buffers
/// into the durable catalog.
///
/// The thread wakes whenever the registry signals pending rescue points, or
/// after `poll_interval` at the latest, and performs a final drain on
/// shutdown. A failed sync is logged and retried on the next wakeup; the
/// registry keeps its buffers until the catalog accepts them.
#[derive(Debug)]
pub struct SyncWorker {
    registry: Arc<TreeRegistry>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    /// Spawn the sync thread.
    pub fn spawn(registry: Arc<TreeRegistry>, poll_interval: Duration) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_registry = Arc::clone(&registry);
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("metadata-sync".to_string())
            .spawn(move || run(&thread_registry, &thread_shutdown, poll_interval))
            .expect("failed to spawn metadata-sync thread");

        Self {
            registry,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stop the worker, draining outstanding metadata first.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::Relaxed);
        self.registry.poke_sync_waiter();
        if handle.join().is_err() {
            warn!("metadata-sync thread panicked");
        }
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

fn run(registry: &TreeRegistry, shutdown: &AtomicBool, poll_interval: Duration) {
    debug!("metadata-sync thread started");
    while !shutdown.load(Ordering::Relaxed) {
        match registry.wait_for_sync_request(poll_interval) {
            SyncWait::Retry => continue,
            // Sync on timeout as well: a notification sent before this
            // iteration started waiting would otherwise be lost.
            SyncWait::Ready | SyncWait::TimedOut => {
                if let Err(error) = registry.sync_with_metadata_storage() {
                    warn!(%error, "metadata sync failed; buffers retained for retry");
                }
            }
        }
    }

    // Final drain so a clean shutdown leaves nothing buffered.
    if let Err(error) = registry.sync_with_metadata_storage() {
        warn!(%error, "final metadata sync failed");
    }
    debug!("metadata-sync thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryConfig;
    use block_store::InMemory;
    use catalog::{Catalog, MemCatalog};
    use data_types::LogicAddr;
    use std::time::Instant;

    #[test]
    fn worker_drains_published_rescue_points() {
        let metadata = Arc::new(MemCatalog::new());
        let registry = Arc::new(TreeRegistry::new(
            Arc::new(InMemory::new()),
            Arc::clone(&metadata) as _,
            RegistryConfig::default(),
        ));
        let worker = SyncWorker::spawn(Arc::clone(&registry), Duration::from_millis(50));

        let id = registry.init_series_id("cpu host=a");
        registry.update_rescue_points(id, vec![LogicAddr::new(0xaa)]);

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if metadata.rescue_points(id).unwrap() == Some(vec![LogicAddr::new(0xaa)]) {
                break;
            }
            assert!(Instant::now() < deadline, "sync worker never drained");
            thread::sleep(Duration::from_millis(5));
        }

        worker.shutdown();
        assert_eq!(metadata.series_names().unwrap().len(), 1);
    }

    #[test]
    fn shutdown_performs_a_final_drain() {
        let metadata = Arc::new(MemCatalog::new());
        let registry = Arc::new(TreeRegistry::new(
            Arc::new(InMemory::new()),
            Arc::clone(&metadata) as _,
            RegistryConfig::default(),
        ));
        // A long poll interval: the worker must be woken by shutdown, not
        // by the timer.
        let worker = SyncWorker::spawn(Arc::clone(&registry), Duration::from_secs(60));

        let id = registry.init_series_id("mem host=b");
        registry.update_rescue_points(id, vec![LogicAddr::new(0xbb)]);
        worker.shutdown();

        assert_eq!(
            metadata.rescue_points(id).unwrap(),
            Some(vec![LogicAddr::new(0xbb)])
        );
    }
}
