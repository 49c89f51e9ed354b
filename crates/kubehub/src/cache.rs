//! Process-wide discovery cache with wholesale, serialized refresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use kmcp_core::Result;
use metrics::counter;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::discovery::{DiscoveredResource, DiscoverySource};
use crate::index::DiscoveryIndex;

/// One immutable discovery result and the epoch it was installed in.
#[derive(Debug)]
pub struct Snapshot {
    pub epoch: u64,
    pub index: DiscoveryIndex,
    pub taken_at: Instant,
}

/// Read-mostly cache of the cluster's resource types.
///
/// Readers never block: they load the current snapshot. Refreshes are serialized, and a
/// caller that queued behind an in-flight refresh reuses its result instead of issuing a
/// second discovery round.
pub struct DiscoveryCache {
    source: Arc<dyn DiscoverySource>,
    current: ArcSwapOption<Snapshot>,
    next_epoch: AtomicU64,
    refresh_lock: Mutex<()>,
}

impl DiscoveryCache {
    pub fn new(source: Arc<dyn DiscoverySource>) -> Self {
        Self {
            source,
            current: ArcSwapOption::empty(),
            next_epoch: AtomicU64::new(1),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Epoch of the installed snapshot; 0 when empty.
    pub fn epoch(&self) -> u64 {
        self.current.load_full().map(|s| s.epoch).unwrap_or(0)
    }

    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }

    /// Look up an identifier in the installed snapshot without touching the network.
    pub fn get(&self, identifier: &str) -> Option<DiscoveredResource> {
        self.current.load_full().and_then(|s| s.index.lookup(identifier).cloned())
    }

    /// Installed snapshot, populating the cache on first use.
    pub async fn snapshot(&self) -> Result<Arc<Snapshot>> {
        match self.current.load_full() {
            Some(s) => Ok(s),
            None => self.refresh_after(0).await,
        }
    }

    /// Replace the snapshot with a fresh discovery round.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>> {
        self.refresh_after(self.epoch()).await
    }

    /// Refresh unless someone installed a snapshot newer than `seen` while we waited.
    pub async fn refresh_after(&self, seen: u64) -> Result<Arc<Snapshot>> {
        let _guard = self.refresh_lock.lock().await;
        if let Some(cur) = self.current.load_full() {
            if cur.epoch > seen {
                debug!(epoch = cur.epoch, seen, "discovery: reusing concurrent refresh");
                return Ok(cur);
            }
        }
        let discovered = self.source.discover().await?;
        let index = DiscoveryIndex::build(discovered);
        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst);
        info!(epoch, resources = index.len(), failed = index.failed_group_versions().len(), "discovery: cache refreshed");
        counter!("kmcp_discovery_refresh_total", 1u64);
        let snap = Arc::new(Snapshot { epoch, index, taken_at: Instant::now() });
        self.current.store(Some(snap.clone()));
        Ok(snap)
    }

    /// Drop the snapshot; the next use repopulates.
    pub fn reset(&self) {
        self.current.store(None);
    }
}
