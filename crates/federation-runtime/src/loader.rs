//! Remote snapshot loading with request de-duplication.
//!
//! The first caller for a remote claims its memo slot by inserting a pending
//! entry holding a shared handle to a spawned fetch task. Every concurrent
//! caller clones that handle, so exactly one fetch runs per remote and all
//! waiters observe the same snapshot or the same error.
//!
//! Successful snapshots stay memoized for the life of the loader. Failures
//! clear the slot, so the next call fetches again. Abandoning a `load` does
//! not cancel the fetch: the spawned task still settles the slot.

use crate::error::{FederationError, FederationResult};
use crate::fetch::SnapshotFetcher;
use crate::manifest::RemoteSnapshot;
use crate::remote::{LoadedRemoteInfo, RemoteSpec};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

type SnapshotFuture = Shared<BoxFuture<'static, FederationResult<Arc<RemoteSnapshot>>>>;

enum Slot {
    Pending {
        generation: u64,
        future: SnapshotFuture,
    },
    Ready(Arc<RemoteSnapshot>),
}

type Memo = Arc<Mutex<HashMap<String, Slot>>>;

/// Fetches and memoizes remote snapshots.
pub struct SnapshotLoader {
    fetcher: Arc<dyn SnapshotFetcher>,
    memo: Memo,
    generation: AtomicU64,
    fetches: AtomicUsize,
}

impl SnapshotLoader {
    pub fn new(fetcher: Arc<dyn SnapshotFetcher>) -> Self {
        Self {
            fetcher,
            memo: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Load the snapshot of `remote`, fetching it at most once.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn load(&self, remote: &RemoteSpec) -> FederationResult<Arc<RemoteSnapshot>> {
        let future = {
            let mut memo = lock(&self.memo);
            match memo.get(&remote.snapshot_key()) {
                Some(Slot::Ready(snapshot)) => return Ok(Arc::clone(snapshot)),
                Some(Slot::Pending { future, .. }) => {
                    debug!("Joining in-flight manifest fetch for {}", remote.name);
                    future.clone()
                }
                None => self.claim(&mut memo, remote),
            }
        };

        future.await
    }

    /// Load `remote` and look up one of its exposes.
    pub async fn load_expose(
        &self,
        remote: &RemoteSpec,
        expose: &str,
    ) -> FederationResult<LoadedRemoteInfo> {
        let snapshot = self.load(remote).await?;
        if snapshot.find_module(expose).is_none() {
            return Err(FederationError::ManifestNotFound(format!(
                "{} does not expose {}",
                remote.name, expose
            )));
        }
        Ok(LoadedRemoteInfo::new(remote, expose, snapshot))
    }

    /// Snapshot of `remote` if it has already been loaded. Never suspends.
    pub fn get(&self, remote: &RemoteSpec) -> Option<Arc<RemoteSnapshot>> {
        match lock(&self.memo).get(&remote.snapshot_key()) {
            Some(Slot::Ready(snapshot)) => Some(Arc::clone(snapshot)),
            _ => None,
        }
    }

    /// Whether a fetch for `remote` is currently in flight.
    pub fn is_pending(&self, remote: &RemoteSpec) -> bool {
        matches!(
            lock(&self.memo).get(&remote.snapshot_key()),
            Some(Slot::Pending { .. })
        )
    }

    /// Number of underlying fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Start the fetch for `remote` and record it as pending.
    fn claim(&self, memo: &mut HashMap<String, Slot>, remote: &RemoteSpec) -> SnapshotFuture {
        let key = remote.snapshot_key();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let fetcher = Arc::clone(&self.fetcher);
        let slots = Arc::clone(&self.memo);
        let spec = remote.clone();
        let task_key = key.clone();

        let task = tokio::spawn(async move {
            let result = fetcher.fetch(&spec).await.map(Arc::new);
            settle(&slots, &task_key, generation, &result);
            match &result {
                Ok(snapshot) => info!(
                    "Loaded manifest for {} v{} ({} modules)",
                    spec.name,
                    snapshot.version,
                    snapshot.modules.len()
                ),
                Err(e) => warn!("Failed to load manifest for {}: {}", spec.name, e),
            }
            result
        });

        let future = async move {
            task.await.unwrap_or_else(|e| {
                Err(FederationError::ManifestFetch(format!(
                    "Manifest fetch task failed: {e}"
                )))
            })
        }
        .boxed()
        .shared();

        memo.insert(
            key,
            Slot::Pending {
                generation,
                future: future.clone(),
            },
        );
        future
    }
}

/// Record the outcome of a fetch, unless a newer claim replaced it.
fn settle(
    memo: &Mutex<HashMap<String, Slot>>,
    key: &str,
    generation: u64,
    result: &FederationResult<Arc<RemoteSnapshot>>,
) {
    let mut memo = lock(memo);
    let current = matches!(
        memo.get(key),
        Some(Slot::Pending { generation: g, .. }) if *g == generation
    );
    if !current {
        return;
    }
    match result {
        Ok(snapshot) => {
            memo.insert(key.to_string(), Slot::Ready(Arc::clone(snapshot)));
        }
        Err(_) => {
            memo.remove(key);
        }
    }
}

fn lock(memo: &Mutex<HashMap<String, Slot>>) -> MutexGuard<'_, HashMap<String, Slot>> {
    memo.lock().unwrap_or_else(PoisonError::into_inner)
}
