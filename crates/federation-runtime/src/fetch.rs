//! Fetch primitives for remote snapshots.

use crate::error::{FederationError, FederationResult};
use crate::manifest::RemoteSnapshot;
use crate::remote::RemoteSpec;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Retrieves the snapshot of a remote.
///
/// Implementations perform exactly one retrieval per call; de-duplication
/// and memoization live in [`SnapshotLoader`](crate::loader::SnapshotLoader).
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch(&self, remote: &RemoteSpec) -> FederationResult<RemoteSnapshot>;
}

/// Fetches manifests over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSnapshotFetcher {
    client: reqwest::Client,
}

impl HttpSnapshotFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a fetcher whose requests give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> FederationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FederationError::ManifestFetch(format!("HTTP client setup failed: {e}")))?;
        Ok(Self::with_client(client))
    }

    /// Create a fetcher on top of a preconfigured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpSnapshotFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotFetcher for HttpSnapshotFetcher {
    async fn fetch(&self, remote: &RemoteSpec) -> FederationResult<RemoteSnapshot> {
        debug!("Fetching manifest for {} from {}", remote.name, remote.entry);

        let response = self
            .client
            .get(&remote.entry)
            .send()
            .await
            .map_err(|e| FederationError::ManifestFetch(format!("{}: {}", remote.entry, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FederationError::ManifestNotFound(format!(
                "{} ({})",
                remote.entry, status
            )));
        }
        if !status.is_success() {
            return Err(FederationError::ManifestFetch(format!(
                "{} returned {}",
                remote.entry, status
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FederationError::ManifestFetch(format!("Failed to read response: {e}")))?;

        RemoteSnapshot::from_slice(&body)
    }
}

/// In-memory fetcher for tests and embedded hosts.
///
/// Counts every call and can be told to fail the next attempts for a remote.
#[derive(Debug, Default)]
pub struct StaticSnapshotFetcher {
    snapshots: Mutex<HashMap<String, RemoteSnapshot>>,
    failures: Mutex<HashMap<String, Vec<FederationError>>>,
    calls: AtomicUsize,
}

impl StaticSnapshotFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `snapshot` for the remote with manifest url `entry`.
    pub fn with_snapshot(self, entry: impl Into<String>, snapshot: RemoteSnapshot) -> Self {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.into(), snapshot);
        self
    }

    /// Make the next call for `entry` fail with `error`. Queued failures are
    /// consumed in order before the snapshot is served again.
    pub fn fail_next(&self, entry: impl Into<String>, error: FederationError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(entry.into())
            .or_default()
            .push(error);
    }

    /// Number of fetches performed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotFetcher for StaticSnapshotFetcher {
    async fn fetch(&self, remote: &RemoteSpec) -> FederationResult<RemoteSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let queued = {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            failures
                .get_mut(&remote.entry)
                .filter(|queue| !queue.is_empty())
                .map(|queue| queue.remove(0))
        };
        if let Some(error) = queued {
            return Err(error);
        }

        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&remote.entry)
            .cloned()
            .ok_or_else(|| FederationError::ManifestNotFound(remote.entry.clone()))
    }
}
