//! The owned federation context of one host.
//!
//! A host builds a single [`FederationInstance`] at startup and passes it to
//! everything that needs shared dependencies or remote snapshots. There is no
//! ambient global state and no reset: registrations and snapshots only
//! accumulate for the life of the instance.

use crate::error::{FederationError, FederationResult};
use crate::fetch::SnapshotFetcher;
use crate::loader::SnapshotLoader;
use crate::manifest::RemoteSnapshot;
use crate::remote::{LoadedRemoteInfo, ModuleId, RemoteSpec};
use crate::share::ShareRegistry;
use futures::future::join_all;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Shared registry, snapshot loader and remote table of one host.
pub struct FederationInstance {
    name: String,
    version: String,
    shares: ShareRegistry,
    snapshots: SnapshotLoader,
    remotes: RwLock<Vec<RemoteSpec>>,
}

impl FederationInstance {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        fetcher: Arc<dyn SnapshotFetcher>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            shares: ShareRegistry::new(),
            snapshots: SnapshotLoader::new(fetcher),
            remotes: RwLock::new(Vec::new()),
        }
    }

    /// Replace the share registry, e.g. to inject a diagnostic sink.
    pub fn with_share_registry(mut self, shares: ShareRegistry) -> Self {
        self.shares = shares;
        self
    }

    /// Host name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host version; part of every data-fetch key.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn shares(&self) -> &ShareRegistry {
        &self.shares
    }

    pub fn snapshots(&self) -> &SnapshotLoader {
        &self.snapshots
    }

    /// Declare a remote. A remote with the same alias is replaced.
    pub fn register_remote(&self, spec: RemoteSpec) {
        let mut remotes = self.remotes.write().unwrap_or_else(PoisonError::into_inner);
        info!("Registered remote {} as '{}' ({})", spec.name, spec.alias, spec.entry);
        match remotes.iter_mut().find(|r| r.alias == spec.alias) {
            Some(existing) => *existing = spec,
            None => remotes.push(spec),
        }
    }

    /// All declared remotes, in declaration order.
    pub fn remotes(&self) -> Vec<RemoteSpec> {
        self.remotes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Look a remote up by name or alias.
    pub fn remote(&self, request: &str) -> Option<RemoteSpec> {
        self.remotes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.answers_to(request))
            .cloned()
    }

    /// Load the snapshot of a declared remote.
    pub async fn load_remote(&self, request: &str) -> FederationResult<Arc<RemoteSnapshot>> {
        let spec = self.require_remote(request)?;
        self.snapshots.load(&spec).await
    }

    /// Load the remote behind `id` and match its expose.
    pub async fn load_module_info(&self, id: &ModuleId) -> FederationResult<LoadedRemoteInfo> {
        let spec = self.require_remote(&id.remote)?;
        self.snapshots.load_expose(&spec, &id.expose).await
    }

    /// Info for `id` from an already loaded snapshot. Never suspends.
    pub fn loaded_remote_info(&self, id: &ModuleId) -> Option<LoadedRemoteInfo> {
        let spec = self.remote(&id.remote)?;
        let snapshot = self.snapshots.get(&spec)?;
        snapshot.find_module(&id.expose)?;
        Some(LoadedRemoteInfo::new(&spec, &id.expose, snapshot))
    }

    /// Load every declared remote concurrently.
    pub async fn prefetch_all(&self) -> Vec<(String, FederationResult<Arc<RemoteSnapshot>>)> {
        let remotes = self.remotes();
        let loads = remotes.iter().map(|spec| self.snapshots.load(spec));
        let results = join_all(loads).await;
        remotes
            .into_iter()
            .map(|spec| spec.alias)
            .zip(results)
            .collect()
    }

    fn require_remote(&self, request: &str) -> FederationResult<RemoteSpec> {
        self.remote(request).ok_or_else(|| {
            FederationError::ManifestNotFound(format!(
                "Remote '{}' is not registered with host '{}'",
                request, self.name
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::StaticSnapshotFetcher;

    fn instance() -> FederationInstance {
        let snapshot = RemoteSnapshot::from_json(
            r#"{
                "name": "provider",
                "publicPath": "http://localhost:5002/",
                "remoteEntry": "remoteEntry.js",
                "modules": [{ "modulePath": "./Content" }]
            }"#,
        )
        .unwrap();
        let fetcher = StaticSnapshotFetcher::new().with_snapshot("mem://provider", snapshot);
        let instance = FederationInstance::new("host", "1.0.0", Arc::new(fetcher));
        instance.register_remote(RemoteSpec::parse("remote", "provider@mem://provider").unwrap());
        instance
    }

    #[tokio::test]
    async fn test_loaded_remote_info_after_load() {
        let instance = instance();
        let id = ModuleId::parse("remote/Content").unwrap();

        assert!(instance.loaded_remote_info(&id).is_none());
        instance.load_module_info(&id).await.unwrap();

        let info = instance.loaded_remote_info(&id).unwrap();
        assert_eq!(info.name, "provider");
        assert_eq!(info.expose, "./Content");

        let by_name = ModuleId::parse("provider/Content").unwrap();
        assert!(instance.loaded_remote_info(&by_name).is_some());
    }

    #[tokio::test]
    async fn test_unknown_remote() {
        let instance = instance();
        let err = instance.load_remote("nope").await.unwrap_err();
        assert!(matches!(err, FederationError::ManifestNotFound(_)));
    }

    #[test]
    fn test_register_remote_replaces_alias() {
        let instance = instance();
        instance.register_remote(RemoteSpec::parse("remote", "provider@mem://v2").unwrap());
        let remotes = instance.remotes();
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].entry, "mem://v2");
    }
}
