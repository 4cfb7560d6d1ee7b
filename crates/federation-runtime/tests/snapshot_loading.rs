//! Integration tests for remote snapshot loading.
//!
//! These tests cover:
//! - Single-fetch de-duplication under concurrent callers
//! - Retry after failure
//! - The HTTP fetcher against a mock manifest server
//! - Loading through a `FederationInstance`

use async_trait::async_trait;
use federation_runtime::{
    FederationError, FederationInstance, FederationResult, HttpSnapshotFetcher, ModuleId,
    RemoteSnapshot, RemoteSpec, SnapshotFetcher, SnapshotLoader,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MANIFEST: &str = r#"{
    "name": "remoteApp",
    "version": "1.0.0",
    "publicPath": "http://localhost:3001/",
    "remoteEntry": "remoteEntry.js",
    "modules": [
        {
            "modulePath": "./Component",
            "assets": {
                "css": { "sync": ["main.css"], "async": ["extra.css"] },
                "js": { "sync": ["main.js"], "async": [] }
            }
        }
    ]
}"#;

// ==============================================================================
// Test Fixture Helpers
// ==============================================================================

/// Fetcher that holds every fetch until the gate is opened.
struct GatedFetcher {
    gate: Arc<Notify>,
    calls: AtomicUsize,
    result: FederationResult<RemoteSnapshot>,
}

impl GatedFetcher {
    fn new(result: FederationResult<RemoteSnapshot>) -> Self {
        Self {
            gate: Arc::new(Notify::new()),
            calls: AtomicUsize::new(0),
            result,
        }
    }
}

#[async_trait]
impl SnapshotFetcher for GatedFetcher {
    async fn fetch(&self, _remote: &RemoteSpec) -> FederationResult<RemoteSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        self.result.clone()
    }
}

fn spec(entry: &str) -> RemoteSpec {
    RemoteSpec::parse("remote", &format!("remoteApp@{entry}")).unwrap()
}

// ==============================================================================
// De-duplication
// ==============================================================================

#[tokio::test]
async fn test_concurrent_loads_share_one_fetch() {
    let fetcher = Arc::new(GatedFetcher::new(RemoteSnapshot::from_json(MANIFEST)));
    let loader = SnapshotLoader::new(fetcher.clone());
    let remote = spec("mem://remote");
    let gate = Arc::clone(&fetcher.gate);

    let (first, second, ()) = tokio::join!(loader.load(&remote), loader.load(&remote), async {
        tokio::task::yield_now().await;
        gate.notify_one();
    });

    let first = first.unwrap();
    let second = second.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(loader.fetch_count(), 1);
}

#[tokio::test]
async fn test_concurrent_failure_reaches_every_waiter() {
    let error = FederationError::ManifestFetch("connection reset".into());
    let fetcher = Arc::new(GatedFetcher::new(Err(error.clone())));
    let loader = SnapshotLoader::new(fetcher.clone());
    let remote = spec("mem://remote");
    let gate = Arc::clone(&fetcher.gate);

    let (first, second, ()) = tokio::join!(loader.load(&remote), loader.load(&remote), async {
        tokio::task::yield_now().await;
        gate.notify_one();
    });

    assert_eq!(first.unwrap_err(), error);
    assert_eq!(second.unwrap_err(), error);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

    // Failures are not memoized: the next call fetches again.
    fetcher.gate.notify_one();
    assert!(loader.load(&remote).await.is_err());
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_abandoned_load_still_settles() {
    let fetcher = Arc::new(GatedFetcher::new(RemoteSnapshot::from_json(MANIFEST)));
    let loader = SnapshotLoader::new(fetcher.clone());
    let remote = spec("mem://remote");

    // Poll once and drop the caller.
    {
        let load = loader.load(&remote);
        tokio::pin!(load);
        assert!(futures::poll!(load.as_mut()).is_pending());
    }
    assert!(loader.is_pending(&remote));

    fetcher.gate.notify_one();
    let snapshot = loader.load(&remote).await.unwrap();
    assert_eq!(snapshot.name, "remoteApp");
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert!(loader.get(&remote).is_some());
}

// ==============================================================================
// HTTP
// ==============================================================================

#[tokio::test]
async fn test_http_fetcher_loads_manifest_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mf-manifest.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MANIFEST))
        .expect(1)
        .mount(&server)
        .await;

    let loader = SnapshotLoader::new(Arc::new(HttpSnapshotFetcher::new()));
    let remote = spec(&format!("{}/mf-manifest.json", server.uri()));

    let (first, second) = tokio::join!(loader.load(&remote), loader.load(&remote));
    let first = first.unwrap();
    assert!(Arc::ptr_eq(&first, &second.unwrap()));
    assert_eq!(first.version, "1.0.0");

    let third = loader.load(&remote).await.unwrap();
    assert!(Arc::ptr_eq(&first, &third));
}

#[tokio::test]
async fn test_http_fetcher_maps_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken.json"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/garbage.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let fetcher = HttpSnapshotFetcher::with_timeout(Duration::from_secs(5)).unwrap();
    let missing = fetcher
        .fetch(&spec(&format!("{}/missing.json", server.uri())))
        .await;
    assert!(matches!(missing, Err(FederationError::ManifestNotFound(_))));

    let broken = fetcher
        .fetch(&spec(&format!("{}/broken.json", server.uri())))
        .await;
    assert!(matches!(broken, Err(FederationError::ManifestFetch(_))));

    let garbage = fetcher
        .fetch(&spec(&format!("{}/garbage.json", server.uri())))
        .await;
    assert!(matches!(garbage, Err(FederationError::InvalidManifest(_))));
}

// ==============================================================================
// Instance
// ==============================================================================

#[tokio::test]
async fn test_instance_prefetch_and_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mf-manifest.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MANIFEST))
        .expect(1)
        .mount(&server)
        .await;

    let instance = FederationInstance::new("host", "0.1.0", Arc::new(HttpSnapshotFetcher::new()));
    instance.register_remote(spec(&format!("{}/mf-manifest.json", server.uri())));
    instance.register_remote(RemoteSpec::parse("gone", "gone@http://127.0.0.1:1/m.json").unwrap());

    let results = instance.prefetch_all().await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, "remote");
    assert!(results[0].1.is_ok());
    assert!(results[1].1.is_err());

    let id = ModuleId::parse("remoteApp/Component").unwrap();
    let info = instance.loaded_remote_info(&id).unwrap();
    assert_eq!(info.alias, "remote");
    assert_eq!(
        info.snapshot.remote_entry_url(),
        "http://localhost:3001/remoteEntry.js"
    );

    let info = instance.load_module_info(&id).await.unwrap();
    assert_eq!(info.version, "1.0.0");
}
