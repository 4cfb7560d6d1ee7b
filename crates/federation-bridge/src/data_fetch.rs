//! Deduplicated cache of remote module data fetches.
//!
//! Each key moves through an explicit state: `Unset`, `Pending` (holding the
//! shared in-flight result), `Resolved` or `Rejected`. The first caller for
//! an unset key claims it; every later caller attaches to the same in-flight
//! future, so the data-fetch function runs once per key. A rejected key is
//! retried by the next fetch. Resolved values are served from the cache for
//! the life of the cache, together with the downgrade flag of the run that
//! produced them, and can be exported after a server pass and hydrated into
//! the cache of the next pass.

use federation_runtime::{FederationError, FederationResult, ModuleId};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Key of one logical data fetch: module identity plus consumer version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataFetchKey(String);

impl DataFetchKey {
    /// Key for `remote`'s `expose` as consumed by a host at `consumer_version`.
    pub fn new(remote: &str, expose: &str, consumer_version: &str) -> Self {
        let expose = expose.trim_start_matches("./");
        Self::for_module(&format!("{remote}/{expose}"), consumer_version)
    }

    /// Key for a module identity tag such as `remoteApp/Component`, used as is.
    pub fn for_module(module_id: &str, consumer_version: &str) -> Self {
        Self(format!("{module_id}@{consumer_version}"))
    }

    pub fn from_module_id(id: &ModuleId, consumer_version: &str) -> Self {
        Self::new(&id.remote, &id.expose, consumer_version)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataFetchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DataFetchKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for DataFetchKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// Where a module's data fetch may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataFetchType {
    /// Only in the client pass; skipped during server rendering.
    ClientOnly,
    /// In either pass; a server result is hydrated into the client.
    ServerCapable,
}

/// Parameters handed to a data-fetch function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFetchParams {
    /// The fetch runs in the degraded, client-only mode.
    pub is_downgrade: bool,
    /// Caller-supplied extras.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DataFetchParams {
    pub fn new(is_downgrade: bool) -> Self {
        Self {
            is_downgrade,
            extra: Map::new(),
        }
    }

    pub fn with_extra(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }
}

/// A module's data-fetch function.
pub type DataFetchFn =
    Arc<dyn Fn(DataFetchParams) -> BoxFuture<'static, FederationResult<Value>> + Send + Sync>;

/// Locates a module's data-fetch function, possibly asynchronously.
pub type DataFetchGetter =
    Arc<dyn Fn() -> BoxFuture<'static, FederationResult<DataFetchFn>> + Send + Sync>;

/// Wrap an async closure as a [`DataFetchFn`].
pub fn data_fetch_fn<F, Fut>(f: F) -> DataFetchFn
where
    F: Fn(DataFetchParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FederationResult<Value>> + Send + 'static,
{
    Arc::new(move |params| f(params).boxed())
}

/// A getter that hands out an already known function.
pub fn ready_getter(function: DataFetchFn) -> DataFetchGetter {
    Arc::new(move || {
        let function = Arc::clone(&function);
        async move { Ok(function) }.boxed()
    })
}

/// Status of a key, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFetchStatus {
    Unset,
    Pending,
    Resolved,
    Rejected,
}

/// A resolved value and how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedData {
    pub value: Value,
    /// The value came from a degraded, client-only run. Hydrated values
    /// never are.
    pub is_downgrade: bool,
}

/// Read-only view of one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFetchEntry {
    pub key: DataFetchKey,
    pub fetch_type: Option<DataFetchType>,
    pub status: DataFetchStatus,
}

type DataFuture = Shared<BoxFuture<'static, FederationResult<FetchedData>>>;

enum FetchState {
    Unset,
    Pending { generation: u64, future: DataFuture },
    Resolved(FetchedData),
    Rejected(FederationError),
}

impl FetchState {
    fn status(&self) -> DataFetchStatus {
        match self {
            FetchState::Unset => DataFetchStatus::Unset,
            FetchState::Pending { .. } => DataFetchStatus::Pending,
            FetchState::Resolved(_) => DataFetchStatus::Resolved,
            FetchState::Rejected(_) => DataFetchStatus::Rejected,
        }
    }
}

struct Getter {
    /// Distinguishes this registration from later ones for the same key.
    registration: u64,
    fetch_type: DataFetchType,
    locate: DataFetchGetter,
    /// Located function, once the getter has succeeded.
    function: Option<DataFetchFn>,
}

struct Entry {
    getter: Option<Getter>,
    state: FetchState,
}

impl Entry {
    fn new() -> Self {
        Self {
            getter: None,
            state: FetchState::Unset,
        }
    }
}

type Entries = Arc<Mutex<HashMap<DataFetchKey, Entry>>>;

/// Shared data-fetch cache of one render process.
pub struct DataFetchCache {
    entries: Entries,
    generation: AtomicU64,
}

impl DataFetchCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Register how to locate the data-fetch function of `key`.
    ///
    /// A registration replaces an earlier getter but keeps any cached value.
    pub fn register_getter(
        &self,
        key: DataFetchKey,
        fetch_type: DataFetchType,
        getter: DataFetchGetter,
    ) {
        debug!(key = %key, ?fetch_type, "registered data fetch");
        let registration = self.generation.fetch_add(1, Ordering::SeqCst);
        lock(&self.entries)
            .entry(key)
            .or_insert_with(Entry::new)
            .getter = Some(Getter {
            registration,
            fetch_type,
            locate: getter,
            function: None,
        });
    }

    /// Declared type of the data fetch registered for `key`.
    pub fn fetch_type(&self, key: &DataFetchKey) -> Option<DataFetchType> {
        lock(&self.entries)
            .get(key)
            .and_then(|entry| entry.getter.as_ref())
            .map(|getter| getter.fetch_type)
    }

    /// The entry for `key`, creating an unset one if needed.
    pub fn get_or_create(&self, key: &DataFetchKey) -> DataFetchEntry {
        let mut entries = lock(&self.entries);
        let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
        DataFetchEntry {
            key: key.clone(),
            fetch_type: entry.getter.as_ref().map(|g| g.fetch_type),
            status: entry.state.status(),
        }
    }

    pub fn contains(&self, key: &DataFetchKey) -> bool {
        lock(&self.entries).contains_key(key)
    }

    pub fn status(&self, key: &DataFetchKey) -> DataFetchStatus {
        lock(&self.entries)
            .get(key)
            .map_or(DataFetchStatus::Unset, |entry| entry.state.status())
    }

    /// Cached value of `key`, if resolved.
    pub fn cached(&self, key: &DataFetchKey) -> Option<Value> {
        match lock(&self.entries).get(key).map(|entry| &entry.state) {
            Some(FetchState::Resolved(data)) => Some(data.value.clone()),
            _ => None,
        }
    }

    /// The error of the last attempt for `key`, if it was rejected.
    pub fn rejection(&self, key: &DataFetchKey) -> Option<FederationError> {
        match lock(&self.entries).get(key).map(|entry| &entry.state) {
            Some(FetchState::Rejected(error)) => Some(error.clone()),
            _ => None,
        }
    }

    /// Fetch the data of `key`, running its data-fetch function at most once.
    ///
    /// A resolved value is returned as is and `params` are ignored. Must be
    /// called from within a tokio runtime.
    pub async fn fetch(&self, key: &DataFetchKey, params: DataFetchParams) -> FederationResult<Value> {
        self.fetch_data(key, params).await.map(|data| data.value)
    }

    /// Like [`fetch`], also reporting whether the value came from a
    /// downgraded run.
    ///
    /// [`fetch`]: DataFetchCache::fetch
    pub async fn fetch_data(
        &self,
        key: &DataFetchKey,
        params: DataFetchParams,
    ) -> FederationResult<FetchedData> {
        let future = {
            let mut entries = lock(&self.entries);
            let entry = entries.get_mut(key).ok_or_else(|| not_registered(key))?;
            match &entry.state {
                FetchState::Resolved(data) => return Ok(data.clone()),
                FetchState::Pending { future, .. } => future.clone(),
                FetchState::Unset | FetchState::Rejected(_) => self.claim(entry, key, params)?,
            }
        };

        future.await
    }

    /// Seed `key` with a value produced by an earlier pass.
    pub fn hydrate(&self, key: DataFetchKey, value: Value) {
        debug!(key = %key, "hydrated data fetch");
        lock(&self.entries)
            .entry(key)
            .or_insert_with(Entry::new)
            .state = FetchState::Resolved(FetchedData {
            value,
            is_downgrade: false,
        });
    }

    /// Seed every key of a JSON object produced by [`export_resolved`].
    ///
    /// [`export_resolved`]: DataFetchCache::export_resolved
    pub fn hydrate_all(&self, payload: &Value) -> FederationResult<usize> {
        let object = payload.as_object().ok_or_else(|| {
            FederationError::Json("Hydration payload must be a JSON object".to_string())
        })?;
        for (key, value) in object {
            self.hydrate(DataFetchKey::from(key.as_str()), value.clone());
        }
        Ok(object.len())
    }

    /// Every resolved value, keyed by its key string.
    pub fn export_resolved(&self) -> Value {
        let entries = lock(&self.entries);
        let mut resolved = Map::new();
        for (key, entry) in entries.iter() {
            if let FetchState::Resolved(data) = &entry.state {
                resolved.insert(key.as_str().to_string(), data.value.clone());
            }
        }
        Value::Object(resolved)
    }

    /// Start the data fetch of `entry` and mark it pending.
    fn claim(
        &self,
        entry: &mut Entry,
        key: &DataFetchKey,
        params: DataFetchParams,
    ) -> FederationResult<DataFuture> {
        let getter = entry.getter.as_ref().ok_or_else(|| not_registered(key))?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let source = GetterSource {
            registration: getter.registration,
            located: getter.function.clone(),
            locate: Arc::clone(&getter.locate),
        };
        let entries = Arc::clone(&self.entries);
        let task_key = key.clone();

        let task = tokio::spawn(async move {
            let result = run_fetch(&entries, &task_key, source, params).await;
            settle(&entries, &task_key, generation, &result);
            result
        });

        let future = async move {
            task.await.unwrap_or_else(|e| {
                Err(FederationError::DataFetch(format!("Data fetch task failed: {e}")))
            })
        }
        .boxed()
        .shared();

        entry.state = FetchState::Pending {
            generation,
            future: future.clone(),
        };
        Ok(future)
    }
}

impl Default for DataFetchCache {
    fn default() -> Self {
        Self::new()
    }
}

/// The getter registration a fetch was claimed under.
struct GetterSource {
    registration: u64,
    located: Option<DataFetchFn>,
    locate: DataFetchGetter,
}

async fn run_fetch(
    entries: &Mutex<HashMap<DataFetchKey, Entry>>,
    key: &DataFetchKey,
    source: GetterSource,
    params: DataFetchParams,
) -> FederationResult<FetchedData> {
    let function = match source.located {
        Some(function) => function,
        None => {
            let function = (source.locate)().await?;
            // Only memoize into the registration that located it.
            if let Some(getter) = lock(entries)
                .get_mut(key)
                .and_then(|e| e.getter.as_mut())
                .filter(|getter| getter.registration == source.registration)
            {
                getter.function = Some(Arc::clone(&function));
            }
            function
        }
    };

    let is_downgrade = params.is_downgrade;
    debug!(key = %key, is_downgrade, "running data fetch");
    let value = function(params).await?;
    Ok(FetchedData {
        value,
        is_downgrade,
    })
}

/// Record the outcome of a fetch, unless the entry moved on meanwhile.
fn settle(
    entries: &Mutex<HashMap<DataFetchKey, Entry>>,
    key: &DataFetchKey,
    generation: u64,
    result: &FederationResult<FetchedData>,
) {
    let mut entries = lock(entries);
    let Some(entry) = entries.get_mut(key) else {
        return;
    };
    let current = matches!(
        entry.state,
        FetchState::Pending { generation: g, .. } if g == generation
    );
    if !current {
        return;
    }
    entry.state = match result {
        Ok(data) => FetchState::Resolved(data.clone()),
        Err(error) => {
            warn!(key = %key, "data fetch rejected: {}", error);
            FetchState::Rejected(error.clone())
        }
    };
}

fn not_registered(key: &DataFetchKey) -> FederationError {
    FederationError::DataFetch(format!("No data fetch registered for {key}"))
}

fn lock(
    entries: &Mutex<HashMap<DataFetchKey, Entry>>,
) -> MutexGuard<'_, HashMap<DataFetchKey, Entry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}
