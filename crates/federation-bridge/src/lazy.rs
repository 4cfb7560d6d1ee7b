//! Lazy loading of remote components.
//!
//! A [`LazyComponent`] wraps a loader for a remote module. Each render
//! produces a [`RenderAttempt`] that moves through
//! `Idle -> LoadingModule -> LoadingData -> Ready | Failed`. While it is
//! suspended the attempt shows the loading placeholder; every failure along
//! the way ends in the fallback renderer, which receives the raw error.
//!
//! The module load is shared by all attempts of the same component and the
//! data fetch is shared through the [`DataFetchCache`], so concurrent renders
//! never start a second load or fetch.

use crate::data_fetch::{DataFetchCache, DataFetchGetter, DataFetchKey, DataFetchParams, DataFetchType};
use federation_runtime::{FederationError, FederationInstance, FederationResult};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// A resolved remote module.
#[derive(Clone)]
pub struct LoadedModule<C> {
    /// The module's default export.
    pub default_export: C,
    /// Identity tag of the module, e.g. `remoteApp/Component`.
    pub module_id: String,
    /// Data fetch the module declares, if any.
    pub data_fetch: Option<(DataFetchType, DataFetchGetter)>,
}

impl<C> LoadedModule<C> {
    pub fn new(default_export: C, module_id: impl Into<String>) -> Self {
        Self {
            default_export,
            module_id: module_id.into(),
            data_fetch: None,
        }
    }

    pub fn with_data_fetch(mut self, fetch_type: DataFetchType, getter: DataFetchGetter) -> Self {
        self.data_fetch = Some((fetch_type, getter));
        self
    }
}

/// Loads a remote module.
pub type ModuleLoader<C> =
    Arc<dyn Fn() -> BoxFuture<'static, FederationResult<LoadedModule<C>>> + Send + Sync>;

/// Renders the fallback view for a failed attempt.
pub type FallbackRenderer<V> = Arc<dyn Fn(&FederationError) -> V + Send + Sync>;

/// Wrap an async closure as a [`ModuleLoader`].
pub fn module_loader<C, F, Fut>(f: F) -> ModuleLoader<C>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FederationResult<LoadedModule<C>>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Which render pass is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    Server,
    #[default]
    Client,
}

/// Modules forced to run their data fetch in downgrade mode on the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DowngradePolicy {
    #[default]
    None,
    All,
    Modules(HashSet<String>),
}

impl DowngradePolicy {
    pub fn applies_to(&self, module_id: &str) -> bool {
        match self {
            DowngradePolicy::None => false,
            DowngradePolicy::All => true,
            DowngradePolicy::Modules(ids) => ids.contains(module_id),
        }
    }
}

/// Phase of a render attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    LoadingModule,
    LoadingData,
    Ready,
    Failed,
}

/// Inputs handed to a rendered module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderProps {
    /// Result of the module's data fetch, if it has one that ran.
    pub data: Option<Value>,
    /// The data was produced in downgrade mode rather than by a server pass,
    /// or the downgrade policy names the module.
    pub is_downgrade: bool,
    /// Caller-supplied parameters, passed through untouched.
    pub passthrough: Map<String, Value>,
}

/// What the rendering substrate should show for an attempt.
#[derive(Debug, Clone)]
pub enum RenderEffect<C, V> {
    /// Still loading: show the placeholder.
    Suspended(V),
    /// Render the module with its props.
    Ready { component: C, props: RenderProps },
    /// Render the fallback; `error` is the failure it was built from.
    Fallback { view: V, error: FederationError },
}

impl<C, V> RenderEffect<C, V> {
    pub fn is_ready(&self) -> bool {
        matches!(self, RenderEffect::Ready { .. })
    }
}

type ModuleFuture<C> = Shared<BoxFuture<'static, FederationResult<LoadedModule<C>>>>;

enum ModuleSlot<C: Clone> {
    Unloaded,
    Pending { generation: u64, future: ModuleFuture<C> },
    Loaded(LoadedModule<C>),
}

struct Inner<C: Clone, V> {
    loader: ModuleLoader<C>,
    instance: Arc<FederationInstance>,
    cache: Arc<DataFetchCache>,
    loading: V,
    fallback: FallbackRenderer<V>,
    mode: RenderMode,
    downgrade: DowngradePolicy,
    module: Arc<Mutex<ModuleSlot<C>>>,
    generation: AtomicU64,
}

/// A remote component behind a suspending placeholder.
pub struct LazyComponent<C: Clone, V> {
    inner: Arc<Inner<C, V>>,
}

impl<C: Clone, V> Clone for LazyComponent<C, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Construction options of a [`LazyComponent`].
pub struct LazyOptions<C, V> {
    pub loader: ModuleLoader<C>,
    pub instance: Arc<FederationInstance>,
    pub cache: Arc<DataFetchCache>,
    pub loading: V,
    pub fallback: FallbackRenderer<V>,
    pub mode: RenderMode,
    pub downgrade: DowngradePolicy,
}

impl<C, V> LazyOptions<C, V> {
    /// Options for a client-pass component without forced downgrades.
    pub fn new(
        loader: ModuleLoader<C>,
        instance: Arc<FederationInstance>,
        cache: Arc<DataFetchCache>,
        loading: V,
        fallback: FallbackRenderer<V>,
    ) -> Self {
        Self {
            loader,
            instance,
            cache,
            loading,
            fallback,
            mode: RenderMode::default(),
            downgrade: DowngradePolicy::default(),
        }
    }

    pub fn render_mode(mut self, mode: RenderMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn downgrade_policy(mut self, policy: DowngradePolicy) -> Self {
        self.downgrade = policy;
        self
    }
}

impl<C, V> LazyComponent<C, V>
where
    C: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(options: LazyOptions<C, V>) -> Self {
        Self {
            inner: Arc::new(Inner {
                loader: options.loader,
                instance: options.instance,
                cache: options.cache,
                loading: options.loading,
                fallback: options.fallback,
                mode: options.mode,
                downgrade: options.downgrade,
                module: Arc::new(Mutex::new(ModuleSlot::Unloaded)),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn render_mode(&self) -> RenderMode {
        self.inner.mode
    }

    /// Start a render attempt with caller-supplied passthrough parameters.
    pub fn render(&self, passthrough: Map<String, Value>) -> RenderAttempt<C, V> {
        let state = Arc::new(Mutex::new(LoadState::Idle));
        let inner = Arc::clone(&self.inner);
        let task_state = Arc::clone(&state);
        let future = async move {
            let result = inner.run(passthrough, &task_state).await;
            set_state(
                &task_state,
                if result.is_ok() {
                    LoadState::Ready
                } else {
                    LoadState::Failed
                },
            );
            result
        }
        .boxed();

        RenderAttempt {
            future: Some(future),
            outcome: None,
            state,
            loading: self.inner.loading.clone(),
            fallback: Arc::clone(&self.inner.fallback),
        }
    }
}

impl<C, V> Inner<C, V>
where
    C: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn run(
        &self,
        passthrough: Map<String, Value>,
        state: &Mutex<LoadState>,
    ) -> FederationResult<(C, RenderProps)> {
        set_state(state, LoadState::LoadingModule);
        let module = self.load_module().await?;

        let key = DataFetchKey::for_module(&module.module_id, self.instance.version());
        if let Some((fetch_type, getter)) = &module.data_fetch {
            if self.cache.fetch_type(&key).is_none() {
                self.cache
                    .register_getter(key.clone(), *fetch_type, Arc::clone(getter));
            }
        }

        let mut props = RenderProps {
            passthrough,
            ..RenderProps::default()
        };

        let Some(fetch_type) = self.cache.fetch_type(&key) else {
            return Ok((module.default_export, props));
        };

        if self.mode == RenderMode::Server && fetch_type == DataFetchType::ClientOnly {
            debug!(module = %module.module_id, "skipping client-only data fetch on server");
            return Ok((module.default_export, props));
        }

        set_state(state, LoadState::LoadingData);
        // A run that starts on the client has no server result to use.
        let params = DataFetchParams {
            is_downgrade: self.mode == RenderMode::Client,
            extra: props.passthrough.clone(),
        };
        let fetched = self.cache.fetch_data(&key, params).await?;
        let forced =
            self.mode == RenderMode::Client && self.downgrade.applies_to(&module.module_id);

        props.is_downgrade = fetched.is_downgrade || forced;
        props.data = Some(fetched.value);
        Ok((module.default_export, props))
    }

    /// Load the module once, sharing the in-flight load between attempts.
    async fn load_module(&self) -> FederationResult<LoadedModule<C>> {
        let future = {
            let mut slot = lock(&self.module);
            match &*slot {
                ModuleSlot::Loaded(module) => return Ok(module.clone()),
                ModuleSlot::Pending { future, .. } => future.clone(),
                ModuleSlot::Unloaded => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst);
                    let future = self.spawn_load(generation);
                    *slot = ModuleSlot::Pending {
                        generation,
                        future: future.clone(),
                    };
                    future
                }
            }
        };

        future.await
    }

    fn spawn_load(&self, generation: u64) -> ModuleFuture<C> {
        let loader = Arc::clone(&self.loader);
        let slot = Arc::clone(&self.module);

        // The loader runs on the task, outside the slot lock.
        let task = tokio::spawn(async move {
            let result = loader().await;
            let mut slot = lock(&slot);
            let current =
                matches!(&*slot, ModuleSlot::Pending { generation: g, .. } if *g == generation);
            if current {
                *slot = match &result {
                    Ok(module) => ModuleSlot::Loaded(module.clone()),
                    Err(e) => {
                        warn!("Remote module load failed: {}", e);
                        ModuleSlot::Unloaded
                    }
                };
            }
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(FederationError::ModuleLoad(format!("Module load task failed: {e}")))
            })
        }
        .boxed()
        .shared()
    }
}

/// One render of a [`LazyComponent`].
pub struct RenderAttempt<C, V> {
    future: Option<BoxFuture<'static, FederationResult<(C, RenderProps)>>>,
    outcome: Option<RenderEffect<C, V>>,
    state: Arc<Mutex<LoadState>>,
    loading: V,
    fallback: FallbackRenderer<V>,
}

impl<C: Clone, V: Clone> RenderAttempt<C, V> {
    pub fn state(&self) -> LoadState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The effect to show right now, without waiting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn poll_effect(&mut self) -> RenderEffect<C, V> {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let polled = self
            .future
            .as_mut()
            .and_then(|future| future.as_mut().now_or_never());
        match polled {
            Some(result) => self.finish(result),
            None => RenderEffect::Suspended(self.loading.clone()),
        }
    }

    /// Wait for the attempt to reach `Ready` or `Fallback`.
    pub async fn settle(&mut self) -> RenderEffect<C, V> {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let result = match self.future.as_mut() {
            Some(future) => future.await,
            None => Err(FederationError::ModuleLoad(
                "Render attempt has no pending work".to_string(),
            )),
        };
        self.finish(result)
    }

    fn finish(&mut self, result: FederationResult<(C, RenderProps)>) -> RenderEffect<C, V> {
        self.future = None;
        let effect = match result {
            Ok((component, props)) => RenderEffect::Ready { component, props },
            Err(error) => RenderEffect::Fallback {
                view: (self.fallback)(&error),
                error,
            },
        };
        self.outcome = Some(effect.clone());
        effect
    }
}

fn set_state(state: &Mutex<LoadState>, next: LoadState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = next;
}

fn lock<C: Clone>(slot: &Mutex<ModuleSlot<C>>) -> MutexGuard<'_, ModuleSlot<C>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use federation_runtime::StaticSnapshotFetcher;
    use std::sync::OnceLock;

    fn component(loader: ModuleLoader<&'static str>) -> LazyComponent<&'static str, String> {
        let instance = Arc::new(FederationInstance::new(
            "host",
            "1.0.0",
            Arc::new(StaticSnapshotFetcher::new()),
        ));
        LazyComponent::new(LazyOptions::new(
            loader,
            instance,
            Arc::new(DataFetchCache::new()),
            "Loading...".to_string(),
            Arc::new(|e: &FederationError| format!("Error! {e}")),
        ))
    }

    #[test]
    fn test_downgrade_policy() {
        let listed = DowngradePolicy::Modules(["remote/A".to_string()].into_iter().collect());
        assert!(listed.applies_to("remote/A"));
        assert!(!listed.applies_to("remote/B"));
        assert!(DowngradePolicy::All.applies_to("anything"));
        assert!(!DowngradePolicy::None.applies_to("remote/A"));
    }

    #[tokio::test]
    async fn test_attempt_states() {
        let lazy = component(module_loader(|| async {
            Ok(LoadedModule::new("Mock Component", "remoteApp/Component"))
        }));
        let mut attempt = lazy.render(Map::new());
        assert_eq!(attempt.state(), LoadState::Idle);

        assert!(matches!(attempt.poll_effect(), RenderEffect::Suspended(_)));
        assert_eq!(attempt.state(), LoadState::LoadingModule);

        assert!(attempt.settle().await.is_ready());
        assert_eq!(attempt.state(), LoadState::Ready);
        assert!(attempt.poll_effect().is_ready());
    }

    #[tokio::test]
    async fn test_loader_may_render_its_own_component() {
        let handle: Arc<OnceLock<LazyComponent<&'static str, String>>> = Arc::new(OnceLock::new());
        let nested = Arc::new(Mutex::new(None));

        let lazy = component(module_loader({
            let handle = Arc::clone(&handle);
            let nested = Arc::clone(&nested);
            move || {
                // The slot is pending while the loader runs.
                if let Some(lazy) = handle.get() {
                    let effect = lazy.render(Map::new()).poll_effect();
                    *nested.lock().unwrap() = Some(matches!(effect, RenderEffect::Suspended(_)));
                }
                async { Ok(LoadedModule::new("Mock Component", "remoteApp/Component")) }
            }
        }));
        let _ = handle.set(lazy.clone());

        assert!(lazy.render(Map::new()).settle().await.is_ready());
        assert_eq!(*nested.lock().unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_module_load_failure_is_retried() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let lazy = component(module_loader(move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(FederationError::ModuleLoad("remote offline".into()))
                } else {
                    Ok(LoadedModule::new("Mock Component", "remoteApp/Component"))
                }
            }
        }));

        let effect = lazy.render(Map::new()).settle().await;
        assert!(matches!(
            effect,
            RenderEffect::Fallback { ref view, .. } if view.contains("remote offline")
        ));

        assert!(lazy.render(Map::new()).settle().await.is_ready());
        assert!(lazy.render(Map::new()).settle().await.is_ready());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
