//! Share scopes and shared-dependency version resolution.
//!
//! Bundles provide versions of shared dependencies into named scopes. A
//! consumer later resolves a key under a required range and a strategy, and
//! the registry decides which provided version it actually gets.
//!
//! Resolution is synchronous over already registered state. Records are
//! never removed, and a record is never mutated once stored; re-providing an
//! identical version swaps the whole record while it has not been loaded yet.

use crate::diagnostics::{Diagnostic, DiagnosticSink, FilterReason, TracingSink};
use crate::error::{FederationError, FederationResult};
use crate::version::{parse_version, VersionRange};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::debug;

/// Name of the scope used when none is given.
pub const DEFAULT_SCOPE: &str = "default";

/// A resident shared module, as produced by its factory.
pub type SharedModule = Arc<dyn Any + Send + Sync>;

/// Factory producing a shared module on first use.
pub type ShareFactory = Arc<dyn Fn() -> SharedModule + Send + Sync>;

/// How to choose among several satisfying versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShareStrategy {
    /// Highest satisfying version wins.
    #[default]
    VersionFirst,
    /// An already loaded satisfying version wins, even if not the highest.
    LoadedFirst,
}

/// What to do when no provided version satisfies a non-strict request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RangeMissPolicy {
    /// Use the highest provided version and emit a diagnostic.
    #[default]
    HighestAvailable,
    /// Fail with `VersionConflict`, as if `strictVersion` were set.
    Fail,
}

/// Version filters checked when a version is provided.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvideFilter {
    /// Only versions matching this range are stored.
    pub include: Option<VersionRange>,
    /// Versions matching this range are never stored.
    pub exclude: Option<VersionRange>,
}

impl ProvideFilter {
    pub fn is_empty(&self) -> bool {
        self.include.is_none() && self.exclude.is_none()
    }

    fn rejects(&self, version: &Version) -> Option<FilterReason> {
        if let Some(include) = &self.include {
            if !include.matches(version) {
                return Some(FilterReason::Include);
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.matches(version) {
                return Some(FilterReason::Exclude);
            }
        }
        None
    }
}

/// Options a bundle attaches when providing a shared dependency.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    pub version: String,
    pub singleton: bool,
    pub strict_version: bool,
    pub eager: bool,
    pub required_version: Option<VersionRange>,
    pub filter: Option<ProvideFilter>,
    /// Name of the providing bundle.
    pub from: Option<String>,
}

impl SharedConfig {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    pub fn strict_version(mut self) -> Self {
        self.strict_version = true;
        self
    }

    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    pub fn required_version(mut self, range: VersionRange) -> Self {
        self.required_version = Some(range);
        self
    }

    pub fn include(mut self, range: VersionRange) -> Self {
        self.filter.get_or_insert_with(ProvideFilter::default).include = Some(range);
        self
    }

    pub fn exclude(mut self, range: VersionRange) -> Self {
        self.filter.get_or_insert_with(ProvideFilter::default).exclude = Some(range);
        self
    }

    pub fn from_bundle(mut self, name: impl Into<String>) -> Self {
        self.from = Some(name.into());
        self
    }
}

/// One provided version of a shared dependency.
pub struct SharedRecord {
    pub share_key: String,
    pub version: Version,
    pub singleton: bool,
    pub strict_version: bool,
    pub eager: bool,
    pub required_version: Option<VersionRange>,
    pub from: Option<String>,
    factory: ShareFactory,
}

impl fmt::Debug for SharedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRecord")
            .field("share_key", &self.share_key)
            .field("version", &self.version.to_string())
            .field("singleton", &self.singleton)
            .field("strict_version", &self.strict_version)
            .field("eager", &self.eager)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

/// Outcome of [`ShareRegistry::provide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvideOutcome {
    /// A new version was stored.
    Stored,
    /// An unloaded duplicate had its factory replaced.
    Replaced,
    /// A duplicate was ignored because the existing version is already loaded.
    Kept,
    /// The version was dropped by a provide filter.
    Rejected,
}

/// Consumer-side requirements for a resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    pub required_version: Option<VersionRange>,
    pub strategy: ShareStrategy,
    pub singleton: bool,
    pub strict_version: bool,
}

impl ResolveRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request mirroring the consumer-side options carried by a record.
    pub fn from_record(record: &SharedRecord) -> Self {
        Self {
            required_version: record.required_version.clone(),
            strategy: ShareStrategy::default(),
            singleton: record.singleton,
            strict_version: record.strict_version,
        }
    }

    pub fn required_version(mut self, range: VersionRange) -> Self {
        self.required_version = Some(range);
        self
    }

    pub fn strategy(mut self, strategy: ShareStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    pub fn strict_version(mut self) -> Self {
        self.strict_version = true;
        self
    }

    fn required_label(&self) -> String {
        self.required_version
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "*".to_string())
    }
}

struct ProvidedSlot {
    record: Arc<SharedRecord>,
    resident: Arc<OnceLock<SharedModule>>,
}

impl ProvidedSlot {
    fn is_loaded(&self) -> bool {
        self.resident.get().is_some()
    }
}

#[derive(Default)]
struct ShareEntry {
    /// Registration order.
    slots: Vec<ProvidedSlot>,
    active_singleton: Option<Version>,
}

impl ShareEntry {
    fn slot(&self, version: &Version) -> Option<&ProvidedSlot> {
        self.slots.iter().find(|s| &s.record.version == version)
    }
}

type ScopeMap = HashMap<String, HashMap<String, ShareEntry>>;

/// Process-wide store of provided shared-dependency versions.
pub struct ShareRegistry {
    scopes: RwLock<ScopeMap>,
    sink: Arc<dyn DiagnosticSink>,
    range_miss: RangeMissPolicy,
}

impl ShareRegistry {
    /// Create an empty registry reporting diagnostics through `tracing`.
    pub fn new() -> Self {
        Self::with_sink(Arc::new(TracingSink))
    }

    /// Create an empty registry reporting diagnostics to `sink`.
    pub fn with_sink(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            scopes: RwLock::new(HashMap::new()),
            sink,
            range_miss: RangeMissPolicy::default(),
        }
    }

    /// Set the behavior for non-strict requests that no version satisfies.
    pub fn with_range_miss_policy(mut self, policy: RangeMissPolicy) -> Self {
        self.range_miss = policy;
        self
    }

    pub fn range_miss_policy(&self) -> RangeMissPolicy {
        self.range_miss
    }

    /// Register a version of `key` into `scope`.
    pub fn provide<F>(
        &self,
        scope: &str,
        key: &str,
        config: SharedConfig,
        factory: F,
    ) -> FederationResult<ProvideOutcome>
    where
        F: Fn() -> SharedModule + Send + Sync + 'static,
    {
        let version = parse_version(&config.version)?;

        if let Some(filter) = config.filter.as_ref().filter(|f| !f.is_empty()) {
            if config.singleton {
                self.sink.emit(Diagnostic::SingletonFiltered {
                    scope: scope.to_string(),
                    key: key.to_string(),
                    version: version.to_string(),
                });
            }
            if let Some(reason) = filter.rejects(&version) {
                self.sink.emit(Diagnostic::FilterRejected {
                    scope: scope.to_string(),
                    key: key.to_string(),
                    version: version.to_string(),
                    reason,
                });
                return Ok(ProvideOutcome::Rejected);
            }
        }

        let record = Arc::new(SharedRecord {
            share_key: key.to_string(),
            version: version.clone(),
            singleton: config.singleton,
            strict_version: config.strict_version,
            eager: config.eager,
            required_version: config.required_version,
            from: config.from,
            factory: Arc::new(factory),
        });

        let mut scopes = self.write();
        let entry = scopes
            .entry(scope.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default();

        let outcome = match entry.slots.iter_mut().find(|s| s.record.version == version) {
            Some(slot) => {
                let replaced = !slot.is_loaded();
                if replaced {
                    slot.record = Arc::clone(&record);
                }
                self.sink.emit(Diagnostic::DuplicateProvide {
                    scope: scope.to_string(),
                    key: key.to_string(),
                    version: version.to_string(),
                    replaced,
                });
                if replaced {
                    ProvideOutcome::Replaced
                } else {
                    ProvideOutcome::Kept
                }
            }
            None => {
                entry.slots.push(ProvidedSlot {
                    record: Arc::clone(&record),
                    resident: Arc::new(OnceLock::new()),
                });
                ProvideOutcome::Stored
            }
        };

        if record.singleton {
            match &entry.active_singleton {
                None => entry.active_singleton = Some(version.clone()),
                Some(active) if *active != version => {
                    self.sink.emit(Diagnostic::SingletonAlreadyActive {
                        scope: scope.to_string(),
                        key: key.to_string(),
                        active: active.to_string(),
                        provided: version.to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        debug!(scope, key, version = %version, ?outcome, "provided shared module");
        Ok(outcome)
    }

    /// Decide which provided version of `key` the request gets.
    pub fn resolve(
        &self,
        scope: &str,
        key: &str,
        request: &ResolveRequest,
    ) -> FederationResult<Arc<SharedRecord>> {
        self.resolve_slot(scope, key, request)
            .map(|(record, _)| record)
    }

    /// Resolve and instantiate. The factory of a record runs at most once;
    /// later calls return the resident module.
    pub fn load(
        &self,
        scope: &str,
        key: &str,
        request: &ResolveRequest,
    ) -> FederationResult<SharedModule> {
        let (record, resident) = self.resolve_slot(scope, key, request)?;
        // Lock is released here: factories may resolve their own shared deps.
        Ok(Arc::clone(resident.get_or_init(|| {
            debug!(scope, key, version = %record.version, "instantiating shared module");
            (record.factory)()
        })))
    }

    /// Instantiate every eager record of `scope`. Returns how many ran.
    pub fn load_eager(&self, scope: &str) -> usize {
        let eager: Vec<(Arc<SharedRecord>, Arc<OnceLock<SharedModule>>)> = {
            let scopes = self.read();
            let pending: Vec<_> = scopes
                .get(scope)
                .into_iter()
                .flat_map(|keys| keys.values())
                .flat_map(|entry| entry.slots.iter())
                .filter(|slot| slot.record.eager && !slot.is_loaded())
                .map(|slot| (Arc::clone(&slot.record), Arc::clone(&slot.resident)))
                .collect();
            pending
        };

        for (record, resident) in &eager {
            resident.get_or_init(|| (record.factory)());
        }
        eager.len()
    }

    /// Whether the factory of `scope/key@version` has already run.
    pub fn is_loaded(&self, scope: &str, key: &str, version: &Version) -> bool {
        self.read()
            .get(scope)
            .and_then(|keys| keys.get(key))
            .and_then(|entry| entry.slot(version))
            .is_some_and(ProvidedSlot::is_loaded)
    }

    /// All provided versions of `key`, in registration order.
    pub fn versions(&self, scope: &str, key: &str) -> Vec<Arc<SharedRecord>> {
        self.read()
            .get(scope)
            .and_then(|keys| keys.get(key))
            .map(|entry| entry.slots.iter().map(|s| Arc::clone(&s.record)).collect())
            .unwrap_or_default()
    }

    /// The active singleton version of `key`, if one was fixed.
    pub fn active_singleton(&self, scope: &str, key: &str) -> Option<Version> {
        self.read()
            .get(scope)
            .and_then(|keys| keys.get(key))
            .and_then(|entry| entry.active_singleton.clone())
    }

    /// Names of all scopes that hold at least one registration, sorted.
    pub fn scopes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn resolve_slot(
        &self,
        scope: &str,
        key: &str,
        request: &ResolveRequest,
    ) -> FederationResult<(Arc<SharedRecord>, Arc<OnceLock<SharedModule>>)> {
        let mut scopes = self.write();
        let entry = scopes
            .get_mut(scope)
            .and_then(|keys| keys.get_mut(key))
            .filter(|entry| !entry.slots.is_empty())
            .ok_or_else(|| FederationError::ShareNotFound {
                scope: scope.to_string(),
                key: key.to_string(),
            })?;

        if let Some(active) = entry.active_singleton.clone() {
            if request.singleton || entry.slots.iter().any(|s| s.record.singleton) {
                let slot = entry
                    .slot(&active)
                    .ok_or_else(|| FederationError::ShareNotFound {
                        scope: scope.to_string(),
                        key: key.to_string(),
                    })?;
                if let Some(range) = &request.required_version {
                    if !range.matches(&active) {
                        if request.strict_version {
                            return Err(FederationError::VersionConflict {
                                scope: scope.to_string(),
                                key: key.to_string(),
                                required: range.to_string(),
                                found: active.to_string(),
                            });
                        }
                        self.sink.emit(Diagnostic::SingletonMismatch {
                            scope: scope.to_string(),
                            key: key.to_string(),
                            active: active.to_string(),
                            required: range.to_string(),
                        });
                    }
                }
                return Ok((Arc::clone(&slot.record), Arc::clone(&slot.resident)));
            }
        }

        let index = match pick_candidate(&entry.slots, request) {
            Some(index) => index,
            None => {
                let highest = highest_index(entry.slots.iter().enumerate())
                    .ok_or_else(|| FederationError::ShareNotFound {
                        scope: scope.to_string(),
                        key: key.to_string(),
                    })?;
                let chosen = entry.slots[highest].record.version.to_string();
                if request.strict_version || self.range_miss == RangeMissPolicy::Fail {
                    let found = entry
                        .slots
                        .iter()
                        .map(|s| s.record.version.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(FederationError::VersionConflict {
                        scope: scope.to_string(),
                        key: key.to_string(),
                        required: request.required_label(),
                        found,
                    });
                }
                self.sink.emit(Diagnostic::VersionFallback {
                    scope: scope.to_string(),
                    key: key.to_string(),
                    required: request.required_label(),
                    chosen,
                });
                highest
            }
        };

        let slot = &entry.slots[index];
        let resolved = (Arc::clone(&slot.record), Arc::clone(&slot.resident));
        if request.singleton && entry.active_singleton.is_none() {
            entry.active_singleton = Some(resolved.0.version.clone());
        }

        debug!(scope, key, version = %resolved.0.version, "resolved shared module");
        Ok(resolved)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ScopeMap> {
        self.scopes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ScopeMap> {
        self.scopes.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ShareRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of the slot a request picks among satisfying candidates.
fn pick_candidate(slots: &[ProvidedSlot], request: &ResolveRequest) -> Option<usize> {
    let satisfies = |slot: &ProvidedSlot| {
        request
            .required_version
            .as_ref()
            .map_or(true, |range| range.matches(&slot.record.version))
    };
    let candidates = || slots.iter().enumerate().filter(|(_, s)| satisfies(s));

    if request.strategy == ShareStrategy::LoadedFirst {
        if let Some(index) = highest_index(candidates().filter(|(_, s)| s.is_loaded())) {
            return Some(index);
        }
    }
    highest_index(candidates())
}

/// Highest version by precedence; earliest registration wins ties.
fn highest_index<'a>(slots: impl Iterator<Item = (usize, &'a ProvidedSlot)>) -> Option<usize> {
    let mut best: Option<(usize, &Version)> = None;
    for (index, slot) in slots {
        let version = &slot.record.version;
        match best {
            Some((_, current)) if precedence(version, current) != Ordering::Greater => {}
            _ => best = Some((index, version)),
        }
    }
    best.map(|(index, _)| index)
}

/// Semver precedence: build metadata is ignored.
fn precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch, &a.pre).cmp(&(b.major, b.minor, b.patch, &b.pre))
}
