//! Wiring of a [`FederationInstance`] from configuration.

use crate::config::{Config, SharedDependencyConfig};
use anyhow::{Context, Result};
use federation_bridge::{collect_instance_assets, AssetDescriptor, CollectOptions};
use federation_runtime::{
    FederationInstance, HttpSnapshotFetcher, ProvideOutcome, ResolveRequest, ShareRegistry,
    SharedModule, SnapshotFetcher,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// A shared dependency provided by the host process itself.
///
/// The host has no module code of its own to share, so what it provides is
/// the identity of the dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvidedDependency {
    pub key: String,
    pub version: String,
    pub from: String,
}

/// Outcome of loading one remote at startup.
#[derive(Debug)]
pub struct PrefetchReport {
    pub alias: String,
    pub result: Result<String, String>,
}

/// Build the instance described by `config`, using the HTTP fetcher.
pub fn build_instance(config: &Config) -> Result<FederationInstance> {
    let fetcher = HttpSnapshotFetcher::with_timeout(config.http_timeout())
        .context("Failed to create manifest fetcher")?;
    build_instance_with(config, Arc::new(fetcher))
}

/// Build the instance described by `config` on top of `fetcher`.
pub fn build_instance_with(
    config: &Config,
    fetcher: Arc<dyn SnapshotFetcher>,
) -> Result<FederationInstance> {
    let registry = ShareRegistry::new().with_range_miss_policy(config.host.on_range_miss);
    let instance = FederationInstance::new(&config.host.name, &config.host.version, fetcher)
        .with_share_registry(registry);

    for spec in config.remote_specs()? {
        instance.register_remote(spec);
    }

    let provided = register_shared(&instance, config)?;
    info!("Provided shared dependencies: {}", provided);
    Ok(instance)
}

/// Provide every configured shared dependency and instantiate eager ones.
///
/// Returns how many versions were stored.
pub fn register_shared(instance: &FederationInstance, config: &Config) -> Result<usize> {
    let mut stored = 0;
    let mut scopes = BTreeSet::new();

    for (key, dependency) in &config.shared {
        let shared = dependency
            .to_shared_config(&config.host.name)
            .with_context(|| format!("Shared '{}': invalid configuration", key))?;
        let provided = ProvidedDependency {
            key: key.clone(),
            version: dependency.version.clone(),
            from: config.host.name.clone(),
        };

        let outcome = instance
            .shares()
            .provide(dependency.scope(), key, shared, move || {
                Arc::new(provided.clone()) as SharedModule
            })
            .with_context(|| format!("Shared '{}': provide failed", key))?;

        if matches!(outcome, ProvideOutcome::Stored | ProvideOutcome::Replaced) {
            stored += 1;
        }
        scopes.insert(dependency.scope().to_string());
    }

    for scope in scopes {
        let eager = instance.shares().load_eager(&scope);
        if eager > 0 {
            info!("Instantiated eager dependencies in scope '{}': {}", scope, eager);
        }
    }

    Ok(stored)
}

/// Resolve every configured shared dependency the way a consumer would.
///
/// The request mirrors the options of the record the host provided; keys
/// whose own version was filtered out fall back to the configured options.
/// Returns `(key, resolved version)` pairs; unresolvable keys are logged
/// and skipped.
pub fn resolve_shared(instance: &FederationInstance, config: &Config) -> Vec<(String, String)> {
    let mut resolved = Vec::new();
    for (key, dependency) in &config.shared {
        let own = instance
            .shares()
            .versions(dependency.scope(), key)
            .into_iter()
            .find(|record| record.from.as_deref() == Some(config.host.name.as_str()));
        let request = match own {
            Some(record) => ResolveRequest::from_record(&record),
            None => configured_request(dependency),
        }
        .strategy(config.host.share_strategy);

        match instance.shares().resolve(dependency.scope(), key, &request) {
            Ok(record) => resolved.push((key.clone(), record.version.to_string())),
            Err(e) => warn!("Shared '{}' does not resolve: {}", key, e),
        }
    }
    resolved
}

fn configured_request(dependency: &SharedDependencyConfig) -> ResolveRequest {
    let mut request = ResolveRequest::new();
    if dependency.singleton {
        request = request.singleton();
    }
    if dependency.strict_version {
        request = request.strict_version();
    }
    if let Ok(Some(range)) = dependency.required_range() {
        request = request.required_version(range);
    }
    request
}

/// Load every remote and report per-alias outcomes.
pub async fn prefetch_remotes(instance: &FederationInstance) -> Vec<PrefetchReport> {
    instance
        .prefetch_all()
        .await
        .into_iter()
        .map(|(alias, result)| PrefetchReport {
            alias,
            result: result
                .map(|snapshot| format!("{} v{}", snapshot.name, snapshot.version))
                .map_err(|e| e.to_string()),
        })
        .collect()
}

/// Assets of every configured preload module.
pub fn preload_assets(
    instance: &FederationInstance,
    config: &Config,
) -> Vec<(String, Vec<AssetDescriptor>)> {
    let options = CollectOptions {
        inject_script: config.ssr.inject_script,
        inject_link: config.ssr.inject_link,
    };
    config
        .ssr
        .preload
        .iter()
        .map(|id| (id.clone(), collect_instance_assets(instance, id, options)))
        .collect()
}
