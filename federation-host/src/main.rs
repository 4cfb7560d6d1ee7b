//! # federation-host
//!
//! A host process for module federation.
//!
//! On startup the host:
//! - Provides its configured shared dependencies into their share scopes
//! - Declares its remotes and loads their manifests concurrently
//! - Resolves its shared dependencies the way a consumer would
//! - Collects the SSR assets of the configured preload modules
//!
//! ## Configuration
//!
//! The host reads configuration from
//! `$XDG_CONFIG_HOME/federation-host/config.toml`, or from the path given as
//! the first argument.
//!
//! ## Running
//!
//! ```bash
//! cargo run --bin federation-host
//!
//! # With debug logging
//! FEDERATION_DEBUG=1 cargo run --bin federation-host
//! ```

use anyhow::Result;
use federation_bridge::render_assets;
use federation_host::config::Config;
use federation_host::{host, logging};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let (config, load_error) = match std::env::args().nth(1) {
        Some(path) => (Config::load(&path)?, None),
        None => match Config::load_default() {
            Ok(cfg) => (cfg, None),
            Err(e) => (Config::default(), Some(e)),
        },
    };

    logging::init(&config.host.log_level);
    info!("Starting federation-host v{}", env!("CARGO_PKG_VERSION"));
    if let Some(e) = load_error {
        warn!("Failed to load config, using defaults: {:#}", e);
    }

    let instance = host::build_instance(&config)?;
    info!(
        "Host '{}' v{} with {} remote(s)",
        instance.name(),
        instance.version(),
        instance.remotes().len()
    );

    for report in host::prefetch_remotes(&instance).await {
        match report.result {
            Ok(summary) => info!("Remote '{}' ready: {}", report.alias, summary),
            Err(e) => warn!("Remote '{}' unavailable: {}", report.alias, e),
        }
    }

    for (key, version) in host::resolve_shared(&instance, &config) {
        info!("Shared '{}' resolves to {}", key, version);
    }

    for (id, assets) in host::preload_assets(&instance, &config) {
        if assets.is_empty() {
            warn!("No SSR assets for '{}'", id);
        } else {
            info!("SSR assets for '{}': {}", id, render_assets(&assets));
        }
    }

    info!("Host startup complete");
    Ok(())
}
