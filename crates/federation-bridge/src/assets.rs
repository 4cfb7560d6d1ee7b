//! Asset collection for server-rendered output.
//!
//! Given a loaded remote, the collector lists the style and script resources
//! an exposed module needs on first paint. It never fetches and never fails:
//! a module it cannot find simply has no assets.

use federation_runtime::{FederationInstance, LoadedRemoteInfo, ModuleId};
use serde::{Deserialize, Serialize};

/// Kind of an injectable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Stylesheet,
    Script,
}

/// A resource to inject into server-rendered markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub kind: AssetKind,
    /// Absolute URL of the resource.
    pub url: String,
}

impl AssetDescriptor {
    pub fn stylesheet(url: impl Into<String>) -> Self {
        Self {
            kind: AssetKind::Stylesheet,
            url: url.into(),
        }
    }

    pub fn script(url: impl Into<String>) -> Self {
        Self {
            kind: AssetKind::Script,
            url: url.into(),
        }
    }

    /// Render the descriptor as an HTML tag.
    pub fn to_html(&self) -> String {
        let url = escape_attribute(&self.url);
        match self.kind {
            AssetKind::Stylesheet => format!(r#"<link rel="stylesheet" href="{url}">"#),
            AssetKind::Script => format!(r#"<script async src="{url}"></script>"#),
        }
    }
}

/// Which resource kinds to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectOptions {
    pub inject_script: bool,
    pub inject_link: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            inject_script: true,
            inject_link: true,
        }
    }
}

/// Collect the assets of `exposed_id` (e.g. `remoteApp/Component`).
///
/// Stylesheets come first, async before sync. Scripts follow: the remote
/// entry, then the module's sync scripts. Async scripts are left to the
/// client.
pub fn collect_ssr_assets(
    exposed_id: &str,
    info: Option<&LoadedRemoteInfo>,
    options: CollectOptions,
) -> Vec<AssetDescriptor> {
    let Some(info) = info else {
        return Vec::new();
    };
    let Ok(id) = ModuleId::parse(exposed_id) else {
        return Vec::new();
    };
    if id.remote != info.name && id.remote != info.alias {
        return Vec::new();
    }

    let snapshot = &info.snapshot;
    let Some(module) = snapshot.find_module(&id.expose) else {
        return Vec::new();
    };

    let mut assets = Vec::new();
    if options.inject_link {
        let css = &module.assets.css;
        assets.extend(
            css.r#async
                .iter()
                .chain(&css.sync)
                .map(|path| AssetDescriptor::stylesheet(snapshot.asset_url(path))),
        );
    }
    if options.inject_script {
        assets.push(AssetDescriptor::script(snapshot.remote_entry_url()));
        assets.extend(
            module
                .assets
                .js
                .sync
                .iter()
                .map(|path| AssetDescriptor::script(snapshot.asset_url(path))),
        );
    }
    assets
}

/// Collect from whatever `instance` has already loaded for `exposed_id`.
pub fn collect_instance_assets(
    instance: &FederationInstance,
    exposed_id: &str,
    options: CollectOptions,
) -> Vec<AssetDescriptor> {
    let info = ModuleId::parse(exposed_id)
        .ok()
        .and_then(|id| instance.loaded_remote_info(&id));
    collect_ssr_assets(exposed_id, info.as_ref(), options)
}

/// Render a list of descriptors as concatenated HTML tags.
pub fn render_assets(assets: &[AssetDescriptor]) -> String {
    assets.iter().map(AssetDescriptor::to_html).collect()
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
