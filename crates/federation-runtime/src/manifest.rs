//! Remote snapshot (manifest) parsing.
//!
//! Every remote publishes a JSON manifest describing its public path, its
//! entry script and the assets of each exposed module. Once loaded the
//! snapshot is treated as authoritative and immutable.

use crate::error::{FederationError, FederationResult};
use serde::{Deserialize, Serialize};

/// A remote's published manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSnapshot {
    /// Remote name (the container's global name).
    pub name: String,

    /// Version string of the remote build.
    #[serde(default)]
    pub version: String,

    /// Prefix prepended to every asset path.
    #[serde(default)]
    pub public_path: String,

    /// File name of the remote entry script.
    #[serde(rename = "remoteEntry")]
    pub remote_entry_filename: String,

    /// Exposed modules, in declaration order.
    #[serde(default)]
    pub modules: Vec<ExposedModule>,
}

/// One exposed module and its assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposedModule {
    /// Expose path, e.g. `./Component`.
    pub module_path: String,

    #[serde(default)]
    pub assets: ModuleAssets,
}

/// Style and script assets of an exposed module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleAssets {
    #[serde(default)]
    pub css: AssetGroup,
    #[serde(default)]
    pub js: AssetGroup,
}

/// Assets needed synchronously on first render and those loaded lazily.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetGroup {
    #[serde(default)]
    pub sync: Vec<String>,
    #[serde(default)]
    pub r#async: Vec<String>,
}

impl RemoteSnapshot {
    /// Parse a snapshot from JSON text.
    pub fn from_json(content: &str) -> FederationResult<Self> {
        let snapshot: RemoteSnapshot = serde_json::from_str(content)
            .map_err(|e| FederationError::InvalidManifest(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Parse a snapshot from raw JSON bytes.
    pub fn from_slice(content: &[u8]) -> FederationResult<Self> {
        let snapshot: RemoteSnapshot = serde_json::from_slice(content)
            .map_err(|e| FederationError::InvalidManifest(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    fn validate(&self) -> FederationResult<()> {
        if self.name.is_empty() {
            return Err(FederationError::InvalidManifest(
                "Remote name cannot be empty".to_string(),
            ));
        }

        if self.remote_entry_filename.is_empty() {
            return Err(FederationError::InvalidManifest(format!(
                "Remote '{}' has no remoteEntry",
                self.name
            )));
        }

        Ok(())
    }

    /// Find an exposed module. `./Button` and `Button` name the same module.
    pub fn find_module(&self, expose: &str) -> Option<&ExposedModule> {
        let wanted = strip_expose_prefix(expose);
        self.modules
            .iter()
            .find(|m| strip_expose_prefix(&m.module_path) == wanted)
    }

    /// Absolute URL of the remote entry script.
    pub fn remote_entry_url(&self) -> String {
        self.asset_url(&self.remote_entry_filename)
    }

    /// Absolute URL of an asset path declared in this snapshot.
    pub fn asset_url(&self, path: &str) -> String {
        format!("{}{}", self.public_path, path)
    }
}

fn strip_expose_prefix(expose: &str) -> &str {
    expose.strip_prefix("./").unwrap_or(expose)
}
