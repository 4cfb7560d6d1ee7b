//! Configuration file loading and management
//!
//! This module handles loading and parsing the host configuration from
//! `$XDG_CONFIG_HOME/federation-host/config.toml`. If the configuration file
//! doesn't exist, a default configuration is created with documented comments.

use anyhow::{Context, Result};
use federation_runtime::{
    parse_version, ModuleId, RangeMissPolicy, RemoteSpec, ShareStrategy, SharedConfig,
    VersionRange, DEFAULT_SCOPE,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main host configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Host identity and resolution policy
    pub host: HostConfig,
    /// Remotes by alias
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteConfig>,
    /// Shared dependencies the host provides, by share key
    #[serde(default)]
    pub shared: BTreeMap<String, SharedDependencyConfig>,
    /// Server-side rendering options
    #[serde(default)]
    pub ssr: SsrConfig,
    /// Manifest fetching options
    #[serde(default)]
    pub http: HttpConfig,
}

/// Host identity and resolution policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Host name
    /// Default: "host"
    pub name: String,
    /// Host version, part of every data-fetch key
    /// Default: "0.1.0"
    pub version: String,
    /// Log level (trace, debug, info, warn, error)
    /// Default: "info"
    pub log_level: String,
    /// Strategy used when resolving shared dependencies
    #[serde(default)]
    pub share_strategy: ShareStrategy,
    /// Behavior when no provided version satisfies a non-strict request
    #[serde(default)]
    pub on_range_miss: RangeMissPolicy,
}

/// A remote declaration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    /// `name@manifest-url`, or a bare manifest url
    pub entry: String,
}

/// A shared dependency provided by the host
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SharedDependencyConfig {
    /// Provided version
    pub version: String,
    #[serde(default)]
    pub singleton: bool,
    #[serde(default)]
    pub strict_version: bool,
    /// Instantiate at startup
    #[serde(default)]
    pub eager: bool,
    /// Range the host itself requires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_version: Option<String>,
    /// Share scope; defaults to "default"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Only versions in this range may be provided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,
    /// Versions in this range are never provided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,
}

/// Server-side rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SsrConfig {
    /// Module ids (`remote/Expose`) whose assets are collected at startup
    #[serde(default)]
    pub preload: Vec<String>,
    #[serde(default = "default_true")]
    pub inject_script: bool,
    #[serde(default = "default_true")]
    pub inject_link: bool,
}

/// Manifest fetching configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    /// Request timeout in seconds
    /// Default: 30
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: HostConfig::default(),
            remotes: BTreeMap::new(),
            shared: BTreeMap::new(),
            ssr: SsrConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: "host".to_string(),
            version: "0.1.0".to_string(),
            log_level: "info".to_string(),
            share_strategy: ShareStrategy::default(),
            on_range_miss: RangeMissPolicy::default(),
        }
    }
}

impl Default for SsrConfig {
    fn default() -> Self {
        Self {
            preload: Vec::new(),
            inject_script: true,
            inject_link: true,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl SharedDependencyConfig {
    /// Share scope of this dependency.
    pub fn scope(&self) -> &str {
        self.scope.as_deref().unwrap_or(DEFAULT_SCOPE)
    }

    /// Required range, if one is configured.
    pub fn required_range(&self) -> Result<Option<VersionRange>> {
        parse_range(self.required_version.as_deref())
    }

    /// Registration options for the share registry.
    pub fn to_shared_config(&self, from: &str) -> Result<SharedConfig> {
        let mut shared = SharedConfig::new(self.version.clone()).from_bundle(from);
        if self.singleton {
            shared = shared.singleton();
        }
        if self.strict_version {
            shared = shared.strict_version();
        }
        if self.eager {
            shared = shared.eager();
        }
        if let Some(range) = self.required_range()? {
            shared = shared.required_version(range);
        }
        if let Some(range) = parse_range(self.include.as_deref())? {
            shared = shared.include(range);
        }
        if let Some(range) = parse_range(self.exclude.as_deref())? {
            shared = shared.exclude(range);
        }
        Ok(shared)
    }
}

fn parse_range(range: Option<&str>) -> Result<Option<VersionRange>> {
    range
        .map(|r| VersionRange::parse(r).with_context(|| format!("Invalid version range: {r}")))
        .transpose()
}

impl Config {
    /// Load configuration from the specified path
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// The parsed configuration or an error if loading/parsing fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// Get the default configuration file path
    ///
    /// Returns `$XDG_CONFIG_HOME/federation-host/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "federation-host")
            .context("Failed to determine project directories")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Create a default configuration file with documented comments
    pub fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    /// Generate the default configuration file content with comments
    fn default_config_content() -> &'static str {
        r#"# Federation Host Configuration
# This file configures which remotes the host loads and which shared
# dependencies it provides.

[host]
# Host name and version. The version is part of every data-fetch key.
name = "host"
version = "0.1.0"

# Log level: trace, debug, info, warn, error
# Default: "info" (set FEDERATION_DEBUG=1 to force debug)
log_level = "info"

# Shared dependency resolution: "version-first" or "loaded-first"
share_strategy = "version-first"

# When no provided version satisfies a non-strict requirement:
# "highest-available" (use the highest, with a warning) or "fail"
on_range_miss = "highest-available"

# Remotes, keyed by the alias modules are imported under.
# [remotes.remote]
# entry = "provider@http://localhost:5002/mf-manifest.json"

# Shared dependencies provided by this host, keyed by share key.
# [shared.react]
# version = "18.2.0"
# singleton = true
# required_version = "^18.0.0"
# scope = "default"
# include = ">=18.0.0"
# exclude = "18.0.0-beta.1"

[ssr]
# Module ids whose SSR assets are collected at startup
preload = []
inject_script = true
inject_link = true

[http]
# Manifest request timeout in seconds
timeout_secs = 30
"#
    }

    /// Validate the configuration
    ///
    /// Ensures all configuration values are valid and within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        if self.host.name.trim().is_empty() {
            anyhow::bail!("host.name cannot be empty");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.host.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log_level: {}. Must be one of: {}",
                self.host.log_level,
                valid_log_levels.join(", ")
            );
        }

        if self.http.timeout_secs == 0 {
            anyhow::bail!("http.timeout_secs must be greater than 0");
        }

        let remotes = self.remote_specs()?;

        for (key, shared) in &self.shared {
            parse_version(&shared.version)
                .with_context(|| format!("Shared '{}': invalid version", key))?;
            shared
                .to_shared_config(&self.host.name)
                .with_context(|| format!("Shared '{}': invalid range", key))?;
        }

        for id in &self.ssr.preload {
            let module = ModuleId::parse(id)
                .with_context(|| format!("Invalid ssr.preload entry: {}", id))?;
            if !remotes.iter().any(|r| r.answers_to(&module.remote)) {
                anyhow::bail!(
                    "ssr.preload entry '{}' names unknown remote '{}'",
                    id,
                    module.remote
                );
            }
        }

        Ok(())
    }

    /// Parsed remote declarations, in alias order.
    pub fn remote_specs(&self) -> Result<Vec<RemoteSpec>> {
        self.remotes
            .iter()
            .map(|(alias, remote)| {
                RemoteSpec::parse(alias, &remote.entry)
                    .with_context(|| format!("Remote '{}': invalid entry", alias))
            })
            .collect()
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn load_str(content: &str) -> Result<Config> {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        Config::load(temp_file.path())
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host.name, "host");
        assert_eq!(config.host.log_level, "info");
        assert_eq!(config.host.share_strategy, ShareStrategy::VersionFirst);
        assert_eq!(config.host.on_range_miss, RangeMissPolicy::HighestAvailable);
        assert_eq!(config.http.timeout_secs, 30);
        assert!(config.ssr.inject_script && config.ssr.inject_link);
        assert!(config.remotes.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_file_parses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        Config::create_default_file(&path).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_full_config() {
        let config = load_str(
            r#"
[host]
name = "shell"
version = "2.0.0"
log_level = "debug"
share_strategy = "loaded-first"
on_range_miss = "fail"

[remotes.remote]
entry = "provider@http://localhost:5002/mf-manifest.json"

[shared.react]
version = "18.2.0"
singleton = true
required_version = "^18.0.0"
exclude = "18.0.0-beta.1"

[shared.lodash]
version = "4.17.21"
scope = "legacy"
eager = true

[ssr]
preload = ["remote/Content", "provider/Button"]
inject_script = false
"#,
        )
        .unwrap();

        assert_eq!(config.host.share_strategy, ShareStrategy::LoadedFirst);
        assert_eq!(config.host.on_range_miss, RangeMissPolicy::Fail);
        assert_eq!(config.shared["react"].scope(), DEFAULT_SCOPE);
        assert_eq!(config.shared["lodash"].scope(), "legacy");
        assert!(!config.ssr.inject_script);
        assert!(config.ssr.inject_link);

        let specs = config.remote_specs().unwrap();
        assert_eq!(specs[0].name, "provider");
        assert_eq!(specs[0].alias, "remote");

        let react = config.shared["react"].to_shared_config("shell").unwrap();
        assert!(react.singleton);
        assert_eq!(react.from.as_deref(), Some("shell"));
        assert!(react.filter.is_some());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.host.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.http.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_shared_version() {
        let mut config = Config::default();
        config.shared.insert(
            "react".to_string(),
            SharedDependencyConfig {
                version: "eighteen".to_string(),
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());

        config.shared.insert(
            "react".to_string(),
            SharedDependencyConfig {
                version: "18.2.0".to_string(),
                required_version: Some(">>18".to_string()),
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_preload_unknown_remote() {
        let mut config = Config::default();
        config.ssr.preload.push("ghost/Button".to_string());
        assert!(config.validate().is_err());

        config.remotes.insert(
            "ghost".to_string(),
            RemoteConfig {
                entry: "ghost@http://localhost:9/m.json".to_string(),
            },
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.host.log_level = "debug".to_string();
        config.shared.insert(
            "react".to_string(),
            SharedDependencyConfig {
                version: "18.2.0".to_string(),
                singleton: true,
                ..Default::default()
            },
        );

        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, deserialized);
    }
}
