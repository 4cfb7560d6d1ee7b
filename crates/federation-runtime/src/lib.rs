//! # federation-runtime
//!
//! Runtime core for hosts that load modules from independently deployed
//! remotes while sharing common dependencies between them.
//!
//! This crate provides:
//! - Share scopes and version resolution for shared dependencies
//! - npm-style version ranges
//! - Remote snapshot (manifest) parsing and fetching
//! - A snapshot loader that runs at most one fetch per remote
//! - The owned [`FederationInstance`] context tying these together
//!
//! ## Diagnostics
//!
//! Filter rejections, singleton mismatches and version fallbacks are reported
//! through an injected [`DiagnosticSink`]. The default sink logs them with
//! `tracing`; tests use [`RecordingSink`] to assert on them.

pub mod diagnostics;
pub mod error;
pub mod fetch;
pub mod instance;
pub mod loader;
pub mod manifest;
pub mod remote;
pub mod share;
pub mod version;

pub use diagnostics::{Diagnostic, DiagnosticSink, FilterReason, RecordingSink, TracingSink};
pub use error::{ErrorKind, FederationError, FederationResult};
pub use fetch::{HttpSnapshotFetcher, SnapshotFetcher, StaticSnapshotFetcher};
pub use instance::FederationInstance;
pub use loader::SnapshotLoader;
pub use manifest::{AssetGroup, ExposedModule, ModuleAssets, RemoteSnapshot};
pub use remote::{LoadedRemoteInfo, ModuleId, RemoteSpec};
pub use share::{
    ProvideOutcome, RangeMissPolicy, ResolveRequest, ShareFactory, ShareRegistry, ShareStrategy,
    SharedConfig, SharedModule, SharedRecord, DEFAULT_SCOPE,
};
pub use version::{parse_version, VersionRange};
