//! Error types for the federation runtime.

use thiserror::Error;

/// Errors that can occur while resolving shared dependencies or remotes.
///
/// The type is `Clone` so a single failure can be handed to every caller
/// waiting on the same in-flight operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FederationError {
    /// No registered version is acceptable under `strictVersion`, or an
    /// active singleton does not satisfy a strict requirement.
    #[error("Version conflict for {scope}/{key}: required {required}, found {found}")]
    VersionConflict {
        scope: String,
        key: String,
        required: String,
        found: String,
    },

    /// Nothing was ever provided under the requested key.
    #[error("Shared module {scope}/{key} is not provided")]
    ShareNotFound { scope: String, key: String },

    /// Retrieving a remote snapshot failed.
    #[error("Failed to fetch manifest: {0}")]
    ManifestFetch(String),

    /// The snapshot was fetched but the requested entry is absent.
    #[error("Manifest entry not found: {0}")]
    ManifestNotFound(String),

    /// The snapshot could not be parsed or failed validation.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// The loader rejected or resolved without the expected export.
    #[error("Module load failed: {0}")]
    ModuleLoad(String),

    /// The data-fetch function rejected or could not be located.
    #[error("Data fetch failed: {0}")]
    DataFetch(String),

    /// A remote declaration could not be parsed.
    #[error("Invalid remote: {0}")]
    InvalidRemote(String),

    /// A version or version range could not be parsed.
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),
}

/// Coarse category of a [`FederationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    VersionConflict,
    ShareNotFound,
    ManifestFetch,
    ManifestNotFound,
    InvalidManifest,
    ModuleLoad,
    DataFetch,
    InvalidInput,
}

impl FederationError {
    /// Category of this error, for callers that branch on failure type.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FederationError::VersionConflict { .. } => ErrorKind::VersionConflict,
            FederationError::ShareNotFound { .. } => ErrorKind::ShareNotFound,
            FederationError::ManifestFetch(_) => ErrorKind::ManifestFetch,
            FederationError::ManifestNotFound(_) => ErrorKind::ManifestNotFound,
            FederationError::InvalidManifest(_) | FederationError::Json(_) => {
                ErrorKind::InvalidManifest
            }
            FederationError::ModuleLoad(_) => ErrorKind::ModuleLoad,
            FederationError::DataFetch(_) => ErrorKind::DataFetch,
            FederationError::InvalidRemote(_) | FederationError::InvalidVersion(_) => {
                ErrorKind::InvalidInput
            }
        }
    }

    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FederationError::ManifestFetch(_)
                | FederationError::ModuleLoad(_)
                | FederationError::DataFetch(_)
        )
    }
}

impl From<serde_json::Error> for FederationError {
    fn from(err: serde_json::Error) -> Self {
        FederationError::Json(err.to_string())
    }
}

/// Result type for federation operations.
pub type FederationResult<T> = std::result::Result<T, FederationError>;
