//! Side-channel diagnostics emitted by the share registry.
//!
//! Diagnostics never change control flow. They are delivered to an injected
//! [`DiagnosticSink`] so hosts can route them to logs and tests can assert on
//! them deterministically.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// A warning produced while providing or resolving shared modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A provided version failed its include filter or matched its exclude
    /// filter and was not stored.
    FilterRejected {
        scope: String,
        key: String,
        version: String,
        reason: FilterReason,
    },

    /// A singleton was provided together with a version filter.
    SingletonFiltered {
        scope: String,
        key: String,
        version: String,
    },

    /// The active singleton does not satisfy the requested range.
    SingletonMismatch {
        scope: String,
        key: String,
        active: String,
        required: String,
    },

    /// Another version of an already active singleton was provided.
    SingletonAlreadyActive {
        scope: String,
        key: String,
        active: String,
        provided: String,
    },

    /// No candidate satisfied the range; the highest version was used.
    VersionFallback {
        scope: String,
        key: String,
        required: String,
        chosen: String,
    },

    /// The same (scope, key, version) was provided twice.
    DuplicateProvide {
        scope: String,
        key: String,
        version: String,
        replaced: bool,
    },
}

/// Which filter rejected a provided version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    Include,
    Exclude,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::FilterRejected {
                scope,
                key,
                version,
                reason: FilterReason::Include,
            } => write!(
                f,
                "{scope}/{key}@{version} does not satisfy include filter, skipped"
            ),
            Diagnostic::FilterRejected {
                scope,
                key,
                version,
                reason: FilterReason::Exclude,
            } => write!(f, "{scope}/{key}@{version} matches exclude filter, skipped"),
            Diagnostic::SingletonFiltered {
                scope,
                key,
                version,
            } => write!(
                f,
                "{scope}/{key}@{version} is a singleton with include/exclude version filters; \
                 filtering a singleton can load multiple versions"
            ),
            Diagnostic::SingletonMismatch {
                scope,
                key,
                active,
                required,
            } => write!(
                f,
                "singleton version mismatch for {scope}/{key}: active {active} does not satisfy {required}"
            ),
            Diagnostic::SingletonAlreadyActive {
                scope,
                key,
                active,
                provided,
            } => write!(
                f,
                "singleton {scope}/{key} already active at {active}, {provided} will not be used"
            ),
            Diagnostic::VersionFallback {
                scope,
                key,
                required,
                chosen,
            } => write!(
                f,
                "no version of {scope}/{key} satisfies {required}, falling back to {chosen}"
            ),
            Diagnostic::DuplicateProvide {
                scope,
                key,
                version,
                replaced,
            } => write!(
                f,
                "{scope}/{key}@{version} provided twice ({})",
                if *replaced { "factory replaced" } else { "kept loaded module" }
            ),
        }
    }
}

/// Observer receiving registry diagnostics.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, diagnostic: Diagnostic);
}

/// Default sink: forwards every diagnostic to `tracing` at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        warn!(target: "federation::share", "{}", diagnostic);
    }
}

/// Sink that keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    recorded: Mutex<Vec<Diagnostic>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return everything emitted so far.
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.recorded.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiagnosticSink for RecordingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }
}
