//! Remote declarations and module identifiers.

use crate::error::{FederationError, FederationResult};
use crate::manifest::RemoteSnapshot;
use std::fmt;
use std::sync::Arc;

/// A remote as declared by a host: `alias -> name@manifest-url`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteSpec {
    /// Local alias the host imports the remote under.
    pub alias: String,
    /// The remote's own name.
    pub name: String,
    /// URL of the remote's manifest.
    pub entry: String,
}

impl RemoteSpec {
    /// Parse an `alias = "name@url"` declaration. A bare URL uses the alias
    /// as the remote name.
    pub fn parse(alias: &str, declaration: &str) -> FederationResult<Self> {
        let alias = alias.trim();
        let declaration = declaration.trim();
        if alias.is_empty() {
            return Err(FederationError::InvalidRemote(format!(
                "Remote alias cannot be empty: {declaration}"
            )));
        }

        let (name, entry) = match declaration.split_once('@') {
            // `@scope/pkg@url` style names keep their leading `@`.
            Some(("", rest)) => match rest.split_once('@') {
                Some((scoped, url)) => (format!("@{scoped}"), url),
                None => (alias.to_string(), declaration),
            },
            Some((name, url)) if !name.contains("://") => (name.to_string(), url),
            _ => (alias.to_string(), declaration),
        };

        if entry.is_empty() {
            return Err(FederationError::InvalidRemote(format!(
                "Remote '{alias}' has no manifest url"
            )));
        }

        Ok(Self {
            alias: alias.to_string(),
            name,
            entry: entry.to_string(),
        })
    }

    /// Key under which the snapshot of this remote is memoized.
    pub fn snapshot_key(&self) -> String {
        format!("{}@{}", self.name, self.entry)
    }

    /// Whether `request` names this remote by name or alias.
    pub fn answers_to(&self, request: &str) -> bool {
        self.name == request || self.alias == request
    }
}

/// A request for an exposed module, e.g. `remoteApp/Component`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleId {
    /// Remote name or alias.
    pub remote: String,
    /// Expose path, always starting with `./`.
    pub expose: String,
}

impl ModuleId {
    /// Parse `remote/expose`. Scoped names (`@org/remote/expose`) are
    /// supported.
    pub fn parse(id: &str) -> FederationResult<Self> {
        let id = id.trim();
        let split = if id.starts_with('@') {
            id.match_indices('/').nth(1).map(|(i, _)| i)
        } else {
            id.find('/')
        };

        let (remote, expose) = match split {
            Some(i) => (&id[..i], &id[i + 1..]),
            None => {
                return Err(FederationError::InvalidRemote(format!(
                    "Module id '{id}' has no expose path"
                )))
            }
        };
        let expose = expose.trim_start_matches("./");
        if remote.is_empty() || expose.is_empty() {
            return Err(FederationError::InvalidRemote(format!(
                "Module id '{id}' is incomplete"
            )));
        }

        Ok(Self {
            remote: remote.to_string(),
            expose: format!("./{expose}"),
        })
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.remote,
            self.expose.trim_start_matches("./")
        )
    }
}

/// A remote whose snapshot is already resident, matched to an expose.
#[derive(Debug, Clone)]
pub struct LoadedRemoteInfo {
    pub name: String,
    pub alias: String,
    pub expose: String,
    pub version: String,
    pub snapshot: Arc<RemoteSnapshot>,
}

impl LoadedRemoteInfo {
    pub fn new(spec: &RemoteSpec, expose: &str, snapshot: Arc<RemoteSnapshot>) -> Self {
        Self {
            name: spec.name.clone(),
            alias: spec.alias.clone(),
            expose: expose.to_string(),
            version: snapshot.version.clone(),
            snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remote_spec() {
        let spec = RemoteSpec::parse("remote", "provider@http://localhost:5002/mf-manifest.json")
            .unwrap();
        assert_eq!(spec.alias, "remote");
        assert_eq!(spec.name, "provider");
        assert_eq!(spec.entry, "http://localhost:5002/mf-manifest.json");
        assert!(spec.answers_to("remote"));
        assert!(spec.answers_to("provider"));
    }

    #[test]
    fn test_parse_bare_url_and_scoped_name() {
        let bare = RemoteSpec::parse("cdn", "https://cdn.example.com/mf-manifest.json").unwrap();
        assert_eq!(bare.name, "cdn");
        assert_eq!(bare.entry, "https://cdn.example.com/mf-manifest.json");

        let scoped = RemoteSpec::parse("ui", "@acme/ui@https://ui.example.com/m.json").unwrap();
        assert_eq!(scoped.name, "@acme/ui");
        assert_eq!(scoped.entry, "https://ui.example.com/m.json");

        assert!(RemoteSpec::parse("", "x@y").is_err());
        assert!(RemoteSpec::parse("x", "name@").is_err());
    }

    #[test]
    fn test_parse_module_id() {
        let id = ModuleId::parse("remoteApp/Component").unwrap();
        assert_eq!(id.remote, "remoteApp");
        assert_eq!(id.expose, "./Component");
        assert_eq!(id.to_string(), "remoteApp/Component");

        let nested = ModuleId::parse("@acme/ui/widgets/Button").unwrap();
        assert_eq!(nested.remote, "@acme/ui");
        assert_eq!(nested.expose, "./widgets/Button");

        assert!(ModuleId::parse("remoteApp").is_err());
        assert!(ModuleId::parse("remoteApp/").is_err());
    }
}
