//! Lifecycle error taxonomy.

use std::path::PathBuf;

use plugctl_core::{ModelError, PluginStatus, ResolveError};
use plugctl_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("plugin {0:?} not found")]
    NotFound(String),
    #[error("{0} already registered")]
    DuplicateKey(String),
    #[error("plugin {0:?} is locked")]
    LockedPlugin(String),
    #[error("plugin {plugin:?} requires disabled plugins: {}", .missing.join(", "))]
    MissingDependency {
        plugin: String,
        missing: Vec<String>,
    },
    #[error("plugin {plugin:?} is required by enabled plugins: {}", .dependents.join(", "))]
    DependentsStillEnabled {
        plugin: String,
        dependents: Vec<String>,
    },
    #[error("plugin {plugin:?} still holds {records} record(s) in its tables")]
    HasRecords { plugin: String, records: i64 },
    #[error("cannot {action} plugin {plugin:?} while {status}")]
    InvalidTransition {
        plugin: String,
        action: &'static str,
        status: PluginStatus,
    },
    #[error("concurrent update: {0}")]
    Conflict(String),
    #[error("dependency cycle among: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),
    #[error("no candidate directory for {name:?} under {}", .root.display())]
    CandidateNotFound { name: String, root: PathBuf },
    #[error("invalid candidate pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("invalid manifest {}: {reason}", .path.display())]
    InvalidManifest { path: PathBuf, reason: String },
    #[error("backup of {plugin:?} failed: {reason}")]
    BackupFailure { plugin: String, reason: String },
    #[error("restore from {} failed: {reason}", .artifact.display())]
    RestoreFailure { artifact: PathBuf, reason: String },
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("store: {0}")]
    Store(DbError),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl LifecycleError {
    /// Expected outcomes a batch caller reports per item instead of aborting.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::DuplicateKey(_)
                | Self::LockedPlugin(_)
                | Self::MissingDependency { .. }
                | Self::DependentsStillEnabled { .. }
                | Self::HasRecords { .. }
                | Self::InvalidTransition { .. }
                | Self::Model(_)
        )
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

impl From<DbError> for LifecycleError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::PluginNotFound(name) => Self::NotFound(name),
            DbError::PluginAlreadyExists(name) => Self::DuplicateKey(format!("plugin {name:?}")),
            DbError::DependencyAlreadyExists { plugin, requires } => {
                Self::DuplicateKey(format!("dependency {plugin:?} -> {requires:?}"))
            }
            err @ DbError::StaleRevision { .. } => Self::Conflict(err.to_string()),
            DbError::Model(err) => Self::Model(err),
            other => Self::Store(other),
        }
    }
}

impl From<ResolveError> for LifecycleError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Cycle(nodes) => Self::DependencyCycle(nodes),
        }
    }
}

/// Failures surfaced by [`crate::PluginBridge`]'s fallible accessors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("plugin store unavailable: {0}")]
    StoreUnavailable(String),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_onto_taxonomy() {
        let err: LifecycleError = DbError::PluginNotFound("acl".into()).into();
        assert!(matches!(err, LifecycleError::NotFound(ref n) if n == "acl"));
        assert!(err.is_validation());

        let err: LifecycleError = DbError::PluginAlreadyExists("acl".into()).into();
        assert!(matches!(err, LifecycleError::DuplicateKey(_)));
        assert!(err.to_string().contains("acl"));

        let err: LifecycleError = DbError::StaleRevision {
            name: "acl".into(),
            expected: 3,
        }
        .into();
        assert!(matches!(err, LifecycleError::Conflict(_)));
        assert!(!err.is_validation());

        let err: LifecycleError = DbError::Validation("bad".into()).into();
        assert!(matches!(err, LifecycleError::Store(_)));
    }

    #[test]
    fn data_safety_failures_are_not_validation() {
        let err = LifecycleError::BackupFailure {
            plugin: "acl".into(),
            reason: "disk full".into(),
        };
        assert!(!err.is_validation());
        let err = LifecycleError::RestoreFailure {
            artifact: PathBuf::from("/b/acl.json"),
            reason: "truncated".into(),
        };
        assert!(!err.is_validation());
        assert!(err.to_string().contains("/b/acl.json"));
    }

    #[test]
    fn missing_dependency_lists_names() {
        let err = LifecycleError::MissingDependency {
            plugin: "security-clearance".into(),
            missing: vec!["acl".into(), "search".into()],
        };
        assert_eq!(
            err.to_string(),
            "plugin \"security-clearance\" requires disabled plugins: acl, search"
        );
    }
}
