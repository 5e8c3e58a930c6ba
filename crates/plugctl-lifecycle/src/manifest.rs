//! Optional `plugin.yaml` shipped inside a candidate directory.

use std::path::{Path, PathBuf};

use plugctl_core::{DependencySpec, HookSpec, PluginSettings};
use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;

pub const MANIFEST_FILE: &str = "plugin.yaml";

/// A dependency written either as a bare name or as `{name, version}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestDependency {
    Name(String),
    Bounded {
        name: String,
        #[serde(default)]
        version: Option<String>,
    },
}

impl ManifestDependency {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Bounded { name, .. } => name,
        }
    }

    fn to_spec(&self, is_optional: bool) -> DependencySpec {
        let (requires, version_bounds) = match self {
            Self::Name(name) => (name.clone(), None),
            Self::Bounded { name, version } => (name.clone(), version.clone()),
        };
        DependencySpec {
            requires,
            is_optional,
            version_bounds,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginManifest {
    pub version: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    /// Handle the host loads the plugin by. Defaults to the directory name.
    pub implementation: Option<String>,
    pub dependencies: Vec<ManifestDependency>,
    pub optional_dependencies: Vec<ManifestDependency>,
    pub owned_tables: Vec<String>,
    pub hooks: Vec<HookSpec>,
    pub settings: PluginSettings,
}

impl PluginManifest {
    /// Reads `<dir>/plugin.yaml`. A directory without one yields `None`.
    pub fn load(dir: &Path) -> Result<Option<Self>, LifecycleError> {
        let path = dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|err| LifecycleError::io(format!("read {}", path.display()), err))?;
        Self::parse(&raw, path).map(Some)
    }

    pub fn parse(raw: &str, path: PathBuf) -> Result<Self, LifecycleError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|err| LifecycleError::InvalidManifest {
            path,
            reason: err.to_string(),
        })
    }

    /// Required edges first, then optional ones.
    pub fn dependency_specs(&self) -> Vec<DependencySpec> {
        self.dependencies
            .iter()
            .map(|dep| dep.to_spec(false))
            .chain(self.optional_dependencies.iter().map(|dep| dep.to_spec(true)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugctl_core::SettingValue;

    #[test]
    fn parses_full_manifest() {
        let raw = r#"
version: 2.1.0
category: security
description: Security clearance levels
implementation: ahgSecurityClearancePlugin
dependencies:
  - acl
  - name: search
    version: ">=1.2"
optional_dependencies:
  - audit-trail
owned_tables: [security_clearance, security_level]
hooks:
  - event_name: context.load_factories
    listener_reference: SecurityClearance::boot
    priority: 5
settings:
  strict: true
  max_level: 4
"#;
        let manifest = match PluginManifest::parse(raw, PathBuf::from("plugin.yaml")) {
            Ok(manifest) => manifest,
            Err(err) => panic!("parse: {err}"),
        };
        assert_eq!(manifest.version.as_deref(), Some("2.1.0"));
        assert_eq!(manifest.category.as_deref(), Some("security"));
        assert_eq!(manifest.owned_tables.len(), 2);
        assert_eq!(manifest.hooks[0].priority, 5);
        assert_eq!(
            manifest.settings.get("max_level"),
            Some(&SettingValue::Integer(4))
        );

        let specs = manifest.dependency_specs();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0], DependencySpec::required("acl"));
        assert_eq!(specs[1].version_bounds.as_deref(), Some(">=1.2"));
        assert!(!specs[1].is_optional);
        assert_eq!(specs[2], DependencySpec::optional("audit-trail"));
    }

    #[test]
    fn empty_manifest_is_default() {
        match PluginManifest::parse("  \n", PathBuf::from("plugin.yaml")) {
            Ok(manifest) => assert_eq!(manifest, PluginManifest::default()),
            Err(err) => panic!("parse: {err}"),
        }
    }

    #[test]
    fn malformed_manifest_reports_path() {
        match PluginManifest::parse("dependencies: {", PathBuf::from("/p/aclPlugin/plugin.yaml")) {
            Err(LifecycleError::InvalidManifest { path, .. }) => {
                assert_eq!(path, PathBuf::from("/p/aclPlugin/plugin.yaml"));
            }
            other => panic!("expected invalid manifest, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_none() {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => panic!("tempdir: {err}"),
        };
        match PluginManifest::load(dir.path()) {
            Ok(None) => {}
            other => panic!("expected no manifest, got {other:?}"),
        }
    }
}
