//! Candidate enumeration and the registration record built for each one.

use std::path::{Path, PathBuf};

use plugctl_core::{ClassificationTable, DependencyResolver, NewPlugin, OwnedTables};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::LifecycleError;
use crate::manifest::PluginManifest;

/// A plugin directory found under the plugins root.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Directory name. Doubles as the plugin name.
    pub name: String,
    pub path: PathBuf,
    pub manifest: Option<PluginManifest>,
}

impl Candidate {
    pub fn load(path: PathBuf) -> Result<Self, LifecycleError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let manifest = PluginManifest::load(&path)?;
        Ok(Self {
            name,
            path,
            manifest,
        })
    }
}

/// Listing row for `scan_candidates`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateInfo {
    pub name: String,
    pub path: PathBuf,
    pub has_manifest: bool,
    pub version: Option<String>,
    pub category: Option<String>,
    pub registered: bool,
}

/// Directories under `root` whose name matches `pattern`, sorted by path.
///
/// A missing root is an empty plugin set, not an error.
pub fn candidate_dirs(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, LifecycleError> {
    if !root.is_dir() {
        warn!(root = %root.display(), "plugins directory does not exist");
        return Ok(Vec::new());
    }
    let full = format!(
        "{}/{}",
        glob::Pattern::escape(&root.to_string_lossy()),
        pattern
    );
    let paths = glob::glob(&full).map_err(|err| LifecycleError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: err.to_string(),
    })?;

    let mut out = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if path.is_dir() => out.push(path),
            Ok(path) => debug!(path = %path.display(), "skipping non-directory candidate"),
            Err(err) => warn!(error = %err, "unreadable candidate path"),
        }
    }
    out.sort();
    Ok(out)
}

/// Category for a plugin nobody classified.
pub fn infer_category(name: &str) -> &'static str {
    if name.starts_with("ar") {
        "integration"
    } else if name.starts_with("sf") {
        "core"
    } else if name.to_lowercase().contains("theme") {
        "theme"
    } else {
        plugctl_core::models::DEFAULT_CATEGORY
    }
}

/// Builds the registration for `name`.
///
/// The classification table wins over the manifest, which wins over
/// inferred defaults. Dependencies come from the table when it declares any
/// for `name`, otherwise from the manifest.
pub fn registration_for(
    name: &str,
    location: Option<&Path>,
    manifest: Option<&PluginManifest>,
    table: &ClassificationTable,
    is_active: bool,
    resolver: &DependencyResolver,
) -> Result<NewPlugin, LifecycleError> {
    let mut plugin = NewPlugin::new(name);
    plugin.location = location.map(|p| p.display().to_string());
    plugin.is_core = table.is_core(name);
    plugin.is_enabled = is_active;

    plugin.category = table
        .category_of(name)
        .map(str::to_string)
        .or_else(|| manifest.and_then(|m| m.category.clone()))
        .unwrap_or_else(|| infer_category(name).to_string());
    plugin.description = table
        .description_of(name)
        .map(str::to_string)
        .or_else(|| manifest.and_then(|m| m.description.clone()));

    if let Some(manifest) = manifest {
        plugin.version = manifest.version.clone();
        if let Some(implementation) = &manifest.implementation {
            plugin.implementation_reference = implementation.clone();
        }
        plugin.hooks = manifest.hooks.clone();
        plugin.settings = manifest.settings.clone();
    }

    plugin.owned_tables = match table.owned_tables_of(name) {
        Some(tables) => OwnedTables::new(tables)?,
        None => match manifest {
            Some(m) => OwnedTables::new(&m.owned_tables)?,
            None => OwnedTables::default(),
        },
    };

    plugin.dependencies = if table.declares_dependencies(name) {
        table.dependencies_of(name)
    } else {
        manifest.map(PluginManifest::dependency_specs).unwrap_or_default()
    };

    plugin.load_order = resolver.compute_load_order(&plugin, table);
    Ok(plugin)
}
