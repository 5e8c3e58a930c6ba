//! The lifecycle state machine.
//!
//! `LifecycleManager` is the only writer of registry state. Every mutation
//! runs its checks and writes inside one store transaction, so a rejected
//! or failed operation leaves the plugin exactly as it was.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use plugctl_core::{
    AuditAction, AuditContext, AuditEntry, ClassificationTable, Config, Dependency,
    DependencyGraph, DependencyResolver, Dependent, HookBinding, HookSpec, LoadOrderPolicy,
    ModelError, NewAuditEntry, NewPlugin, Plugin, PluginFilter, PluginSettings, PluginStatus,
    SettingValue, Violation,
};
use plugctl_db::{
    AuditRepository, Db, DependencyRepository, HookRepository, PluginRepository,
    SettingRepository, TableStore,
};
use tracing::{debug, info, warn};

use crate::backup::{BackupArchiver, BackupArtifact};
use crate::discovery::{candidate_dirs, registration_for, Candidate, CandidateInfo};
use crate::error::LifecycleError;
use crate::report::{
    BatchAction, BatchOutcome, BatchReport, DiscoveryReport, Transition, UninstallOutcome,
};

/// Host cache subdirectories derived from the enabled set.
const HOST_CACHE_DIRS: [&str; 2] = ["config", "routing"];

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub plugins_path: PathBuf,
    /// Glob matched against candidate directory names.
    pub pattern: String,
    /// Plugins the host already treats as active.
    pub active: Vec<String>,
    pub backup_root: PathBuf,
    pub backup_keep: usize,
    /// Host cache root. `None` disables cache invalidation.
    pub cache_path: Option<PathBuf>,
    pub classification: ClassificationTable,
    pub load_order: LoadOrderPolicy,
}

impl ManagerOptions {
    pub fn new(plugins_path: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        Self {
            plugins_path: plugins_path.into(),
            pattern: "*Plugin".into(),
            active: Vec::new(),
            backup_root: backup_root.into(),
            backup_keep: 5,
            cache_path: None,
            classification: ClassificationTable::default(),
            load_order: LoadOrderPolicy::default(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            plugins_path: cfg.plugins_path(),
            pattern: cfg.plugins.pattern.clone(),
            active: cfg.plugins.active.clone(),
            backup_root: cfg.backup_root(),
            backup_keep: cfg.backups.keep,
            cache_path: Some(cfg.cache_path()),
            classification: cfg.classification.clone(),
            load_order: cfg.load_order.clone(),
        }
    }
}

/// Store settings for a config, as the db crate wants them.
pub fn db_config(cfg: &Config) -> plugctl_db::Config {
    let mut db_cfg = plugctl_db::Config::new(cfg.database_path());
    db_cfg.busy_timeout_ms = cfg.database.busy_timeout_ms;
    db_cfg
}

pub struct LifecycleManager {
    db: Db,
    options: ManagerOptions,
    resolver: DependencyResolver,
    archiver: BackupArchiver,
}

impl LifecycleManager {
    pub fn new(db: Db, options: ManagerOptions) -> Self {
        let resolver = DependencyResolver::new(options.load_order.clone());
        let archiver = BackupArchiver::new(options.backup_root.clone());
        Self {
            db,
            options,
            resolver,
            archiver,
        }
    }

    /// Opens (creating if needed) and migrates the configured store.
    pub fn open(cfg: &Config) -> Result<Self, LifecycleError> {
        let mut db = Db::open(db_config(cfg))?;
        let applied = db.migrate_up()?;
        if applied > 0 {
            info!(applied, path = %db.path().display(), "store migrated");
        }
        Ok(Self::new(db, ManagerOptions::from_config(cfg)))
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    pub fn archiver(&self) -> &BackupArchiver {
        &self.archiver
    }

    // -----------------------------------------------------------------------
    // Registration and discovery
    // -----------------------------------------------------------------------

    pub fn register(&self, plugin: &NewPlugin) -> Result<Plugin, LifecycleError> {
        self.register_with(plugin, &AuditContext::default())
    }

    /// Creates the record with its dependency edges and hooks, all or nothing.
    pub fn register_with(
        &self,
        plugin: &NewPlugin,
        ctx: &AuditContext,
    ) -> Result<Plugin, LifecycleError> {
        self.register_counted(plugin, ctx).map(|(plugin, _)| plugin)
    }

    fn register_counted(
        &self,
        plugin: &NewPlugin,
        ctx: &AuditContext,
    ) -> Result<(Plugin, usize), LifecycleError> {
        let (created, edges) = self.db.atomic(|db| {
            let created = PluginRepository::new(db).create(plugin)?;

            let deps = DependencyRepository::new(db);
            let mut seen = BTreeSet::new();
            for spec in &plugin.dependencies {
                let requires = spec.requires.trim();
                if requires.is_empty() || requires == created.name || !seen.insert(requires) {
                    continue;
                }
                deps.add(&Dependency {
                    plugin: created.name.clone(),
                    requires_plugin: requires.to_string(),
                    is_optional: spec.is_optional,
                    version_bounds: spec.version_bounds.clone(),
                })?;
            }

            let hooks = HookRepository::new(db);
            for hook in &plugin.hooks {
                hooks.register(&created.name, hook)?;
            }

            AuditRepository::new(db).append(
                &NewAuditEntry::new(&created.name, AuditAction::Register, ctx)
                    .states(None, Some(created.snapshot())),
            )?;
            Ok::<_, LifecycleError>((created, seen.len()))
        })?;

        info!(
            plugin = %created.name,
            enabled = created.is_enabled,
            core = created.is_core,
            load_order = created.load_order,
            dependencies = edges,
            "plugin registered"
        );
        Ok((created, edges))
    }

    /// Registers every candidate under the configured plugins root.
    pub fn discover(&self) -> Result<DiscoveryReport, LifecycleError> {
        self.discover_in(&self.options.plugins_path, &self.options.active)
    }

    /// Registers every new candidate under `root`. Candidates already in the
    /// registry are skipped; one candidate's failure is recorded and the
    /// rest still run.
    pub fn discover_in(
        &self,
        root: &Path,
        active: &[String],
    ) -> Result<DiscoveryReport, LifecycleError> {
        let mut report = DiscoveryReport::default();
        let plugins = PluginRepository::new(&self.db);

        for dir in candidate_dirs(root, &self.options.pattern)? {
            let candidate = match Candidate::load(dir.clone()) {
                Ok(candidate) => candidate,
                Err(err) => {
                    let name = dir
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    warn!(plugin = %name, error = %err, "candidate skipped");
                    report.record_error(&name, err.to_string());
                    continue;
                }
            };
            if plugins.exists(&candidate.name)? {
                debug!(plugin = %candidate.name, "already registered");
                report.skipped += 1;
                continue;
            }

            let is_active = active.iter().any(|a| a == &candidate.name);
            let result = registration_for(
                &candidate.name,
                Some(&candidate.path),
                candidate.manifest.as_ref(),
                &self.options.classification,
                is_active,
                &self.resolver,
            )
            .and_then(|new| self.register_counted(&new, &AuditContext::actor("discovery")));
            match result {
                Ok((_, edges)) => {
                    report.created += 1;
                    report.dependencies_added += edges;
                }
                Err(err) => {
                    warn!(plugin = %candidate.name, error = %err, "candidate not registered");
                    report.record_error(&candidate.name, err.to_string());
                }
            }
        }

        info!(
            created = report.created,
            skipped = report.skipped,
            errors = report.errors.len(),
            "discovery finished"
        );
        Ok(report)
    }

    /// Registers each missing name as enabled. Used to import a host's legacy
    /// active list before any directory scan.
    pub fn seed_from_list<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<DiscoveryReport, LifecycleError> {
        let mut report = DiscoveryReport::default();
        let plugins = PluginRepository::new(&self.db);
        let mut seen = BTreeSet::new();

        for name in names.iter().map(|n| n.as_ref().trim()) {
            if name.is_empty() || !seen.insert(name) {
                continue;
            }
            if plugins.exists(name)? {
                report.skipped += 1;
                continue;
            }
            let result = registration_for(
                name,
                None,
                None,
                &self.options.classification,
                true,
                &self.resolver,
            )
            .and_then(|new| self.register_counted(&new, &AuditContext::actor("seed")));
            match result {
                Ok((_, edges)) => {
                    report.created += 1;
                    report.dependencies_added += edges;
                }
                Err(err) => {
                    warn!(plugin = %name, error = %err, "seed entry not registered");
                    report.record_error(name, err.to_string());
                }
            }
        }
        Ok(report)
    }

    /// Registers the single candidate directory called `name`, disabled.
    pub fn install(&self, name: &str) -> Result<Plugin, LifecycleError> {
        self.install_with(name, &AuditContext::default())
    }

    pub fn install_with(&self, name: &str, ctx: &AuditContext) -> Result<Plugin, LifecycleError> {
        let root = &self.options.plugins_path;
        let dir = candidate_dirs(root, &self.options.pattern)?
            .into_iter()
            .find(|dir| dir.file_name().is_some_and(|n| n == name))
            .ok_or_else(|| LifecycleError::CandidateNotFound {
                name: name.to_string(),
                root: root.clone(),
            })?;
        if PluginRepository::new(&self.db).exists(name)? {
            return Err(LifecycleError::DuplicateKey(format!("plugin {name:?}")));
        }
        let candidate = Candidate::load(dir)?;
        let new = registration_for(
            &candidate.name,
            Some(&candidate.path),
            candidate.manifest.as_ref(),
            &self.options.classification,
            false,
            &self.resolver,
        )?;
        self.register_with(&new, ctx)
    }

    /// Candidate directories with their manifest facts and registry status.
    pub fn scan_candidates(&self) -> Result<Vec<CandidateInfo>, LifecycleError> {
        let plugins = PluginRepository::new(&self.db);
        let mut out = Vec::new();
        for dir in candidate_dirs(&self.options.plugins_path, &self.options.pattern)? {
            let (name, manifest, has_manifest) = match Candidate::load(dir.clone()) {
                Ok(c) => {
                    let has = c.manifest.is_some();
                    (c.name, c.manifest, has)
                }
                Err(err) => {
                    warn!(path = %dir.display(), error = %err, "unreadable manifest");
                    let name = dir
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    (name, None, true)
                }
            };
            out.push(CandidateInfo {
                registered: plugins.exists(&name)?,
                version: manifest.as_ref().and_then(|m| m.version.clone()),
                category: manifest.as_ref().and_then(|m| m.category.clone()),
                has_manifest,
                path: dir,
                name,
            });
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Every plugin, by load order then name.
    pub fn all(&self) -> Result<Vec<Plugin>, LifecycleError> {
        Ok(PluginRepository::new(&self.db).find_all(&PluginFilter::default())?)
    }

    pub fn get_by_status(&self, status: PluginStatus) -> Result<Vec<Plugin>, LifecycleError> {
        Ok(PluginRepository::new(&self.db).find_all(&PluginFilter::with_status(status))?)
    }

    pub fn find(&self, name: &str) -> Result<Option<Plugin>, LifecycleError> {
        Ok(PluginRepository::new(&self.db).find(name)?)
    }

    pub fn get(&self, name: &str) -> Result<Plugin, LifecycleError> {
        Ok(PluginRepository::new(&self.db).get(name)?)
    }

    /// Registered and not uninstalled.
    pub fn is_installed(&self, name: &str) -> Result<bool, LifecycleError> {
        Ok(self
            .find(name)?
            .is_some_and(|p| p.status != PluginStatus::Uninstalled))
    }

    pub fn is_enabled(&self, name: &str) -> Result<bool, LifecycleError> {
        Ok(self.find(name)?.is_some_and(|p| p.is_enabled))
    }

    pub fn dependencies(&self, name: &str) -> Result<Vec<Dependency>, LifecycleError> {
        Ok(DependencyRepository::new(&self.db).for_plugin(name)?)
    }

    pub fn dependents(&self, name: &str) -> Result<Vec<Dependent>, LifecycleError> {
        Ok(DependencyRepository::new(&self.db).dependents(name)?)
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    pub fn enable(&self, name: &str) -> Result<Transition, LifecycleError> {
        self.enable_with(name, &AuditContext::default())
    }

    pub fn enable_with(&self, name: &str, ctx: &AuditContext) -> Result<Transition, LifecycleError> {
        let transition = self.db.atomic(|db| {
            let plugins = PluginRepository::new(db);
            let current = plugins.get(name)?;
            if current.is_enabled {
                return Ok(Transition {
                    plugin: current,
                    changed: false,
                });
            }
            if current.is_locked {
                return Err(LifecycleError::LockedPlugin(current.name));
            }
            if current.status == PluginStatus::Uninstalled {
                return Err(LifecycleError::InvalidTransition {
                    plugin: current.name,
                    action: "enable",
                    status: current.status,
                });
            }

            let check = self.resolver.can_enable(&load_graph(db)?, name);
            if !check.allowed {
                return Err(LifecycleError::MissingDependency {
                    plugin: current.name,
                    missing: check.missing,
                });
            }

            let mut next = current.clone();
            next.is_enabled = true;
            next.status = PluginStatus::Enabled;
            next.enabled_at = Some(Utc::now());
            let stored = plugins.update(&next)?;
            AuditRepository::new(db).append(
                &NewAuditEntry::new(name, AuditAction::Enable, ctx)
                    .states(Some(current.snapshot()), Some(stored.snapshot())),
            )?;
            Ok(Transition {
                plugin: stored,
                changed: true,
            })
        })?;

        if transition.changed {
            info!(plugin = %name, "plugin enabled");
            self.clear_host_caches();
        }
        Ok(transition)
    }

    pub fn disable(&self, name: &str) -> Result<Transition, LifecycleError> {
        self.disable_with(name, &AuditContext::default())
    }

    /// Disables `name` unless an enabled plugin requires it or one of its
    /// owned tables still holds rows.
    pub fn disable_with(&self, name: &str, ctx: &AuditContext) -> Result<Transition, LifecycleError> {
        self.set_disabled(name, false, ctx)
    }

    pub fn force_disable(&self, name: &str) -> Result<Transition, LifecycleError> {
        self.force_disable_with(name, &AuditContext::default())
    }

    /// Disables `name` past the dependents and record checks. Core and locked
    /// plugins still refuse. Audited as `force-disable`.
    pub fn force_disable_with(
        &self,
        name: &str,
        ctx: &AuditContext,
    ) -> Result<Transition, LifecycleError> {
        self.set_disabled(name, true, ctx)
    }

    fn set_disabled(
        &self,
        name: &str,
        force: bool,
        ctx: &AuditContext,
    ) -> Result<Transition, LifecycleError> {
        let transition = self.db.atomic(|db| {
            let plugins = PluginRepository::new(db);
            let current = plugins.get(name)?;
            if current.is_protected() {
                return Err(LifecycleError::LockedPlugin(current.name));
            }
            if !current.is_enabled {
                return Ok(Transition {
                    plugin: current,
                    changed: false,
                });
            }

            if !force {
                let check = self.resolver.can_disable(&load_graph(db)?, name);
                if !check.allowed {
                    return Err(LifecycleError::DependentsStillEnabled {
                        plugin: current.name,
                        dependents: check.blockers,
                    });
                }
                let records = owned_record_count(db, &current)?;
                if records > 0 {
                    return Err(LifecycleError::HasRecords {
                        plugin: current.name,
                        records,
                    });
                }
            }

            let mut next = current.clone();
            next.is_enabled = false;
            next.status = PluginStatus::Disabled;
            next.disabled_at = Some(Utc::now());
            let stored = plugins.update(&next)?;
            let action = if force {
                AuditAction::ForceDisable
            } else {
                AuditAction::Disable
            };
            AuditRepository::new(db).append(
                &NewAuditEntry::new(name, action, ctx)
                    .states(Some(current.snapshot()), Some(stored.snapshot())),
            )?;
            Ok(Transition {
                plugin: stored,
                changed: true,
            })
        })?;

        if transition.changed {
            info!(plugin = %name, force, "plugin disabled");
            self.clear_host_caches();
        }
        Ok(transition)
    }

    /// Enables then disables the given names one by one. Rejections are
    /// reported per plugin; store failures abort the batch.
    pub fn set_plugins<S: AsRef<str>>(
        &self,
        enable: &[S],
        disable: &[S],
    ) -> Result<BatchReport, LifecycleError> {
        let mut report = BatchReport::default();
        for name in enable.iter().map(AsRef::as_ref) {
            let outcome = batch_outcome(self.enable(name))?;
            report.push(name, BatchAction::Enable, outcome);
        }
        for name in disable.iter().map(AsRef::as_ref) {
            let outcome = batch_outcome(self.disable(name))?;
            report.push(name, BatchAction::Disable, outcome);
        }
        Ok(report)
    }

    pub fn uninstall(&self, name: &str, with_backup: bool) -> Result<UninstallOutcome, LifecycleError> {
        self.uninstall_with(name, with_backup, &AuditContext::default())
    }

    /// Takes the plugin out of service and, optionally after archiving them,
    /// drops its owned tables. Tables are only dropped once a backup artifact
    /// exists and reads back with matching row counts, unless `with_backup`
    /// is false.
    pub fn uninstall_with(
        &self,
        name: &str,
        with_backup: bool,
        ctx: &AuditContext,
    ) -> Result<UninstallOutcome, LifecycleError> {
        let current = self.get(name)?;
        if current.is_protected() {
            return Err(LifecycleError::LockedPlugin(current.name));
        }
        if current.status == PluginStatus::Uninstalled {
            return Err(LifecycleError::InvalidTransition {
                plugin: current.name,
                action: "uninstall",
                status: current.status,
            });
        }
        let check = self.resolver.can_disable(&load_graph(&self.db)?, name);
        if !check.allowed {
            return Err(LifecycleError::DependentsStillEnabled {
                plugin: current.name,
                dependents: check.blockers,
            });
        }

        let artifact = if with_backup {
            self.archiver.backup(&self.db, name, &current.owned_tables)?
        } else {
            if !current.owned_tables.is_empty() {
                warn!(plugin = %name, "dropping owned tables without backup");
            }
            None
        };
        let drop_tables = artifact.is_some() || !with_backup;

        let (stored, dropped_tables) = self.db.atomic(|db| {
            let store = TableStore::new(db);
            let mut dropped = Vec::new();
            if let Some(path) = artifact.as_deref() {
                self.archiver.verify(db, name, path)?;
            }
            if drop_tables {
                for table in current.owned_tables.iter() {
                    if store.drop_table(table)? {
                        dropped.push(table.to_string());
                    }
                }
            }

            let mut next = current.clone();
            next.status = PluginStatus::Uninstalled;
            if next.is_enabled {
                next.is_enabled = false;
                next.disabled_at = Some(Utc::now());
            }
            let stored = PluginRepository::new(db).update(&next)?;

            let mut new_state = stored.snapshot();
            new_state.backup_artifact = artifact.as_ref().map(|p| p.display().to_string());
            AuditRepository::new(db).append(
                &NewAuditEntry::new(name, AuditAction::Uninstall, ctx)
                    .states(Some(current.snapshot()), Some(new_state)),
            )?;
            Ok::<_, LifecycleError>((stored, dropped))
        })?;

        info!(
            plugin = %name,
            backup = with_backup,
            dropped = dropped_tables.len(),
            "plugin uninstalled"
        );
        if current.is_enabled {
            self.clear_host_caches();
        }
        Ok(UninstallOutcome {
            plugin: stored,
            artifact,
            dropped_tables,
        })
    }

    pub fn restore(&self, name: &str) -> Result<Plugin, LifecycleError> {
        self.restore_with(name, &AuditContext::default())
    }

    /// Returns an uninstalled plugin to the registered state. Dropped tables
    /// are not recreated; see [`Self::restore_data`].
    pub fn restore_with(&self, name: &str, ctx: &AuditContext) -> Result<Plugin, LifecycleError> {
        let stored = self.db.atomic(|db| {
            let plugins = PluginRepository::new(db);
            let current = plugins.get(name)?;
            if current.status != PluginStatus::Uninstalled {
                return Err(LifecycleError::InvalidTransition {
                    plugin: current.name,
                    action: "restore",
                    status: current.status,
                });
            }
            let mut next = current.clone();
            next.status = PluginStatus::Registered;
            let stored = plugins.update(&next)?;
            AuditRepository::new(db).append(
                &NewAuditEntry::new(name, AuditAction::Restore, ctx)
                    .states(Some(current.snapshot()), Some(stored.snapshot())),
            )?;
            Ok(stored)
        })?;
        info!(plugin = %name, "plugin restored");
        Ok(stored)
    }

    pub fn delete(&self, name: &str) -> Result<(), LifecycleError> {
        self.delete_with(name, &AuditContext::default())
    }

    /// Removes the record with its edges and hooks. Audit history stays.
    pub fn delete_with(&self, name: &str, ctx: &AuditContext) -> Result<(), LifecycleError> {
        self.db.atomic(|db| {
            let plugins = PluginRepository::new(db);
            let current = plugins.get(name)?;
            if current.is_protected() {
                return Err(LifecycleError::LockedPlugin(current.name));
            }
            let check = self.resolver.can_disable(&load_graph(db)?, name);
            if !check.allowed {
                return Err(LifecycleError::DependentsStillEnabled {
                    plugin: current.name,
                    dependents: check.blockers,
                });
            }

            DependencyRepository::new(db).remove_for_plugin(name)?;
            HookRepository::new(db).remove_for_plugin(name)?;
            plugins.delete(name)?;
            AuditRepository::new(db).append(
                &NewAuditEntry::new(name, AuditAction::Delete, ctx)
                    .states(Some(current.snapshot()), None),
            )?;
            Ok(())
        })?;
        info!(plugin = %name, "plugin deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    /// Reads `key` from a plugin's settings, or from the host-wide settings
    /// when `plugin` is `None`.
    pub fn get_setting(
        &self,
        key: &str,
        plugin: Option<&str>,
    ) -> Result<Option<SettingValue>, LifecycleError> {
        match plugin {
            Some(name) => Ok(self.get(name)?.settings.get(key).cloned()),
            None => Ok(SettingRepository::new(&self.db).get(key)?),
        }
    }

    pub fn get_setting_or(
        &self,
        key: &str,
        plugin: Option<&str>,
        default: SettingValue,
    ) -> Result<SettingValue, LifecycleError> {
        Ok(self.get_setting(key, plugin)?.unwrap_or(default))
    }

    pub fn set_setting(
        &self,
        key: &str,
        value: SettingValue,
        plugin: Option<&str>,
    ) -> Result<(), LifecycleError> {
        self.set_setting_with(key, value, plugin, &AuditContext::default())
    }

    /// Replaces one key. Plugin-scoped writes are audited.
    pub fn set_setting_with(
        &self,
        key: &str,
        value: SettingValue,
        plugin: Option<&str>,
        ctx: &AuditContext,
    ) -> Result<(), LifecycleError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ModelError::EmptySettingKey.into());
        }
        match plugin {
            Some(name) => {
                let mut patch = PluginSettings::new();
                patch.insert(key, value);
                self.update_settings(name, patch, ctx).map(|_| ())
            }
            None => {
                SettingRepository::new(&self.db).set(key, &value)?;
                debug!(key = %key, "host setting updated");
                Ok(())
            }
        }
    }

    /// Shallow merge: keys in `patch` replace the stored ones, others stay.
    pub fn update_settings(
        &self,
        name: &str,
        patch: PluginSettings,
        ctx: &AuditContext,
    ) -> Result<Plugin, LifecycleError> {
        if patch.iter().any(|(key, _)| key.trim().is_empty()) {
            return Err(ModelError::EmptySettingKey.into());
        }
        let keys: Vec<String> = patch.iter().map(|(k, _)| k.to_string()).collect();
        let stored = self.db.atomic(|db| {
            let plugins = PluginRepository::new(db);
            let current = plugins.get(name)?;
            let mut next = current.clone();
            next.settings.merge(patch);
            let stored = plugins.update(&next)?;
            AuditRepository::new(db).append(
                &NewAuditEntry::new(name, AuditAction::SettingsUpdate, ctx)
                    .states(Some(current.snapshot()), Some(stored.snapshot())),
            )?;
            Ok::<_, LifecycleError>(stored)
        })?;
        info!(plugin = %name, keys = %keys.join(","), "plugin settings updated");
        Ok(stored)
    }

    // -----------------------------------------------------------------------
    // Dependency graph
    // -----------------------------------------------------------------------

    /// Enabled plugins with a required dependency that is not enabled.
    pub fn verify_dependencies(&self) -> Result<Vec<Violation>, LifecycleError> {
        Ok(self.resolver.verify(&load_graph(&self.db)?))
    }

    /// `name` and its registered transitive requirements, deepest first.
    pub fn dependency_tree(&self, name: &str) -> Result<Vec<String>, LifecycleError> {
        self.get(name)?;
        Ok(self.resolver.dependency_tree(&load_graph(&self.db)?, name)?)
    }

    /// Enabled plugins in the order the host should initialize them.
    pub fn load_sequence(&self) -> Result<Vec<String>, LifecycleError> {
        Ok(self.resolver.load_sequence(&load_graph(&self.db)?)?)
    }

    // -----------------------------------------------------------------------
    // Hooks
    // -----------------------------------------------------------------------

    pub fn register_hooks(
        &self,
        plugin: &str,
        hooks: &[HookSpec],
    ) -> Result<Vec<HookBinding>, LifecycleError> {
        self.db.atomic(|db| {
            let repo = HookRepository::new(db);
            let mut out = Vec::with_capacity(hooks.len());
            for hook in hooks {
                out.push(repo.register(plugin, hook)?);
            }
            Ok(out)
        })
    }

    pub fn hooks_for_event(&self, event: &str) -> Result<Vec<HookBinding>, LifecycleError> {
        Ok(HookRepository::new(&self.db).for_event(event)?)
    }

    pub fn set_hook_active(&self, id: i64, active: bool) -> Result<(), LifecycleError> {
        Ok(HookRepository::new(&self.db).set_active(id, active)?)
    }

    // -----------------------------------------------------------------------
    // Audit and backups
    // -----------------------------------------------------------------------

    /// Newest first. `limit` 0 returns everything.
    pub fn audit_log(
        &self,
        plugin: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, LifecycleError> {
        Ok(AuditRepository::new(&self.db).list(plugin, limit)?)
    }

    pub fn list_backups(&self, name: &str) -> Result<Vec<BackupArtifact>, LifecycleError> {
        self.archiver.list_backups(name)
    }

    /// Keeps the `keep` newest artifacts, or the configured count.
    pub fn cleanup_backups(&self, name: &str, keep: Option<usize>) -> Result<usize, LifecycleError> {
        self.archiver
            .cleanup_backups(name, keep.unwrap_or(self.options.backup_keep))
    }

    /// Replays a backup artifact into the store in one transaction.
    pub fn restore_data(&self, artifact: &Path) -> Result<Vec<String>, LifecycleError> {
        self.archiver.restore_from_backup(&self.db, artifact)
    }

    /// Removes host cache files derived from the enabled set. Failures are
    /// logged and otherwise ignored. Returns the number of files removed.
    pub fn clear_host_caches(&self) -> usize {
        let Some(cache) = &self.options.cache_path else {
            return 0;
        };
        let mut removed = 0;
        for sub in HOST_CACHE_DIRS {
            let dir = cache.join(sub);
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "cannot read host cache");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(err) => warn!(path = %path.display(), error = %err, "cannot remove cache file"),
                }
            }
        }
        if removed > 0 {
            debug!(removed, "host caches cleared");
        }
        removed
    }
}

/// Rows across the plugin's owned tables that currently exist.
fn owned_record_count(db: &Db, plugin: &Plugin) -> Result<i64, LifecycleError> {
    let store = TableStore::new(db);
    let mut total = 0i64;
    for table in plugin.owned_tables.iter() {
        if store.table_exists(table)? {
            total = total.saturating_add(store.row_count(table)?);
        }
    }
    Ok(total)
}

fn load_graph(db: &Db) -> Result<DependencyGraph, LifecycleError> {
    let plugins = PluginRepository::new(db).find_all(&PluginFilter::default())?;
    let edges = DependencyRepository::new(db).all()?;
    Ok(DependencyGraph::from_plugins(&plugins, edges))
}

fn batch_outcome(result: Result<Transition, LifecycleError>) -> Result<BatchOutcome, LifecycleError> {
    match result {
        Ok(t) if t.changed => Ok(BatchOutcome::Applied),
        Ok(_) => Ok(BatchOutcome::Unchanged),
        Err(err) if err.is_validation() => Ok(BatchOutcome::Rejected(err.to_string())),
        Err(err) => Err(err),
    }
}
