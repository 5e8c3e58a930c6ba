//! Host-facing adapter that tolerates a missing or unmigrated store.
//!
//! The host calls [`PluginBridge::initialize`] once while booting, possibly
//! before the store exists. When the store is not usable the bridge stays in
//! degraded mode and answers from the caller's fallback list.

use std::cell::RefCell;
use std::path::PathBuf;

use plugctl_core::Config;
use plugctl_db::{Db, TableStore};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, LifecycleError};
use crate::manager::{db_config, LifecycleManager, ManagerOptions};

/// Everything the bridge needs to build a manager.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub database: PathBuf,
    pub busy_timeout_ms: u64,
    pub options: ManagerOptions,
}

impl BridgeConfig {
    pub fn new(
        database: impl Into<PathBuf>,
        plugins_path: impl Into<PathBuf>,
        cache_path: Option<PathBuf>,
    ) -> Self {
        let plugins_path = plugins_path.into();
        let mut options = ManagerOptions::new(plugins_path.clone(), plugins_path.join(".backups"));
        options.cache_path = cache_path;
        Self {
            database: database.into(),
            busy_timeout_ms: 5000,
            options,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let db_cfg = db_config(cfg);
        Self {
            database: db_cfg.path,
            busy_timeout_ms: db_cfg.busy_timeout_ms,
            options: ManagerOptions::from_config(cfg),
        }
    }
}

#[derive(Default)]
pub struct PluginBridge {
    initialized: bool,
    manager: Option<LifecycleManager>,
    unavailable_reason: Option<String>,
    enabled_cache: RefCell<Option<Vec<String>>>,
}

impl PluginBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks the store once and builds the manager if it is usable. Later
    /// calls do nothing. Never fails; an unusable store means degraded mode.
    pub fn initialize(&mut self, config: BridgeConfig) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        match Self::connect(config) {
            Ok(manager) => {
                info!(path = %manager.db().path().display(), "plugin bridge ready");
                self.manager = Some(manager);
            }
            Err(reason) => {
                warn!(reason = %reason, "plugin store unavailable, using fallback");
                self.unavailable_reason = Some(reason);
            }
        }
    }

    fn connect(config: BridgeConfig) -> Result<LifecycleManager, String> {
        let mut db_cfg = plugctl_db::Config::new(config.database);
        db_cfg.busy_timeout_ms = config.busy_timeout_ms;
        let db = Db::connect(db_cfg).map_err(|e| e.to_string())?;
        let ready = TableStore::new(&db)
            .table_exists("plugin")
            .map_err(|e| e.to_string())?;
        if !ready {
            return Err("plugin registry tables are missing".into());
        }
        Ok(LifecycleManager::new(db, config.options))
    }

    /// Wraps an already constructed manager.
    pub fn with_manager(manager: LifecycleManager) -> Self {
        Self {
            initialized: true,
            manager: Some(manager),
            ..Self::default()
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// True when a live manager backs the bridge.
    pub fn is_available(&self) -> bool {
        self.manager.is_some()
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        self.unavailable_reason.as_deref()
    }

    pub fn manager(&self) -> Result<&LifecycleManager, BridgeError> {
        self.manager.as_ref().ok_or_else(|| {
            BridgeError::StoreUnavailable(
                self.unavailable_reason
                    .clone()
                    .unwrap_or_else(|| "bridge not initialized".into()),
            )
        })
    }

    /// Enabled plugins in load order, cached after the first success.
    pub fn try_enabled_plugins(&self) -> Result<Vec<String>, BridgeError> {
        if let Some(cached) = self.enabled_cache.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let names = self.manager()?.load_sequence()?;
        *self.enabled_cache.borrow_mut() = Some(names.clone());
        Ok(names)
    }

    /// Like [`Self::try_enabled_plugins`], but answers with `fallback` when
    /// the store is unavailable, fails, or has nothing enabled.
    pub fn enabled_plugins_or(&self, fallback: &[String]) -> Vec<String> {
        match self.try_enabled_plugins() {
            Ok(names) if !names.is_empty() => names,
            Ok(_) => {
                debug!("no enabled plugins recorded, using fallback");
                fallback.to_vec()
            }
            Err(err) => {
                warn!(error = %err, "enabled plugin lookup failed, using fallback");
                fallback.to_vec()
            }
        }
    }

    pub fn try_is_plugin_enabled(&self, name: &str) -> Result<bool, BridgeError> {
        Ok(self.manager()?.is_enabled(name)?)
    }

    /// False on any failure.
    pub fn is_plugin_enabled(&self, name: &str) -> bool {
        match self.try_is_plugin_enabled(name) {
            Ok(enabled) => enabled,
            Err(err) => {
                debug!(plugin = %name, error = %err, "enabled check failed");
                false
            }
        }
    }

    /// Drops the cached enabled list. Call after mutations made elsewhere.
    pub fn clear_cache(&self) {
        self.enabled_cache.borrow_mut().take();
    }

    /// Runs a mutation through the live manager and invalidates the cache.
    pub fn mutate<T>(
        &self,
        f: impl FnOnce(&LifecycleManager) -> Result<T, LifecycleError>,
    ) -> Result<T, BridgeError> {
        let result = f(self.manager()?);
        self.clear_cache();
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninitialized_bridge_is_degraded() {
        let bridge = PluginBridge::new();
        assert!(!bridge.is_initialized());
        assert!(!bridge.is_available());
        assert!(matches!(
            bridge.try_enabled_plugins(),
            Err(BridgeError::StoreUnavailable(_))
        ));
        let fallback = vec!["acl".to_string()];
        assert_eq!(bridge.enabled_plugins_or(&fallback), fallback);
        assert!(!bridge.is_plugin_enabled("acl"));
    }
}
