//! Configuration for plugctl.
//!
//! Root configuration struct with nested sections, defaults for every
//! field, YAML file loading, environment variable overrides, tilde path
//! expansion and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classification::{ClassificationTable, LoadOrderPolicy};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "PLUGCTL_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Root config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub global: GlobalConfig,
    pub database: DatabaseConfig,
    pub plugins: PluginsConfig,
    pub backups: BackupConfig,
    pub logging: LoggingConfig,
    pub classification: ClassificationTable,
    pub load_order: LoadOrderPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: GlobalConfig {
                data_dir: home_dir().join(".local/share/plugctl").display().to_string(),
            },
            database: DatabaseConfig::default(),
            plugins: PluginsConfig::default(),
            backups: BackupConfig::default(),
            logging: LoggingConfig::default(),
            classification: ClassificationTable::default(),
            load_order: LoadOrderPolicy::default(),
        }
    }
}

impl Config {
    /// Reads `path`, applies process environment overrides, expands paths
    /// and validates.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg = Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.finish(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Loads the explicit file if given, else the first file on the search
    /// path, else defaults. Environment overrides apply in every case.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Some(path) = find_config_file() {
            return Self::load(&path);
        }
        let mut cfg = Self::default();
        cfg.finish(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    fn finish<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.apply_env_overrides(lookup);
        self.expand_paths();
        self.validate().map_err(ConfigError::Invalid)
    }

    /// Applies `PLUGCTL_*` overrides through `lookup` so tests can inject an
    /// environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("PLUGCTL_DATA_DIR") {
            self.global.data_dir = v;
        }
        if let Some(v) = get("PLUGCTL_DATABASE_PATH") {
            self.database.path = v;
        }
        if let Some(v) = get("PLUGCTL_PLUGINS_PATH") {
            self.plugins.path = v;
        }
        if let Some(v) = get("PLUGCTL_BACKUP_ROOT") {
            self.backups.root = v;
        }
        if let Some(v) = get("PLUGCTL_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = get("PLUGCTL_LOG_FORMAT") {
            self.logging.format = v;
        }
    }

    /// Effective database path (explicit or derived from data_dir).
    pub fn database_path(&self) -> PathBuf {
        self.derived(&self.database.path, "plugctl.db")
    }

    /// Effective plugin candidate root.
    pub fn plugins_path(&self) -> PathBuf {
        self.derived(&self.plugins.path, "plugins")
    }

    pub fn cache_path(&self) -> PathBuf {
        self.derived(&self.plugins.cache_path, "cache")
    }

    pub fn backup_root(&self) -> PathBuf {
        self.derived(&self.backups.root, "backups")
    }

    fn derived(&self, explicit: &str, leaf: &str) -> PathBuf {
        if !explicit.trim().is_empty() {
            return PathBuf::from(explicit);
        }
        Path::new(&self.global.data_dir).join(leaf)
    }

    /// Validates the entire configuration, returning an error message on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.global.data_dir.trim().is_empty() {
            return Err("global.data_dir is required".into());
        }
        if self.plugins.pattern.trim().is_empty() {
            return Err("plugins.pattern is required".into());
        }
        if let Err(err) = glob::Pattern::new(&self.plugins.pattern) {
            return Err(format!("plugins.pattern is not a valid glob: {err}"));
        }
        if self.backups.keep == 0 {
            return Err("backups.keep must be at least 1".into());
        }

        match self.logging.level.to_lowercase().trim() {
            "debug" | "info" | "warn" | "error" => {}
            _ => return Err("logging.level must be one of debug, info, warn, error".into()),
        }
        match self.logging.format.to_lowercase().trim() {
            "console" | "json" => {}
            _ => return Err("logging.format must be one of console, json".into()),
        }

        for name in self.classification.core_priorities.keys() {
            if !self.classification.is_core(name) {
                return Err(format!(
                    "classification.core_priorities names {name:?}, which is not in classification.core"
                ));
            }
        }
        for (name, tables) in &self.classification.owned_tables {
            for table in tables {
                if let Err(err) = crate::models::validate_identifier(table) {
                    return Err(format!("classification.owned_tables.{name}: {err}"));
                }
            }
        }
        Ok(())
    }

    /// Expands `~` in all path-related config fields.
    pub fn expand_paths(&mut self) {
        self.global.data_dir = expand_tilde(&self.global.data_dir);
        self.database.path = expand_tilde(&self.database.path);
        self.plugins.path = expand_tilde(&self.plugins.path);
        self.plugins.cache_path = expand_tilde(&self.plugins.cache_path);
        self.backups.root = expand_tilde(&self.backups.root);
    }
}

// ---------------------------------------------------------------------------
// Section configs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    /// Unsigned so a negative timeout is a parse error.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            busy_timeout_ms: 5000,
        }
    }
}

/// Where plugin candidates live and which ones the host treats as active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    pub path: String,
    /// Glob matched against candidate directory names.
    pub pattern: String,
    pub cache_path: String,
    /// Legacy active list. Seeds discovery and is the bridge fallback.
    pub active: Vec<String>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            pattern: "*Plugin".into(),
            cache_path: String::new(),
            active: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub root: String,
    /// Artifacts kept per plugin by cleanup.
    pub keep: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            root: String::new(),
            keep: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "console".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> String {
    if path.is_empty() {
        return path.to_string();
    }
    if path == "~" {
        return home_dir().display().to_string();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return home_dir().join(rest).display().to_string();
    }
    path.to_string()
}

/// First existing config file on the search path.
pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(expand_tilde(&explicit));
        if path.is_file() {
            return Some(path);
        }
    }
    config_search_paths()
        .into_iter()
        .map(|dir| dir.join("config.yaml"))
        .find(|candidate| candidate.is_file())
        .or_else(|| {
            let local = PathBuf::from("plugctl.yaml");
            local.is_file().then_some(local)
        })
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(Path::new(&xdg).join("plugctl"));
    }
    let home = home_dir();
    if home.as_os_str() != "" {
        paths.push(home.join(".config/plugctl"));
    }
    paths
}

/// Get the user's home directory, falling back to `/` on failure.
fn home_dir() -> PathBuf {
    #[allow(deprecated)]
    std::env::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
