//! Domain model types shared by the registry, the resolver and the
//! lifecycle manager.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Load order assigned when nothing more specific applies.
pub const DEFAULT_LOAD_ORDER: i64 = 100;

/// Category assigned when neither the classification table nor a manifest
/// names one.
pub const DEFAULT_CATEGORY: &str = "general";

// ---------------------------------------------------------------------------
// PluginStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a registered plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    #[default]
    Registered,
    Enabled,
    Disabled,
    Uninstalled,
}

impl PluginStatus {
    pub const ALL: [PluginStatus; 4] = [
        PluginStatus::Registered,
        PluginStatus::Enabled,
        PluginStatus::Disabled,
        PluginStatus::Uninstalled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Uninstalled => "uninstalled",
        }
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "registered" => Ok(Self::Registered),
            "enabled" => Ok(Self::Enabled),
            "disabled" => Ok(Self::Disabled),
            // "pending_removal" is the name older registries used.
            "uninstalled" | "pending_removal" => Ok(Self::Uninstalled),
            _ => Err(ModelError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// OwnedTables
// ---------------------------------------------------------------------------

/// Validates a table name before it is interpolated into SQL.
///
/// Accepts ASCII identifiers of at most 64 characters that start with a
/// letter or underscore. The `sqlite_` namespace is reserved.
pub fn validate_identifier(name: &str) -> Result<(), ModelError> {
    let invalid = || ModelError::InvalidTableName(name.to_string());
    let mut chars = name.chars();
    let first = chars.next().ok_or_else(invalid)?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(invalid());
    }
    if name.len() > 64 || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid());
    }
    if name.to_ascii_lowercase().starts_with("sqlite_") {
        return Err(invalid());
    }
    Ok(())
}

/// Table names a plugin created and whose data is archived before removal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct OwnedTables(Vec<String>);

impl OwnedTables {
    /// Builds a validated, de-duplicated list. Order of first occurrence is
    /// kept.
    pub fn new<I, S>(tables: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for table in tables {
            let table = table.into().trim().to_string();
            validate_identifier(&table)?;
            if !out.contains(&table) {
                out.push(table);
            }
        }
        Ok(Self(out))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl TryFrom<Vec<String>> for OwnedTables {
    type Error = ModelError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OwnedTables> for Vec<String> {
    fn from(value: OwnedTables) -> Self {
        value.0
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// A typed plugin or global setting value.
///
/// Untagged so a settings document reads as plain JSON. Variant order
/// matters for deserialization: anything that is not a bool, integer or
/// string lands in `Json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Boolean(bool),
    Integer(i64),
    Text(String),
    Json(serde_json::Value),
}

impl SettingValue {
    /// Type tag stored next to the raw value.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Text(_) => "string",
            Self::Json(_) => "json",
        }
    }

    /// Raw text form stored in the settings table.
    pub fn to_stored(&self) -> String {
        match self {
            Self::Boolean(true) => "1".to_string(),
            Self::Boolean(false) => "0".to_string(),
            Self::Integer(v) => v.to_string(),
            Self::Text(v) => v.clone(),
            Self::Json(v) => v.to_string(),
        }
    }

    /// Inverse of [`SettingValue::kind`] plus [`SettingValue::to_stored`].
    pub fn from_stored(kind: &str, raw: &str) -> Result<Self, ModelError> {
        let invalid = |reason: String| ModelError::InvalidSetting {
            kind: kind.to_string(),
            raw: raw.to_string(),
            reason,
        };
        match kind {
            "boolean" => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Self::Boolean(true)),
                "0" | "false" | "no" | "off" | "" => Ok(Self::Boolean(false)),
                other => Err(invalid(format!("{other:?} is not a boolean"))),
            },
            "integer" => raw
                .trim()
                .parse::<i64>()
                .map(Self::Integer)
                .map_err(|err| invalid(err.to_string())),
            "json" => serde_json::from_str(raw)
                .map(Self::Json)
                .map_err(|err| invalid(err.to_string())),
            "string" => Ok(Self::Text(raw.to_string())),
            other => Err(invalid(format!("unknown setting type {other:?}"))),
        }
    }

    /// Best-effort typing of free-form input such as a command-line value.
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed {
            "true" => return Self::Boolean(true),
            "false" => return Self::Boolean(false),
            _ => {}
        }
        if let Ok(v) = trimmed.parse::<i64>() {
            return Self::Integer(v);
        }
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
                return Self::Json(v);
            }
        }
        Self::Text(raw.to_string())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{v}"),
            _ => f.write_str(&self.to_stored()),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<serde_json::Value> for SettingValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Per-plugin settings document. Keys are kept sorted so serialized forms
/// are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginSettings(BTreeMap<String, SettingValue>);

impl PluginSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<SettingValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Shallow merge: keys in `patch` replace keys here, everything else is
    /// kept.
    pub fn merge(&mut self, patch: PluginSettings) {
        self.0.extend(patch.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, SettingValue)> for PluginSettings {
    fn from_iter<T: IntoIterator<Item = (String, SettingValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Plugin
// ---------------------------------------------------------------------------

/// A registered plugin as stored in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plugin {
    pub id: i64,
    pub name: String,
    pub implementation_reference: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub category: String,
    pub status: PluginStatus,
    pub is_enabled: bool,
    pub is_core: bool,
    pub is_locked: bool,
    pub load_order: i64,
    pub location: Option<String>,
    pub settings: PluginSettings,
    pub owned_tables: OwnedTables,
    pub enabled_at: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every write; used for compare-and-swap updates.
    pub revision: i64,
}

impl Plugin {
    /// Core and locked plugins refuse every disable or uninstall.
    pub fn is_protected(&self) -> bool {
        self.is_core || self.is_locked
    }

    pub fn snapshot(&self) -> PluginSnapshot {
        PluginSnapshot {
            status: self.status,
            is_enabled: self.is_enabled,
            is_core: self.is_core,
            is_locked: self.is_locked,
            load_order: self.load_order,
            enabled_at: self.enabled_at,
            disabled_at: self.disabled_at,
            settings: self.settings.clone(),
            backup_artifact: None,
        }
    }
}

/// Registration input. Everything but the name has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewPlugin {
    pub name: String,
    pub implementation_reference: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub category: String,
    pub is_enabled: bool,
    pub is_core: bool,
    pub is_locked: bool,
    pub load_order: i64,
    pub location: Option<String>,
    pub settings: PluginSettings,
    pub owned_tables: OwnedTables,
    pub dependencies: Vec<DependencySpec>,
    pub hooks: Vec<HookSpec>,
}

impl Default for NewPlugin {
    fn default() -> Self {
        Self {
            name: String::new(),
            implementation_reference: String::new(),
            version: None,
            description: None,
            category: DEFAULT_CATEGORY.to_string(),
            is_enabled: false,
            is_core: false,
            is_locked: false,
            load_order: DEFAULT_LOAD_ORDER,
            location: None,
            settings: PluginSettings::default(),
            owned_tables: OwnedTables::default(),
            dependencies: Vec::new(),
            hooks: Vec::new(),
        }
    }
}

impl NewPlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Trims and fills defaults. Core plugins are always enabled and locked.
    pub fn normalized(mut self) -> Result<Self, ModelError> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(ModelError::EmptyName);
        }
        if self.implementation_reference.trim().is_empty() {
            self.implementation_reference = self.name.clone();
        }
        if self.category.trim().is_empty() {
            self.category = DEFAULT_CATEGORY.to_string();
        }
        if self.is_core {
            self.is_enabled = true;
            self.is_locked = true;
        }
        let name = self.name.clone();
        self.dependencies.retain(|dep| {
            let requires = dep.requires.trim();
            !requires.is_empty() && requires != name
        });
        Ok(self)
    }

    pub fn initial_status(&self) -> PluginStatus {
        if self.is_enabled {
            PluginStatus::Enabled
        } else {
            PluginStatus::Registered
        }
    }
}

// ---------------------------------------------------------------------------
// Dependencies and hooks
// ---------------------------------------------------------------------------

/// Declared requirement, relative to the declaring plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub requires: String,
    #[serde(default)]
    pub is_optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_bounds: Option<String>,
}

impl DependencySpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            requires: name.into(),
            is_optional: false,
            version_bounds: None,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            requires: name.into(),
            is_optional: true,
            version_bounds: None,
        }
    }
}

/// Stored dependency edge: `plugin` requires `requires_plugin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub plugin: String,
    pub requires_plugin: String,
    pub is_optional: bool,
    pub version_bounds: Option<String>,
}

impl Dependency {
    pub fn new(plugin: impl Into<String>, requires: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            requires_plugin: requires.into(),
            is_optional: false,
            version_bounds: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }
}

/// A plugin that declares a dependency on another one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependent {
    pub name: String,
    pub is_enabled: bool,
    pub is_optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSpec {
    pub event_name: String,
    pub listener_reference: String,
    #[serde(default)]
    pub priority: i64,
}

/// Stored event listener registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookBinding {
    pub id: i64,
    pub plugin: String,
    pub event_name: String,
    pub listener_reference: String,
    pub priority: i64,
    pub is_active: bool,
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    Register,
    Enable,
    Disable,
    /// Disable that bypassed the dependents and record-count guards.
    ForceDisable,
    Uninstall,
    Restore,
    SettingsUpdate,
    Delete,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::ForceDisable => "force-disable",
            Self::Uninstall => "uninstall",
            Self::Restore => "restore",
            Self::SettingsUpdate => "settings-update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "register" => Ok(Self::Register),
            "enable" => Ok(Self::Enable),
            "disable" => Ok(Self::Disable),
            "force-disable" | "force_disable" => Ok(Self::ForceDisable),
            "uninstall" => Ok(Self::Uninstall),
            "restore" => Ok(Self::Restore),
            "settings-update" | "settings_update" => Ok(Self::SettingsUpdate),
            "delete" => Ok(Self::Delete),
            other => Err(ModelError::InvalidAction(other.to_string())),
        }
    }
}

/// The externally relevant fields of a plugin at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSnapshot {
    pub status: PluginStatus,
    pub is_enabled: bool,
    pub is_core: bool,
    pub is_locked: bool,
    pub load_order: i64,
    #[serde(default)]
    pub enabled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub disabled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "PluginSettings::is_empty")]
    pub settings: PluginSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_artifact: Option<String>,
}

/// Who asked for a mutation, and why.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditContext {
    pub actor: Option<String>,
    pub reason: Option<String>,
    pub source_address: Option<String>,
}

impl AuditContext {
    pub fn actor(actor: impl Into<String>) -> Self {
        Self {
            actor: Some(actor.into()),
            ..Self::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_source_address(mut self, address: impl Into<String>) -> Self {
        self.source_address = Some(address.into());
        self
    }
}

/// Audit record ready to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub plugin: String,
    pub action: AuditAction,
    pub actor: Option<String>,
    pub previous_state: Option<PluginSnapshot>,
    pub new_state: Option<PluginSnapshot>,
    pub reason: Option<String>,
    pub source_address: Option<String>,
}

impl NewAuditEntry {
    pub fn new(plugin: impl Into<String>, action: AuditAction, ctx: &AuditContext) -> Self {
        Self {
            plugin: plugin.into(),
            action,
            actor: ctx.actor.clone(),
            previous_state: None,
            new_state: None,
            reason: ctx.reason.clone(),
            source_address: ctx.source_address.clone(),
        }
    }

    pub fn states(mut self, previous: Option<PluginSnapshot>, new: Option<PluginSnapshot>) -> Self {
        self.previous_state = previous;
        self.new_state = new;
        self
    }
}

/// Stored audit record. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub plugin: String,
    pub action: AuditAction,
    pub actor: Option<String>,
    pub previous_state: Option<PluginSnapshot>,
    pub new_state: Option<PluginSnapshot>,
    pub reason: Option<String>,
    pub source_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Queries and reports
// ---------------------------------------------------------------------------

/// Registry listing filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginFilter {
    pub status: Option<PluginStatus>,
    pub is_enabled: Option<bool>,
    pub is_core: Option<bool>,
    pub category: Option<String>,
}

impl PluginFilter {
    pub fn enabled() -> Self {
        Self {
            is_enabled: Some(true),
            ..Self::default()
        }
    }

    pub fn with_status(status: PluginStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn matches(&self, plugin: &Plugin) -> bool {
        self.status.map_or(true, |s| plugin.status == s)
            && self.is_enabled.map_or(true, |e| plugin.is_enabled == e)
            && self.is_core.map_or(true, |c| plugin.is_core == c)
            && self
                .category
                .as_deref()
                .map_or(true, |c| plugin.category == c)
    }
}

/// An enabled plugin whose required dependency is not enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub plugin: String,
    pub missing_dependency: String,
}
