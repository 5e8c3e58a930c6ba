//! plugctl-core: domain types, dependency resolution and configuration for
//! the plugin lifecycle subsystem.
//!
//! Nothing in this crate touches the backing store. The registry crate
//! persists these types and the lifecycle crate drives them through the
//! state machine.

pub mod classification;
pub mod config;
pub mod error;
pub mod models;
pub mod resolver;

pub use classification::{ClassificationTable, LoadOrderPolicy};
pub use config::Config;
pub use error::ModelError;
pub use models::{
    AuditAction, AuditContext, AuditEntry, Dependency, DependencySpec, Dependent, HookBinding,
    HookSpec, NewAuditEntry, NewPlugin, OwnedTables, Plugin, PluginFilter, PluginSettings,
    PluginSnapshot, PluginStatus, SettingValue, Violation,
};
pub use resolver::{DependencyGraph, DependencyResolver, GraphNode, ResolveError};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modules_are_accessible() {
        let _ = PluginStatus::Registered;
        let _ = AuditAction::SettingsUpdate;
        let _ = Config::default();
        let _ = DependencyResolver::new(LoadOrderPolicy::default());
        let _ = ModelError::EmptyName;
    }
}
