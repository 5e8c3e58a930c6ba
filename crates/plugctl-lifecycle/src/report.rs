//! Aggregate results returned by multi-plugin operations.

use std::path::PathBuf;

use plugctl_core::Plugin;
use serde::Serialize;

/// One plugin that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub name: String,
    pub message: String,
}

/// Result of `discover` and `seed_from_list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub created: usize,
    pub skipped: usize,
    pub dependencies_added: usize,
    pub errors: Vec<ItemError>,
}

impl DiscoveryReport {
    pub(crate) fn record_error(&mut self, name: &str, message: impl Into<String>) {
        self.errors.push(ItemError {
            name: name.to_string(),
            message: message.into(),
        });
    }
}

/// Result of a single enable or disable.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub plugin: Plugin,
    /// False when the plugin was already in the requested state.
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchAction {
    Enable,
    Disable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "lowercase")]
pub enum BatchOutcome {
    Applied,
    Unchanged,
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    pub name: String,
    pub action: BatchAction,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

/// Per-plugin outcomes of `set_plugins`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    pub(crate) fn push(&mut self, name: &str, action: BatchAction, outcome: BatchOutcome) {
        self.items.push(BatchItem {
            name: name.to_string(),
            action,
            outcome,
        });
    }

    pub fn outcome_of(&self, name: &str) -> Option<&BatchOutcome> {
        self.items
            .iter()
            .rev()
            .find(|item| item.name == name)
            .map(|item| &item.outcome)
    }

    pub fn rejected(&self) -> impl Iterator<Item = &BatchItem> {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, BatchOutcome::Rejected(_)))
    }

    pub fn is_clean(&self) -> bool {
        self.rejected().next().is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UninstallOutcome {
    pub plugin: Plugin,
    pub artifact: Option<PathBuf>,
    pub dropped_tables: Vec<String>,
}
