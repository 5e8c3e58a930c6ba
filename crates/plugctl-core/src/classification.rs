//! Static classification table and load-order tiers supplied by the host.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::{DependencySpec, DEFAULT_LOAD_ORDER};

/// Per-plugin facts the host knows about ahead of discovery.
///
/// Entries here win over whatever a candidate's manifest declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationTable {
    /// Plugin name to category.
    pub categories: BTreeMap<String, String>,
    /// Plugins the host cannot run without.
    pub core: BTreeSet<String>,
    /// Load order for individual core plugins.
    pub core_priorities: BTreeMap<String, i64>,
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub optional_dependencies: BTreeMap<String, Vec<String>>,
    pub owned_tables: BTreeMap<String, Vec<String>>,
    pub descriptions: BTreeMap<String, String>,
}

impl ClassificationTable {
    pub fn category_of(&self, name: &str) -> Option<&str> {
        self.categories.get(name).map(String::as_str)
    }

    pub fn is_core(&self, name: &str) -> bool {
        self.core.contains(name)
    }

    pub fn core_priority(&self, name: &str) -> Option<i64> {
        self.core_priorities.get(name).copied()
    }

    pub fn description_of(&self, name: &str) -> Option<&str> {
        self.descriptions.get(name).map(String::as_str)
    }

    pub fn owned_tables_of(&self, name: &str) -> Option<&[String]> {
        self.owned_tables.get(name).map(Vec::as_slice)
    }

    /// Required edges first, then optional ones.
    pub fn dependencies_of(&self, name: &str) -> Vec<DependencySpec> {
        let required = self
            .dependencies
            .get(name)
            .into_iter()
            .flatten()
            .map(DependencySpec::required);
        let optional = self
            .optional_dependencies
            .get(name)
            .into_iter()
            .flatten()
            .map(DependencySpec::optional);
        required.chain(optional).collect()
    }

    /// True when the table has any opinion about `name`'s dependencies.
    pub fn declares_dependencies(&self, name: &str) -> bool {
        self.dependencies.contains_key(name) || self.optional_dependencies.contains_key(name)
    }
}

/// Coarse tier assignment used as the base `load_order` of a plugin.
///
/// Core plugins sit below every category tier so they always initialize
/// before their consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOrderPolicy {
    pub core_default: i64,
    pub category_tiers: BTreeMap<String, i64>,
    pub fallback: i64,
}

impl Default for LoadOrderPolicy {
    fn default() -> Self {
        let category_tiers = [("core", 60), ("security", 70), ("metadata", 80), ("workflow", 90)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self {
            core_default: 50,
            category_tiers,
            fallback: DEFAULT_LOAD_ORDER,
        }
    }
}

impl LoadOrderPolicy {
    pub fn load_order(&self, category: &str, is_core: bool, core_priority: Option<i64>) -> i64 {
        if is_core {
            return core_priority.unwrap_or(self.core_default);
        }
        self.category_tiers
            .get(category)
            .copied()
            .unwrap_or(self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_follow_category_and_core_priority() {
        let policy = LoadOrderPolicy::default();
        assert_eq!(policy.load_order("security", false, None), 70);
        assert_eq!(policy.load_order("workflow", false, None), 90);
        assert_eq!(policy.load_order("whatever", false, None), 100);
        assert_eq!(policy.load_order("security", true, None), 50);
        assert_eq!(policy.load_order("security", true, Some(10)), 10);
    }

    #[test]
    fn dependencies_list_required_before_optional() {
        let mut table = ClassificationTable::default();
        table
            .dependencies
            .insert("security-clearance".into(), vec!["acl".into(), "search".into()]);
        table
            .optional_dependencies
            .insert("security-clearance".into(), vec!["audit-trail".into()]);

        let deps = table.dependencies_of("security-clearance");
        assert_eq!(
            deps,
            vec![
                DependencySpec::required("acl"),
                DependencySpec::required("search"),
                DependencySpec::optional("audit-trail"),
            ]
        );
        assert!(table.dependencies_of("unknown").is_empty());
        assert!(table.declares_dependencies("security-clearance"));
        assert!(!table.declares_dependencies("unknown"));
    }

    #[test]
    fn yaml_shape() {
        let yaml = r#"
categories:
  acl: security
core: [propel-bridge]
core_priorities:
  propel-bridge: 10
"#;
        let table: ClassificationTable = match serde_yaml::from_str(yaml) {
            Ok(t) => t,
            Err(err) => panic!("parse: {err}"),
        };
        assert_eq!(table.category_of("acl"), Some("security"));
        assert!(table.is_core("propel-bridge"));
        assert_eq!(table.core_priority("propel-bridge"), Some(10));
        assert_eq!(table.core_priority("acl"), None);
    }
}
