//! Dependency edges: persistence for the `plugin_dependency` table.

use plugctl_core::{Dependency, Dependent};
use rusqlite::{params, Row};

use crate::{format_ts, is_unique_constraint_error, nullable_string, Db, DbError};

pub struct DependencyRepository<'a> {
    db: &'a Db,
}

impl<'a> DependencyRepository<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    /// Adds one edge. The declaring plugin must be registered; the required
    /// one need not be.
    pub fn add(&self, dep: &Dependency) -> Result<(), DbError> {
        let plugin = dep.plugin.trim();
        let requires = dep.requires_plugin.trim();
        if plugin.is_empty() || requires.is_empty() {
            return Err(DbError::Validation(
                "dependency needs both plugin and requires_plugin".into(),
            ));
        }
        if plugin == requires {
            return Err(DbError::Validation(format!(
                "plugin {plugin:?} cannot depend on itself"
            )));
        }
        if !crate::PluginRepository::new(self.db).exists(plugin)? {
            return Err(DbError::PluginNotFound(plugin.to_string()));
        }

        let result = self.db.conn().execute(
            "INSERT INTO plugin_dependency (
                plugin, requires_plugin, is_optional, version_bounds, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                plugin,
                requires,
                dep.is_optional,
                nullable_string(&dep.version_bounds),
                format_ts(&crate::now()),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(ref err) if is_unique_constraint_error(err) => {
                Err(DbError::DependencyAlreadyExists {
                    plugin: plugin.to_string(),
                    requires: requires.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Edges declared by `plugin`, in declaration order.
    pub fn for_plugin(&self, plugin: &str) -> Result<Vec<Dependency>, DbError> {
        let mut stmt = self.db.conn().prepare(
            "SELECT plugin, requires_plugin, is_optional, version_bounds
             FROM plugin_dependency
             WHERE plugin = ?1
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![plugin.trim()], scan_dependency)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Reverse lookup: registered plugins that declare a dependency on
    /// `plugin`, with their current enabled flag.
    pub fn dependents(&self, plugin: &str) -> Result<Vec<Dependent>, DbError> {
        let mut stmt = self.db.conn().prepare(
            "SELECT d.plugin, p.is_enabled, d.is_optional
             FROM plugin_dependency d
             JOIN plugin p ON p.name = d.plugin
             WHERE d.requires_plugin = ?1
             ORDER BY d.plugin",
        )?;
        let rows = stmt.query_map(params![plugin.trim()], |row| {
            Ok(Dependent {
                name: row.get(0)?,
                is_enabled: row.get(1)?,
                is_optional: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn all(&self) -> Result<Vec<Dependency>, DbError> {
        let mut stmt = self.db.conn().prepare(
            "SELECT plugin, requires_plugin, is_optional, version_bounds
             FROM plugin_dependency
             ORDER BY id",
        )?;
        let rows = stmt.query_map([], scan_dependency)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Drops every edge declared by `plugin` and returns how many went.
    pub fn remove_for_plugin(&self, plugin: &str) -> Result<usize, DbError> {
        let rows = self.db.conn().execute(
            "DELETE FROM plugin_dependency WHERE plugin = ?1",
            params![plugin.trim()],
        )?;
        Ok(rows)
    }
}

fn scan_dependency(row: &Row<'_>) -> rusqlite::Result<Dependency> {
    Ok(Dependency {
        plugin: row.get(0)?,
        requires_plugin: row.get(1)?,
        is_optional: row.get(2)?,
        version_bounds: row.get(3)?,
    })
}
