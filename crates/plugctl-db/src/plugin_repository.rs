//! Plugin repository: persistence for the `plugin` table.

use plugctl_core::{NewPlugin, Plugin, PluginFilter, PluginStatus};
use rusqlite::{params, OptionalExtension, Row};

use crate::{
    conversion_error, format_ts, from_json, is_unique_constraint_error, nullable_string,
    parse_opt_ts, parse_ts, Db, DbError,
};

const SELECT_COLUMNS: &str = "SELECT
    id, name, implementation_reference, version, description, category,
    status, is_enabled, is_core, is_locked, load_order, location,
    settings, owned_tables, enabled_at, disabled_at, created_at, updated_at, revision
 FROM plugin";

pub struct PluginRepository<'a> {
    db: &'a Db,
}

impl<'a> PluginRepository<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    /// Inserts a new plugin record. Dependencies and hooks in `input` are
    /// not touched; callers add them through their own repositories.
    pub fn create(&self, input: &NewPlugin) -> Result<Plugin, DbError> {
        let input = input.clone().normalized()?;
        let now = format_ts(&crate::now());
        let status = input.initial_status();
        let enabled_at = input.is_enabled.then(|| now.clone());

        let result = self.db.conn().execute(
            "INSERT INTO plugin (
                name, implementation_reference, version, description, category,
                status, is_enabled, is_core, is_locked, load_order, location,
                settings, owned_tables, enabled_at, disabled_at, revision,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, NULL, 1, ?15, ?15)",
            params![
                input.name,
                input.implementation_reference,
                nullable_string(&input.version),
                nullable_string(&input.description),
                input.category,
                status.as_str(),
                input.is_enabled,
                input.is_core,
                input.is_locked,
                input.load_order,
                nullable_string(&input.location),
                serde_json::to_string(&input.settings)?,
                serde_json::to_string(&input.owned_tables)?,
                enabled_at,
                now,
            ],
        );
        match result {
            Ok(_) => {}
            Err(ref err) if is_unique_constraint_error(err) => {
                return Err(DbError::PluginAlreadyExists(input.name));
            }
            Err(err) => return Err(err.into()),
        }
        self.get(&input.name)
    }

    /// Looks a plugin up by name.
    pub fn get(&self, name: &str) -> Result<Plugin, DbError> {
        self.find(name)?
            .ok_or_else(|| DbError::PluginNotFound(name.trim().to_string()))
    }

    pub fn find(&self, name: &str) -> Result<Option<Plugin>, DbError> {
        let sql = format!("{SELECT_COLUMNS} WHERE name = ?1");
        let plugin = self
            .db
            .conn()
            .query_row(&sql, params![name.trim()], scan_plugin)
            .optional()?;
        Ok(plugin)
    }

    pub fn exists(&self, name: &str) -> Result<bool, DbError> {
        let exists: bool = self.db.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM plugin WHERE name = ?1)",
            params![name.trim()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Plugins matching `filter`, lowest load order first.
    pub fn find_all(&self, filter: &PluginFilter) -> Result<Vec<Plugin>, DbError> {
        let sql = format!(
            "{SELECT_COLUMNS}
             WHERE (?1 IS NULL OR status = ?1)
               AND (?2 IS NULL OR is_enabled = ?2)
               AND (?3 IS NULL OR is_core = ?3)
               AND (?4 IS NULL OR category = ?4)
             ORDER BY load_order, name"
        );
        let mut stmt = self.db.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                filter.status.map(PluginStatus::as_str),
                filter.is_enabled,
                filter.is_core,
                filter.category.as_deref(),
            ],
            scan_plugin,
        )?;
        let mut plugins = Vec::new();
        for row in rows {
            plugins.push(row?);
        }
        Ok(plugins)
    }

    pub fn names(&self) -> Result<Vec<String>, DbError> {
        let mut stmt = self.db.conn().prepare("SELECT name FROM plugin ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    /// Writes every mutable field of `plugin` if its revision still matches
    /// the stored one, and returns the stored result.
    pub fn update(&self, plugin: &Plugin) -> Result<Plugin, DbError> {
        if plugin.is_core && !plugin.is_locked {
            return Err(DbError::Validation(format!(
                "core plugin {:?} must stay locked",
                plugin.name
            )));
        }
        if (plugin.status == PluginStatus::Enabled) != plugin.is_enabled {
            return Err(DbError::Validation(format!(
                "plugin {:?}: status {} disagrees with is_enabled={}",
                plugin.name, plugin.status, plugin.is_enabled
            )));
        }

        let changed = self.db.conn().execute(
            "UPDATE plugin SET
                implementation_reference = ?1,
                version = ?2,
                description = ?3,
                category = ?4,
                status = ?5,
                is_enabled = ?6,
                is_core = ?7,
                is_locked = ?8,
                load_order = ?9,
                location = ?10,
                settings = ?11,
                owned_tables = ?12,
                enabled_at = ?13,
                disabled_at = ?14,
                updated_at = ?15,
                revision = revision + 1
             WHERE name = ?16 AND revision = ?17",
            params![
                plugin.implementation_reference,
                nullable_string(&plugin.version),
                nullable_string(&plugin.description),
                plugin.category,
                plugin.status.as_str(),
                plugin.is_enabled,
                plugin.is_core,
                plugin.is_locked,
                plugin.load_order,
                nullable_string(&plugin.location),
                serde_json::to_string(&plugin.settings)?,
                serde_json::to_string(&plugin.owned_tables)?,
                plugin.enabled_at.as_ref().map(format_ts),
                plugin.disabled_at.as_ref().map(format_ts),
                format_ts(&crate::now()),
                plugin.name,
                plugin.revision,
            ],
        )?;

        if changed == 0 {
            if !self.exists(&plugin.name)? {
                return Err(DbError::PluginNotFound(plugin.name.clone()));
            }
            return Err(DbError::StaleRevision {
                name: plugin.name.clone(),
                expected: plugin.revision,
            });
        }
        self.get(&plugin.name)
    }

    /// Removes the record. Dependency edges and hooks go with it through
    /// foreign-key cascades.
    pub fn delete(&self, name: &str) -> Result<(), DbError> {
        let rows = self
            .db
            .conn()
            .execute("DELETE FROM plugin WHERE name = ?1", params![name.trim()])?;
        if rows == 0 {
            return Err(DbError::PluginNotFound(name.trim().to_string()));
        }
        Ok(())
    }

    pub fn count(&self) -> Result<i64, DbError> {
        let count: i64 = self
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM plugin", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn scan_plugin(row: &Row<'_>) -> rusqlite::Result<Plugin> {
    let status: String = row.get(6)?;
    let settings: String = row.get(12)?;
    let owned_tables: String = row.get(13)?;
    let created_at: String = row.get(16)?;
    let updated_at: String = row.get(17)?;
    Ok(Plugin {
        id: row.get(0)?,
        name: row.get(1)?,
        implementation_reference: row.get(2)?,
        version: row.get(3)?,
        description: row.get(4)?,
        category: row.get(5)?,
        status: status
            .parse::<PluginStatus>()
            .map_err(|err| conversion_error(6, err))?,
        is_enabled: row.get(7)?,
        is_core: row.get(8)?,
        is_locked: row.get(9)?,
        load_order: row.get(10)?,
        location: row.get(11)?,
        settings: from_json(12, &settings)?,
        owned_tables: from_json(13, &owned_tables)?,
        enabled_at: parse_opt_ts(14, row.get(14)?)?,
        disabled_at: parse_opt_ts(15, row.get(15)?)?,
        created_at: parse_ts(16, &created_at)?,
        updated_at: parse_ts(17, &updated_at)?,
        revision: row.get(18)?,
    })
}
