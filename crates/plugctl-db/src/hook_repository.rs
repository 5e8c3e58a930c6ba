//! Hook bindings: persistence for the `plugin_hook` table.

use plugctl_core::{HookBinding, HookSpec};
use rusqlite::{params, OptionalExtension, Row};

use crate::{format_ts, Db, DbError};

const SELECT_COLUMNS: &str =
    "SELECT id, plugin, event_name, listener_reference, priority, is_active FROM plugin_hook";

pub struct HookRepository<'a> {
    db: &'a Db,
}

impl<'a> HookRepository<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    /// Binds `plugin` to an event. Re-registering the same listener updates
    /// its priority and reactivates it.
    pub fn register(&self, plugin: &str, hook: &HookSpec) -> Result<HookBinding, DbError> {
        let plugin = plugin.trim();
        let event = hook.event_name.trim();
        let listener = hook.listener_reference.trim();
        if event.is_empty() || listener.is_empty() {
            return Err(DbError::Validation(
                "hook needs an event name and a listener reference".into(),
            ));
        }
        if !crate::PluginRepository::new(self.db).exists(plugin)? {
            return Err(DbError::PluginNotFound(plugin.to_string()));
        }

        self.db.conn().execute(
            "INSERT INTO plugin_hook (
                plugin, event_name, listener_reference, priority, is_active, created_at
            ) VALUES (?1, ?2, ?3, ?4, 1, ?5)
            ON CONFLICT (plugin, event_name, listener_reference)
            DO UPDATE SET priority = excluded.priority, is_active = 1",
            params![plugin, event, listener, hook.priority, format_ts(&crate::now())],
        )?;

        let sql = format!(
            "{SELECT_COLUMNS} WHERE plugin = ?1 AND event_name = ?2 AND listener_reference = ?3"
        );
        let binding = self
            .db
            .conn()
            .query_row(&sql, params![plugin, event, listener], scan_hook)?;
        Ok(binding)
    }

    /// Active bindings for `event`, lowest priority value first.
    pub fn for_event(&self, event: &str) -> Result<Vec<HookBinding>, DbError> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE event_name = ?1 AND is_active = 1 ORDER BY priority, id"
        );
        self.collect(&sql, event)
    }

    pub fn for_plugin(&self, plugin: &str) -> Result<Vec<HookBinding>, DbError> {
        let sql = format!("{SELECT_COLUMNS} WHERE plugin = ?1 ORDER BY event_name, priority, id");
        self.collect(&sql, plugin)
    }

    pub fn get(&self, id: i64) -> Result<HookBinding, DbError> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let binding = self
            .db
            .conn()
            .query_row(&sql, params![id], scan_hook)
            .optional()?;
        binding.ok_or(DbError::HookNotFound(id))
    }

    pub fn set_active(&self, id: i64, active: bool) -> Result<(), DbError> {
        let rows = self.db.conn().execute(
            "UPDATE plugin_hook SET is_active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        if rows == 0 {
            return Err(DbError::HookNotFound(id));
        }
        Ok(())
    }

    pub fn remove_for_plugin(&self, plugin: &str) -> Result<usize, DbError> {
        let rows = self.db.conn().execute(
            "DELETE FROM plugin_hook WHERE plugin = ?1",
            params![plugin.trim()],
        )?;
        Ok(rows)
    }

    fn collect(&self, sql: &str, key: &str) -> Result<Vec<HookBinding>, DbError> {
        let mut stmt = self.db.conn().prepare(sql)?;
        let rows = stmt.query_map(params![key.trim()], scan_hook)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn scan_hook(row: &Row<'_>) -> rusqlite::Result<HookBinding> {
    Ok(HookBinding {
        id: row.get(0)?,
        plugin: row.get(1)?,
        event_name: row.get(2)?,
        listener_reference: row.get(3)?,
        priority: row.get(4)?,
        is_active: row.get(5)?,
    })
}
