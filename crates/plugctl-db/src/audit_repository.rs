//! Append-only audit trail: persistence for the `plugin_audit` table.
//!
//! There is no update or delete here, and triggers in the schema reject
//! both.

use plugctl_core::{AuditAction, AuditEntry, NewAuditEntry, PluginSnapshot};
use rusqlite::{params, Row};

use crate::{conversion_error, format_ts, from_json, nullable_string, parse_ts, Db, DbError};

const SELECT_COLUMNS: &str = "SELECT
    id, plugin, action, actor, previous_state, new_state, reason, source_address, created_at
 FROM plugin_audit";

pub struct AuditRepository<'a> {
    db: &'a Db,
}

impl<'a> AuditRepository<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    pub fn append(&self, entry: &NewAuditEntry) -> Result<AuditEntry, DbError> {
        if entry.plugin.trim().is_empty() {
            return Err(DbError::Validation("audit entry needs a plugin".into()));
        }
        let created_at = crate::now();
        let previous = entry
            .previous_state
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let new = entry
            .new_state
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.db.conn().execute(
            "INSERT INTO plugin_audit (
                plugin, action, actor, previous_state, new_state,
                reason, source_address, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.plugin.trim(),
                entry.action.as_str(),
                nullable_string(&entry.actor),
                previous,
                new,
                nullable_string(&entry.reason),
                nullable_string(&entry.source_address),
                format_ts(&created_at),
            ],
        )?;

        Ok(AuditEntry {
            id: self.db.conn().last_insert_rowid(),
            plugin: entry.plugin.trim().to_string(),
            action: entry.action,
            actor: nullable_string(&entry.actor).map(str::to_string),
            previous_state: entry.previous_state.clone(),
            new_state: entry.new_state.clone(),
            reason: nullable_string(&entry.reason).map(str::to_string),
            source_address: nullable_string(&entry.source_address).map(str::to_string),
            created_at,
        })
    }

    /// Newest first. `limit` of zero means no limit.
    pub fn list(&self, plugin: Option<&str>, limit: usize) -> Result<Vec<AuditEntry>, DbError> {
        let limit = if limit == 0 { -1 } else { limit as i64 };
        let sql = format!(
            "{SELECT_COLUMNS}
             WHERE (?1 IS NULL OR plugin = ?1)
             ORDER BY id DESC
             LIMIT ?2"
        );
        let mut stmt = self.db.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![plugin.map(str::trim), limit], scan_audit)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn count(&self, plugin: &str, action: Option<AuditAction>) -> Result<i64, DbError> {
        let count: i64 = self.db.conn().query_row(
            "SELECT COUNT(*) FROM plugin_audit WHERE plugin = ?1 AND (?2 IS NULL OR action = ?2)",
            params![plugin.trim(), action.map(AuditAction::as_str)],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn scan_audit(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    let action: String = row.get(2)?;
    let previous: Option<String> = row.get(4)?;
    let new: Option<String> = row.get(5)?;
    let created_at: String = row.get(8)?;
    Ok(AuditEntry {
        id: row.get(0)?,
        plugin: row.get(1)?,
        action: action
            .parse::<AuditAction>()
            .map_err(|err| conversion_error(2, err))?,
        actor: row.get(3)?,
        previous_state: previous
            .map(|raw| from_json::<PluginSnapshot>(4, &raw))
            .transpose()?,
        new_state: new
            .map(|raw| from_json::<PluginSnapshot>(5, &raw))
            .transpose()?,
        reason: row.get(6)?,
        source_address: row.get(7)?,
        created_at: parse_ts(8, &created_at)?,
    })
}
