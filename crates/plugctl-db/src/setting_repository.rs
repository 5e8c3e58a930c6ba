//! Host-wide typed settings: persistence for the `plugin_setting` table.

use plugctl_core::SettingValue;
use rusqlite::{params, OptionalExtension};

use crate::{conversion_error, format_ts, Db, DbError};

pub struct SettingRepository<'a> {
    db: &'a Db,
}

impl<'a> SettingRepository<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    pub fn get(&self, key: &str) -> Result<Option<SettingValue>, DbError> {
        let row: Option<(String, String)> = self
            .db
            .conn()
            .query_row(
                "SELECT setting_type, setting_value FROM plugin_setting WHERE setting_key = ?1",
                params![key.trim()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((kind, raw)) => Ok(Some(SettingValue::from_stored(&kind, &raw)?)),
            None => Ok(None),
        }
    }

    /// Inserts or replaces the value stored under `key`.
    pub fn set(&self, key: &str, value: &SettingValue) -> Result<(), DbError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(DbError::Validation("setting key is required".into()));
        }
        let now = format_ts(&crate::now());
        self.db.conn().execute(
            "INSERT INTO plugin_setting (
                setting_key, setting_value, setting_type, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT (setting_key) DO UPDATE SET
                setting_value = excluded.setting_value,
                setting_type = excluded.setting_type,
                updated_at = excluded.updated_at",
            params![key, value.to_stored(), value.kind(), now],
        )?;
        Ok(())
    }

    /// Returns whether a row was removed.
    pub fn delete(&self, key: &str) -> Result<bool, DbError> {
        let rows = self.db.conn().execute(
            "DELETE FROM plugin_setting WHERE setting_key = ?1",
            params![key.trim()],
        )?;
        Ok(rows > 0)
    }

    /// Every setting, sorted by key.
    pub fn list(&self) -> Result<Vec<(String, SettingValue)>, DbError> {
        let mut stmt = self.db.conn().prepare(
            "SELECT setting_key, setting_type, setting_value FROM plugin_setting ORDER BY setting_key",
        )?;
        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let kind: String = row.get(1)?;
            let raw: String = row.get(2)?;
            let value =
                SettingValue::from_stored(&kind, &raw).map_err(|err| conversion_error(2, err))?;
            Ok((key, value))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
