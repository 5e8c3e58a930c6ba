//! plugctl-db: SQLite storage, migration engine and registry repositories.

pub mod audit_repository;
pub mod dependency_repository;
pub mod hook_repository;
pub mod plugin_repository;
pub mod setting_repository;
pub mod table_store;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use plugctl_core::ModelError;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;

pub use audit_repository::AuditRepository;
pub use dependency_repository::DependencyRepository;
pub use hook_repository::HookRepository;
pub use plugin_repository::PluginRepository;
pub use setting_repository::SettingRepository;
pub use table_store::{CellValue, TableCapture, TableStore};

include!(concat!(env!("OUT_DIR"), "/migrations.rs"));

#[derive(Debug, Clone)]
pub struct Config {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Config {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug)]
pub struct Db {
    conn: Connection,
    path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub version: i32,
    pub description: String,
    pub applied: bool,
    pub applied_at: String,
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("migration {version} missing {direction} sql")]
    MissingSQL {
        version: i32,
        direction: &'static str,
    },
    #[error("database {0} does not exist")]
    NotConnectable(PathBuf),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Transaction(String),
    #[error("plugin {0:?} not found")]
    PluginNotFound(String),
    #[error("plugin {0:?} already exists")]
    PluginAlreadyExists(String),
    #[error("dependency {plugin:?} -> {requires:?} already exists")]
    DependencyAlreadyExists { plugin: String, requires: String },
    #[error("hook {0} not found")]
    HookNotFound(i64),
    #[error("plugin {name:?} changed since revision {expected}")]
    StaleRevision { name: String, expected: i64 },
    #[error("table {0:?} not found")]
    TableNotFound(String),
}

impl Db {
    const DEFAULT_RETRY_ATTEMPTS: usize = 3;
    const DEFAULT_RETRY_BACKOFF_MS: u64 = 50;

    /// Opens the store, creating the file and its parent directory.
    pub fn open(cfg: Config) -> Result<Self, DbError> {
        ensure_parent_dir(&cfg.path)?;
        let conn = Connection::open(&cfg.path)?;
        Self::configure(conn, cfg)
    }

    /// Opens an existing store only. A missing file is not connectable.
    pub fn connect(cfg: Config) -> Result<Self, DbError> {
        if !cfg.path.is_file() {
            return Err(DbError::NotConnectable(cfg.path));
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&cfg.path, flags)?;
        // Fails on files that are not SQLite databases.
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })?;
        Self::configure(conn, cfg)
    }

    fn configure(conn: Connection, cfg: Config) -> Result<Self, DbError> {
        conn.busy_timeout(Duration::from_millis(cfg.busy_timeout_ms))?;
        // Best-effort: ignore pragma errors on older SQLite builds.
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "foreign_keys", "ON");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        Ok(Self {
            conn,
            path: cfg.path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn migrate_up(&mut self) -> Result<usize, DbError> {
        self.ensure_schema_version_table()?;
        let current = self.schema_version()?;

        let mut applied = 0usize;
        for m in MIGRATIONS {
            if m.version <= current {
                continue;
            }
            self.apply_up(m)?;
            applied += 1;
        }
        Ok(applied)
    }

    pub fn migrate_down(&mut self, steps: i32) -> Result<usize, DbError> {
        self.ensure_schema_version_table()?;
        let current = self.schema_version()?;
        if current == 0 || steps <= 0 {
            return Ok(0);
        }

        let to_rollback: Vec<EmbeddedMigration> = MIGRATIONS
            .iter()
            .rev()
            .filter(|m| m.version <= current)
            .take(steps as usize)
            .copied()
            .collect();

        let mut rolled_back = 0usize;
        for m in &to_rollback {
            self.apply_down(m)?;
            rolled_back += 1;
        }
        Ok(rolled_back)
    }

    pub fn migrate_to(&mut self, target_version: i32) -> Result<(), DbError> {
        self.ensure_schema_version_table()?;
        let current = self.schema_version()?;
        if target_version == current {
            return Ok(());
        }

        if target_version > current {
            for m in MIGRATIONS {
                if m.version <= current || m.version > target_version {
                    continue;
                }
                self.apply_up(m)?;
            }
        } else {
            for m in MIGRATIONS.iter().rev() {
                if m.version <= target_version || m.version > current {
                    continue;
                }
                self.apply_down(m)?;
            }
        }
        Ok(())
    }

    fn apply_up(&mut self, m: &EmbeddedMigration) -> Result<(), DbError> {
        if m.up_sql.is_empty() {
            return Err(DbError::MissingSQL {
                version: m.version,
                direction: "up",
            });
        }
        let tx = self.conn.transaction()?;
        tx.execute_batch(m.up_sql)?;
        tx.execute(
            "INSERT INTO schema_version (version, description) VALUES (?1, ?2)",
            params![m.version, m.description],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn apply_down(&mut self, m: &EmbeddedMigration) -> Result<(), DbError> {
        if m.down_sql.is_empty() {
            return Err(DbError::MissingSQL {
                version: m.version,
                direction: "down",
            });
        }
        let tx = self.conn.transaction()?;
        tx.execute_batch(m.down_sql)?;
        tx.execute(
            "DELETE FROM schema_version WHERE version = ?1",
            params![m.version],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn migration_status(&mut self) -> Result<Vec<MigrationStatus>, DbError> {
        self.ensure_schema_version_table()?;

        let mut applied_at: BTreeMap<i32, String> = BTreeMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT version, applied_at FROM schema_version ORDER BY version")?;
        let rows = stmt.query_map([], |row| {
            let version: i32 = row.get(0)?;
            let stamp: String = row.get(1)?;
            Ok((version, stamp))
        })?;
        for row in rows {
            let (version, stamp) = row?;
            applied_at.insert(version, stamp);
        }

        Ok(MIGRATIONS
            .iter()
            .map(|m| MigrationStatus {
                version: m.version,
                description: m.description.to_string(),
                applied: applied_at.contains_key(&m.version),
                applied_at: applied_at.get(&m.version).cloned().unwrap_or_default(),
            })
            .collect())
    }

    /// Highest applied migration, 0 for a fresh store.
    pub fn schema_version(&self) -> Result<i32, DbError> {
        let has_table: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
            [],
            |row| row.get(0),
        )?;
        if !has_table {
            return Ok(0);
        }
        let version: Option<i32> = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version.unwrap_or(0))
    }

    /// True once every embedded migration has been applied.
    pub fn is_current(&self) -> Result<bool, DbError> {
        let latest = MIGRATIONS.last().map_or(0, |m| m.version);
        Ok(self.schema_version()? >= latest)
    }

    fn ensure_schema_version_table(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (\n\
                version INTEGER PRIMARY KEY,\n\
                applied_at TEXT NOT NULL DEFAULT (datetime('now')),\n\
                description TEXT\n\
             );",
        )?;
        Ok(())
    }

    /// Returns a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Executes `f` inside a SQLite transaction: explicit rollback on error,
    /// explicit commit on success.
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        let tx = self.conn.transaction()?;

        match f(&tx) {
            Ok(v) => {
                tx.commit()?;
                Ok(v)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback() {
                    return Err(DbError::Transaction(format!(
                        "rollback failed: {rb} (original error: {e})"
                    )));
                }
                Err(e)
            }
        }
    }

    /// Retries [`Db::transaction`] while SQLite reports busy/locked, doubling
    /// the backoff each attempt.
    pub fn transaction_with_retry<T>(
        &mut self,
        mut max_attempts: usize,
        mut base_backoff: Duration,
        mut f: impl FnMut(&rusqlite::Transaction<'_>) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        if max_attempts == 0 {
            max_attempts = Self::DEFAULT_RETRY_ATTEMPTS;
        }
        if base_backoff.is_zero() {
            base_backoff = Duration::from_millis(Self::DEFAULT_RETRY_BACKOFF_MS);
        }

        let mut backoff = base_backoff;
        let mut attempt = 1;
        loop {
            match self.transaction(&mut f) {
                Ok(v) => return Ok(v),
                Err(e) if attempt >= max_attempts || !is_busy_error(&e) => return Err(e),
                Err(_) => {
                    std::thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
            }
        }
    }

    /// Runs `f` against this store inside one transaction.
    ///
    /// Repository calls made through the `&Db` handed to `f` share the
    /// transaction. It commits when `f` returns `Ok` and rolls back otherwise.
    pub fn atomic<T, E>(&self, f: impl FnOnce(&Db) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DbError>,
    {
        let tx = self.conn.unchecked_transaction().map_err(DbError::from)?;
        let value = f(self)?;
        tx.commit().map_err(DbError::from)?;
        Ok(value)
    }
}

fn is_busy_error(err: &DbError) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("database is locked")
        || msg.contains("database is busy")
        || msg.contains("sqlite_busy")
}

// ---------------------------------------------------------------------------
// Shared row helpers
// ---------------------------------------------------------------------------

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

pub(crate) fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|raw| parse_ts(idx, &raw)).transpose()
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

pub(crate) fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn is_unique_constraint_error(err: &rusqlite::Error) -> bool {
    err.to_string().contains("UNIQUE constraint failed")
}

pub(crate) fn nullable_string(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn ensure_parent_dir(path: &Path) -> Result<(), std::io::Error> {
    let parent = match path.parent() {
        Some(parent) => parent,
        None => return Ok(()),
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent)
}
