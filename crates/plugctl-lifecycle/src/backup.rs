//! Archives of plugin-owned tables.
//!
//! Each backup is one JSON document under `<root>/<plugin>/` holding the
//! schema and rows of every owned table that existed at capture time. Row
//! values keep their SQLite type, and restore binds them as parameters.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use plugctl_core::OwnedTables;
use plugctl_db::{Db, TableCapture, TableStore};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::LifecycleError;

pub const BACKUP_FORMAT: u32 = 1;
const ARTIFACT_EXT: &str = "json";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S%3f";
const MAX_NAME_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupDocument {
    pub format: u32,
    pub plugin: String,
    pub created_at: DateTime<Utc>,
    pub tables: Vec<TableCapture>,
}

/// One artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupArtifact {
    pub file_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Parsed from the file name; `None` for foreign files.
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct BackupArchiver {
    root: PathBuf,
}

impl BackupArchiver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn plugin_dir(&self, plugin: &str) -> PathBuf {
        self.root.join(plugin)
    }

    /// Captures every existing owned table into a new artifact.
    ///
    /// Returns `None` when the plugin owns no tables or none of them exist.
    pub fn backup(
        &self,
        db: &Db,
        plugin: &str,
        tables: &OwnedTables,
    ) -> Result<Option<PathBuf>, LifecycleError> {
        if tables.is_empty() {
            return Ok(None);
        }
        let failure = |reason: String| LifecycleError::BackupFailure {
            plugin: plugin.to_string(),
            reason,
        };

        let store = TableStore::new(db);
        let mut captures = Vec::new();
        for table in tables.iter() {
            if !store.table_exists(table).map_err(|e| failure(e.to_string()))? {
                warn!(plugin = %plugin, table = %table, "owned table missing, not archived");
                continue;
            }
            let capture = store
                .capture(table)
                .map_err(|e| failure(format!("capture {table}: {e}")))?;
            captures.push(capture);
        }
        if captures.is_empty() {
            return Ok(None);
        }

        let dir = self.plugin_dir(plugin);
        std::fs::create_dir_all(&dir)
            .map_err(|e| failure(format!("create {}: {e}", dir.display())))?;
        let (path, created_at) = self.next_artifact(&dir, plugin).map_err(failure)?;

        let doc = BackupDocument {
            format: BACKUP_FORMAT,
            plugin: plugin.to_string(),
            created_at,
            tables: captures,
        };
        let body = serde_json::to_vec_pretty(&doc).map_err(|e| failure(e.to_string()))?;
        let tmp = path.with_extension(format!("{ARTIFACT_EXT}.tmp"));
        std::fs::write(&tmp, body).map_err(|e| failure(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| failure(format!("rename {}: {e}", tmp.display())))?;

        info!(
            plugin = %plugin,
            artifact = %path.display(),
            tables = doc.tables.len(),
            "backup written"
        );
        Ok(Some(path))
    }

    pub fn read(&self, artifact: &Path) -> Result<BackupDocument, LifecycleError> {
        let failure = |reason: String| LifecycleError::RestoreFailure {
            artifact: artifact.to_path_buf(),
            reason,
        };
        let raw = std::fs::read(artifact).map_err(|e| failure(e.to_string()))?;
        let doc: BackupDocument = serde_json::from_slice(&raw).map_err(|e| failure(e.to_string()))?;
        if doc.format != BACKUP_FORMAT {
            return Err(failure(format!("unsupported format {}", doc.format)));
        }
        Ok(doc)
    }

    /// Reads `artifact` back and checks that it holds as many rows as each
    /// live table it archived. Run before anything is dropped.
    pub fn verify(&self, db: &Db, plugin: &str, artifact: &Path) -> Result<(), LifecycleError> {
        let failure = |reason: String| LifecycleError::BackupFailure {
            plugin: plugin.to_string(),
            reason,
        };
        let doc = self.read(artifact).map_err(|e| failure(e.to_string()))?;
        if doc.plugin != plugin {
            return Err(failure(format!(
                "artifact {} belongs to {:?}",
                artifact.display(),
                doc.plugin
            )));
        }
        let store = TableStore::new(db);
        for table in &doc.tables {
            let live = store
                .row_count(&table.name)
                .map_err(|e| failure(format!("count {}: {e}", table.name)))?;
            let archived = i64::try_from(table.row_count()).unwrap_or(i64::MAX);
            if live != archived {
                return Err(failure(format!(
                    "table {} has {live} row(s) but the artifact holds {archived}",
                    table.name
                )));
            }
        }
        Ok(())
    }

    /// Replays an artifact in one transaction and returns the restored table
    /// names. Tables with the same name are replaced.
    pub fn restore_from_backup(&self, db: &Db, artifact: &Path) -> Result<Vec<String>, LifecycleError> {
        let doc = self.read(artifact)?;
        TableStore::new(db)
            .restore(&doc.tables)
            .map_err(|e| LifecycleError::RestoreFailure {
                artifact: artifact.to_path_buf(),
                reason: e.to_string(),
            })?;
        let names: Vec<String> = doc.tables.into_iter().map(|t| t.name).collect();
        info!(
            plugin = %doc.plugin,
            artifact = %artifact.display(),
            tables = names.len(),
            "backup restored"
        );
        Ok(names)
    }

    /// Artifacts for `plugin`, newest first.
    pub fn list_backups(&self, plugin: &str) -> Result<Vec<BackupArtifact>, LifecycleError> {
        let dir = self.plugin_dir(plugin);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| LifecycleError::io(format!("read {}", dir.display()), e))?;

        let prefix = format!("{plugin}_");
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LifecycleError::io(format!("read {}", dir.display()), e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXT) {
                continue;
            }
            let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if !file_name.starts_with(&prefix) {
                continue;
            }
            let meta = entry
                .metadata()
                .map_err(|e| LifecycleError::io(format!("stat {}", path.display()), e))?;
            if !meta.is_file() {
                continue;
            }
            let created_at = parse_stamp(&file_name, &prefix);
            out.push(BackupArtifact {
                file_name,
                path,
                size_bytes: meta.len(),
                created_at,
            });
        }
        out.sort_by(|a, b| b.file_name.cmp(&a.file_name));
        Ok(out)
    }

    /// Deletes all but the `keep` newest artifacts. Returns how many went.
    pub fn cleanup_backups(&self, plugin: &str, keep: usize) -> Result<usize, LifecycleError> {
        let mut removed = 0;
        for artifact in self.list_backups(plugin)?.into_iter().skip(keep) {
            std::fs::remove_file(&artifact.path).map_err(|e| {
                LifecycleError::io(format!("remove {}", artifact.path.display()), e)
            })?;
            removed += 1;
        }
        if removed > 0 {
            info!(plugin = %plugin, removed, keep, "old backups removed");
        }
        Ok(removed)
    }

    /// Picks an unused, timestamped file name. Stamps have millisecond
    /// resolution, so a clash waits for the next millisecond.
    fn next_artifact(&self, dir: &Path, plugin: &str) -> Result<(PathBuf, DateTime<Utc>), String> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let now = Utc::now();
            let name = format!("{plugin}_{}.{ARTIFACT_EXT}", now.format(STAMP_FORMAT));
            let path = dir.join(name);
            if !path.exists() {
                return Ok((path, now));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        Err(format!("no free artifact name in {}", dir.display()))
    }
}

fn parse_stamp(file_name: &str, prefix: &str) -> Option<DateTime<Utc>> {
    let stamp = file_name
        .strip_prefix(prefix)?
        .strip_suffix(ARTIFACT_EXT)?
        .strip_suffix('.')?;
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_parse_back_from_file_names() {
        let parsed = parse_stamp("acl_20261019_101530123.json", "acl_");
        match parsed {
            Some(ts) => assert_eq!(ts.format(STAMP_FORMAT).to_string(), "20261019_101530123"),
            None => panic!("stamp did not parse"),
        }
        assert_eq!(parse_stamp("acl_notes.json", "acl_"), None);
        assert_eq!(parse_stamp("search_20261019_101530123.json", "acl_"), None);
    }

    #[test]
    fn missing_plugin_dir_lists_nothing() {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => panic!("tempdir: {err}"),
        };
        let archiver = BackupArchiver::new(dir.path());
        match archiver.list_backups("acl") {
            Ok(list) => assert!(list.is_empty()),
            Err(err) => panic!("list: {err}"),
        }
        match archiver.cleanup_backups("acl", 0) {
            Ok(removed) => assert_eq!(removed, 0),
            Err(err) => panic!("cleanup: {err}"),
        }
    }

    #[test]
    fn unreadable_artifact_is_restore_failure() {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => panic!("tempdir: {err}"),
        };
        let path = dir.path().join("acl_20260101_000000000.json");
        if let Err(err) = std::fs::write(&path, "{\"format\": 1") {
            panic!("write: {err}");
        }
        let archiver = BackupArchiver::new(dir.path());
        match archiver.read(&path) {
            Err(LifecycleError::RestoreFailure { artifact, .. }) => assert_eq!(artifact, path),
            other => panic!("expected restore failure, got {other:?}"),
        }
    }
}
