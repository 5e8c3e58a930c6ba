#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use plugctl_db::{Config, Db, MIGRATIONS};
use rusqlite::{params, Connection};

fn temp_db_path(tag: &str) -> PathBuf {
    let nanos = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos(),
        Err(_) => 0,
    };
    std::env::temp_dir().join(format!(
        "plugctl-db-migration-{tag}-{nanos}-{}.sqlite",
        std::process::id()
    ))
}

fn object_exists(db_path: &Path, object_type: &str, name: &str) -> bool {
    let conn = Connection::open(db_path).expect("open sqlite connection");
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2)",
            params![object_type, name],
            |row| row.get(0),
        )
        .expect("sqlite_master lookup");
    exists == 1
}

#[test]
fn migration_001_up_down_creates_and_removes_registry_schema() {
    let db_path = temp_db_path("001");
    let mut db = Db::open(Config::new(&db_path)).expect("open db");

    db.migrate_to(1).expect("migrate_to(1)");
    assert_eq!(db.schema_version().expect("schema_version"), 1);

    for table in ["plugin", "plugin_dependency", "plugin_hook", "plugin_audit"] {
        assert!(object_exists(&db_path, "table", table), "missing {table}");
    }
    for index in [
        "idx_plugin_is_enabled",
        "idx_plugin_category",
        "idx_plugin_load_order",
        "idx_plugin_dependency_requires",
        "idx_plugin_hook_event",
        "idx_plugin_hook_event_active",
        "idx_plugin_audit_actor",
        "idx_plugin_audit_action",
        "idx_plugin_audit_created_at",
    ] {
        assert!(object_exists(&db_path, "index", index), "missing {index}");
    }
    assert!(object_exists(&db_path, "trigger", "plugin_audit_no_update"));
    assert!(object_exists(&db_path, "trigger", "plugin_audit_no_delete"));
    assert!(!object_exists(&db_path, "table", "plugin_setting"));

    db.migrate_to(0).expect("migrate_to(0)");
    assert_eq!(db.schema_version().expect("schema_version"), 0);
    assert!(!object_exists(&db_path, "table", "plugin"));
    assert!(!object_exists(&db_path, "table", "plugin_audit"));

    let _ = std::fs::remove_file(db_path);
}

#[test]
fn migrate_up_is_idempotent_and_down_steps_back() {
    let db_path = temp_db_path("updown");
    let mut db = Db::open(Config::new(&db_path)).expect("open db");

    let applied = db.migrate_up().expect("migrate_up");
    assert_eq!(applied, MIGRATIONS.len());
    assert_eq!(db.migrate_up().expect("second migrate_up"), 0);
    assert!(db.is_current().expect("is_current"));
    assert!(object_exists(&db_path, "table", "plugin_setting"));

    assert_eq!(db.migrate_down(1).expect("migrate_down"), 1);
    assert!(!object_exists(&db_path, "table", "plugin_setting"));
    assert!(object_exists(&db_path, "table", "plugin"));
    assert!(!db.is_current().expect("is_current"));

    assert_eq!(db.migrate_down(0).expect("noop down"), 0);

    let status = db.migration_status().expect("status");
    assert_eq!(status.len(), MIGRATIONS.len());
    assert!(status[0].applied);
    assert!(!status[0].applied_at.is_empty());
    assert!(!status[1].applied);
    assert!(status[1].applied_at.is_empty());

    let _ = std::fs::remove_file(db_path);
}

#[test]
fn fresh_store_reports_version_zero() {
    let db_path = temp_db_path("fresh");
    let db = Db::open(Config::new(&db_path)).expect("open db");
    assert_eq!(db.schema_version().expect("schema_version"), 0);
    assert!(!db.is_current().expect("is_current"));
    let _ = std::fs::remove_file(db_path);
}

#[test]
fn connect_opens_existing_store_and_rejects_garbage() {
    let db_path = temp_db_path("connect");
    {
        let mut db = Db::open(Config::new(&db_path)).expect("open db");
        db.migrate_up().expect("migrate_up");
    }
    let db = Db::connect(Config::new(&db_path)).expect("connect");
    assert_eq!(db.path(), db_path.as_path());
    assert!(db.is_current().expect("is_current"));
    drop(db);

    let junk = temp_db_path("junk");
    std::fs::write(&junk, b"definitely not sqlite, just some bytes to fill a page")
        .expect("write junk");
    assert!(Db::connect(Config::new(&junk)).is_err());

    let _ = std::fs::remove_file(db_path);
    let _ = std::fs::remove_file(junk);
}
