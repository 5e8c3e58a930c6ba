#![allow(clippy::expect_used, clippy::unwrap_used)]

use plugctl_core::OwnedTables;
use plugctl_db::{Config, Db, TableStore};
use plugctl_lifecycle::{BackupArchiver, BackupDocument, LifecycleError};
use tempfile::TempDir;

fn setup() -> (Db, BackupArchiver, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut db = Db::open(Config::new(dir.path().join("plugctl.db"))).expect("open db");
    db.migrate_up().expect("migrate_up");
    db.conn()
        .execute_batch(
            "CREATE TABLE gallery_image (
                id INTEGER PRIMARY KEY,
                path TEXT NOT NULL,
                width INTEGER,
                ratio REAL,
                thumb BLOB
             );
             CREATE INDEX idx_gallery_image_path ON gallery_image(path);
             INSERT INTO gallery_image VALUES (1, 'a.png', 640, 1.5, x'00ff');
             INSERT INTO gallery_image VALUES (2, 'b''s.png', NULL, NULL, NULL);
             INSERT INTO gallery_image VALUES (3, 'c.png', 800, 0.75, NULL);
             CREATE TABLE gallery_album (id INTEGER PRIMARY KEY, title TEXT);
             INSERT INTO gallery_album VALUES (1, 'Summer');",
        )
        .expect("seed tables");
    let archiver = BackupArchiver::new(dir.path().join("backups"));
    (db, archiver, dir)
}

fn owned(tables: &[&str]) -> OwnedTables {
    OwnedTables::new(tables.iter().copied()).expect("owned tables")
}

#[test]
fn backup_drop_restore_round_trip() {
    let (db, archiver, _dir) = setup();
    let tables = owned(&["gallery_image", "gallery_album"]);
    let store = TableStore::new(&db);

    let before: Vec<_> = tables.iter().map(|t| store.capture(t).unwrap()).collect();
    let artifact = archiver
        .backup(&db, "gallery", &tables)
        .unwrap()
        .expect("artifact");
    assert!(artifact.starts_with(archiver.root().join("gallery")));
    let file_name = artifact.file_name().unwrap().to_string_lossy().into_owned();
    assert!(file_name.starts_with("gallery_") && file_name.ends_with(".json"));

    for table in tables.iter() {
        assert!(store.drop_table(table).unwrap());
    }

    let restored = archiver.restore_from_backup(&db, &artifact).unwrap();
    assert_eq!(restored, vec!["gallery_image", "gallery_album"]);
    for capture in &before {
        let again = store.capture(&capture.name).unwrap();
        assert_eq!(again.create_sql, capture.create_sql);
        assert_eq!(again.index_sql, capture.index_sql);
        assert_eq!(again.row_count(), capture.row_count());
        assert_eq!(again.rows, capture.rows);
    }
}

#[test]
fn artifact_is_a_versioned_json_document() {
    let (db, archiver, _dir) = setup();
    let artifact = archiver
        .backup(&db, "gallery", &owned(&["gallery_album"]))
        .unwrap()
        .expect("artifact");

    let doc: BackupDocument = archiver.read(&artifact).unwrap();
    assert_eq!(doc.format, 1);
    assert_eq!(doc.plugin, "gallery");
    assert_eq!(doc.tables.len(), 1);
    assert_eq!(doc.tables[0].columns, vec!["id", "title"]);
}

#[test]
fn no_owned_tables_means_no_artifact() {
    let (db, archiver, _dir) = setup();
    assert_eq!(archiver.backup(&db, "gallery", &OwnedTables::default()).unwrap(), None);
    assert_eq!(
        archiver.backup(&db, "gallery", &owned(&["gallery_missing"])).unwrap(),
        None
    );
    assert!(archiver.list_backups("gallery").unwrap().is_empty());

    // Missing tables are skipped, existing ones still archived.
    let artifact = archiver
        .backup(&db, "gallery", &owned(&["gallery_missing", "gallery_album"]))
        .unwrap()
        .expect("artifact");
    let doc = archiver.read(&artifact).unwrap();
    assert_eq!(doc.tables.len(), 1);
    assert_eq!(doc.tables[0].name, "gallery_album");
}

#[test]
fn cleanup_keeps_the_newest_artifacts() {
    let (db, archiver, _dir) = setup();
    let tables = owned(&["gallery_album"]);
    let mut created = Vec::new();
    for _ in 0..4 {
        created.push(archiver.backup(&db, "gallery", &tables).unwrap().expect("artifact"));
    }

    let listed = archiver.list_backups("gallery").unwrap();
    assert_eq!(listed.len(), 4);
    assert_eq!(listed[0].path, created[3], "newest first");
    assert!(listed.iter().all(|a| a.created_at.is_some() && a.size_bytes > 0));

    assert_eq!(archiver.cleanup_backups("gallery", 2).unwrap(), 2);
    let kept: Vec<_> = archiver
        .list_backups("gallery")
        .unwrap()
        .into_iter()
        .map(|a| a.path)
        .collect();
    assert_eq!(kept, vec![created[3].clone(), created[2].clone()]);

    assert_eq!(archiver.cleanup_backups("gallery", 5).unwrap(), 0);
    assert_eq!(archiver.list_backups("gallery").unwrap().len(), 2);
}

#[test]
fn failed_restore_propagates_and_changes_nothing() {
    let (db, archiver, _dir) = setup();
    let artifact = archiver
        .backup(&db, "gallery", &owned(&["gallery_image", "gallery_album"]))
        .unwrap()
        .expect("artifact");

    let mut doc = archiver.read(&artifact).unwrap();
    doc.tables[1].create_sql = "CREATE TABLE gallery_album (".into();
    std::fs::write(&artifact, serde_json::to_vec(&doc).unwrap()).unwrap();

    db.conn()
        .execute("DELETE FROM gallery_image WHERE id = 3", [])
        .unwrap();

    match archiver.restore_from_backup(&db, &artifact) {
        Err(LifecycleError::RestoreFailure { artifact: path, .. }) => assert_eq!(path, artifact),
        other => panic!("expected restore failure, got {other:?}"),
    }
    let store = TableStore::new(&db);
    assert_eq!(store.row_count("gallery_image").unwrap(), 2, "first table rolled back");

    let missing = artifact.with_file_name("gallery_19700101_000000000.json");
    assert!(matches!(
        archiver.restore_from_backup(&db, &missing),
        Err(LifecycleError::RestoreFailure { .. })
    ));
}

#[test]
fn verify_rejects_an_artifact_that_no_longer_matches() {
    let (db, archiver, _dir) = setup();
    let artifact = archiver
        .backup(&db, "gallery", &owned(&["gallery_image", "gallery_album"]))
        .unwrap()
        .expect("artifact");
    archiver.verify(&db, "gallery", &artifact).unwrap();

    assert!(matches!(
        archiver.verify(&db, "other", &artifact),
        Err(LifecycleError::BackupFailure { .. })
    ));

    db.conn()
        .execute("INSERT INTO gallery_album VALUES (2, 'Winter')", [])
        .unwrap();
    match archiver.verify(&db, "gallery", &artifact) {
        Err(LifecycleError::BackupFailure { plugin, reason }) => {
            assert_eq!(plugin, "gallery");
            assert!(reason.contains("gallery_album"), "{reason}");
        }
        other => panic!("expected backup failure, got {other:?}"),
    }

    std::fs::write(&artifact, b"{ not json").unwrap();
    assert!(matches!(
        archiver.verify(&db, "gallery", &artifact),
        Err(LifecycleError::BackupFailure { .. })
    ));
}
