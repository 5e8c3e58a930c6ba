#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use plugctl_core::{
    Dependency, HookSpec, NewPlugin, OwnedTables, PluginFilter, PluginStatus, SettingValue,
};
use plugctl_db::{Config, Db, DbError, DependencyRepository, HookRepository, PluginRepository};

fn temp_db_path(tag: &str) -> PathBuf {
    let nanos = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos(),
        Err(_) => 0,
    };
    std::env::temp_dir().join(format!(
        "plugctl-db-plugin-{tag}-{nanos}-{}.sqlite",
        std::process::id()
    ))
}

fn setup_db(tag: &str) -> (Db, PathBuf) {
    let path = temp_db_path(tag);
    let mut db = Db::open(Config::new(&path)).expect("open db");
    db.migrate_up().expect("migrate_up");
    (db, path)
}

fn plugin(name: &str, category: &str, load_order: i64) -> NewPlugin {
    let mut p = NewPlugin::new(name);
    p.category = category.into();
    p.load_order = load_order;
    p
}

#[test]
fn create_get_and_duplicate() {
    let (db, path) = setup_db("create");
    let repo = PluginRepository::new(&db);

    let mut input = plugin("acl", "security", 70);
    input.version = Some("1.2.0".into());
    input.location = Some("/plugins/aclPlugin".into());
    input.owned_tables = OwnedTables::new(["acl_group", "acl_permission"]).unwrap();
    input.settings.insert("strict", true);

    let created = repo.create(&input).expect("create");
    assert!(created.id > 0);
    assert_eq!(created.name, "acl");
    assert_eq!(created.implementation_reference, "acl");
    assert_eq!(created.status, PluginStatus::Registered);
    assert!(!created.is_enabled);
    assert!(created.enabled_at.is_none());
    assert_eq!(created.revision, 1);
    assert_eq!(created.version.as_deref(), Some("1.2.0"));
    assert_eq!(created.owned_tables.len(), 2);
    assert_eq!(
        created.settings.get("strict"),
        Some(&SettingValue::Boolean(true))
    );

    let fetched = repo.get("acl").expect("get");
    assert_eq!(fetched, created);
    assert!(repo.exists("acl").unwrap());
    assert!(!repo.exists("nope").unwrap());

    match repo.create(&input) {
        Err(DbError::PluginAlreadyExists(name)) => assert_eq!(name, "acl"),
        other => panic!("expected duplicate error, got {other:?}"),
    }
    assert!(matches!(repo.get("nope"), Err(DbError::PluginNotFound(_))));
    assert!(repo.find("nope").unwrap().is_none());

    let _ = std::fs::remove_file(path);
}

#[test]
fn core_plugins_are_created_enabled_and_locked() {
    let (db, path) = setup_db("core");
    let repo = PluginRepository::new(&db);

    let mut input = plugin("propel-bridge", "core", 10);
    input.is_core = true;
    let created = repo.create(&input).expect("create");
    assert!(created.is_core);
    assert!(created.is_locked);
    assert!(created.is_enabled);
    assert_eq!(created.status, PluginStatus::Enabled);
    assert!(created.enabled_at.is_some());

    let mut unlocked = created.clone();
    unlocked.is_locked = false;
    assert!(matches!(repo.update(&unlocked), Err(DbError::Validation(_))));

    let _ = std::fs::remove_file(path);
}

#[test]
fn find_all_filters_and_orders_by_load_order() {
    let (db, path) = setup_db("filter");
    let repo = PluginRepository::new(&db);

    repo.create(&plugin("workflow", "workflow", 90)).unwrap();
    repo.create(&plugin("acl", "security", 70)).unwrap();
    let mut enabled = plugin("search", "general", 30);
    enabled.is_enabled = true;
    repo.create(&enabled).unwrap();

    let names = |plugins: Vec<plugctl_core::Plugin>| -> Vec<String> {
        plugins.into_iter().map(|p| p.name).collect()
    };

    let all = repo.find_all(&PluginFilter::default()).unwrap();
    assert_eq!(names(all), vec!["search", "acl", "workflow"]);

    let enabled = repo.find_all(&PluginFilter::enabled()).unwrap();
    assert_eq!(names(enabled), vec!["search"]);

    let registered = repo
        .find_all(&PluginFilter::with_status(PluginStatus::Registered))
        .unwrap();
    assert_eq!(names(registered), vec!["acl", "workflow"]);

    let security = repo
        .find_all(&PluginFilter {
            category: Some("security".into()),
            ..PluginFilter::default()
        })
        .unwrap();
    assert_eq!(names(security), vec!["acl"]);

    assert_eq!(repo.names().unwrap(), vec!["acl", "search", "workflow"]);
    assert_eq!(repo.count().unwrap(), 3);

    let _ = std::fs::remove_file(path);
}

#[test]
fn update_is_compare_and_swap_on_revision() {
    let (db, path) = setup_db("cas");
    let repo = PluginRepository::new(&db);

    let original = repo.create(&plugin("acl", "security", 70)).unwrap();

    let mut first = original.clone();
    first.status = PluginStatus::Enabled;
    first.is_enabled = true;
    first.enabled_at = Some(chrono::Utc::now());
    let stored = repo.update(&first).expect("first update");
    assert_eq!(stored.revision, original.revision + 1);
    assert!(stored.is_enabled);
    assert!(stored.enabled_at.is_some());

    // A writer still holding the original snapshot loses.
    let mut stale = original.clone();
    stale.category = "other".into();
    match repo.update(&stale) {
        Err(DbError::StaleRevision { name, expected }) => {
            assert_eq!(name, "acl");
            assert_eq!(expected, original.revision);
        }
        other => panic!("expected stale revision, got {other:?}"),
    }
    assert_eq!(repo.get("acl").unwrap().category, "security");

    let mut inconsistent = stored.clone();
    inconsistent.is_enabled = false;
    assert!(matches!(
        repo.update(&inconsistent),
        Err(DbError::Validation(_))
    ));

    let mut ghost = stored;
    ghost.name = "ghost".into();
    assert!(matches!(repo.update(&ghost), Err(DbError::PluginNotFound(_))));

    let _ = std::fs::remove_file(path);
}

#[test]
fn delete_cascades_edges_and_hooks() {
    let (db, path) = setup_db("delete");
    let repo = PluginRepository::new(&db);
    let deps = DependencyRepository::new(&db);
    let hooks = HookRepository::new(&db);

    repo.create(&plugin("acl", "security", 70)).unwrap();
    repo.create(&plugin("clearance", "security", 70)).unwrap();
    deps.add(&Dependency::new("clearance", "acl")).unwrap();
    hooks
        .register(
            "clearance",
            &HookSpec {
                event_name: "context.load_factories".into(),
                listener_reference: "Clearance::boot".into(),
                priority: 0,
            },
        )
        .unwrap();

    repo.delete("clearance").expect("delete");
    assert!(!repo.exists("clearance").unwrap());
    assert!(deps.for_plugin("clearance").unwrap().is_empty());
    assert!(deps.dependents("acl").unwrap().is_empty());
    assert!(hooks.for_plugin("clearance").unwrap().is_empty());

    assert!(matches!(
        repo.delete("clearance"),
        Err(DbError::PluginNotFound(_))
    ));

    let _ = std::fs::remove_file(path);
}
