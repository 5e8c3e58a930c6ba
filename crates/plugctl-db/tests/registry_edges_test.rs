#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use plugctl_core::{
    AuditAction, AuditContext, Dependency, HookSpec, NewAuditEntry, NewPlugin, SettingValue,
};
use plugctl_db::{
    AuditRepository, Config, Db, DbError, DependencyRepository, HookRepository, PluginRepository,
    SettingRepository,
};

fn temp_db_path(tag: &str) -> PathBuf {
    let nanos = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos(),
        Err(_) => 0,
    };
    std::env::temp_dir().join(format!(
        "plugctl-db-edges-{tag}-{nanos}-{}.sqlite",
        std::process::id()
    ))
}

fn setup_db(tag: &str) -> (Db, PathBuf) {
    let path = temp_db_path(tag);
    let mut db = Db::open(Config::new(&path)).expect("open db");
    db.migrate_up().expect("migrate_up");
    (db, path)
}

fn hook(event: &str, listener: &str, priority: i64) -> HookSpec {
    HookSpec {
        event_name: event.into(),
        listener_reference: listener.into(),
        priority,
    }
}

#[test]
fn dependencies_allow_unregistered_targets_and_reject_duplicates() {
    let (db, path) = setup_db("deps");
    let plugins = PluginRepository::new(&db);
    let deps = DependencyRepository::new(&db);

    plugins.create(&NewPlugin::new("clearance")).unwrap();
    deps.add(&Dependency::new("clearance", "acl")).expect("edge to unregistered");
    deps.add(&Dependency::new("clearance", "search")).unwrap();
    deps.add(&Dependency::new("clearance", "audit-trail").optional())
        .unwrap();

    match deps.add(&Dependency::new("clearance", "acl")) {
        Err(DbError::DependencyAlreadyExists { plugin, requires }) => {
            assert_eq!(plugin, "clearance");
            assert_eq!(requires, "acl");
        }
        other => panic!("expected duplicate, got {other:?}"),
    }
    assert!(matches!(
        deps.add(&Dependency::new("ghost", "acl")),
        Err(DbError::PluginNotFound(_))
    ));
    assert!(matches!(
        deps.add(&Dependency::new("clearance", "clearance")),
        Err(DbError::Validation(_))
    ));

    let declared = deps.for_plugin("clearance").unwrap();
    let names: Vec<&str> = declared.iter().map(|d| d.requires_plugin.as_str()).collect();
    assert_eq!(names, vec!["acl", "search", "audit-trail"]);
    assert!(declared[2].is_optional);
    assert_eq!(deps.all().unwrap().len(), 3);

    let dependents = deps.dependents("acl").unwrap();
    assert_eq!(dependents.len(), 1);
    assert_eq!(dependents[0].name, "clearance");
    assert!(!dependents[0].is_enabled);
    assert!(!dependents[0].is_optional);

    assert_eq!(deps.remove_for_plugin("clearance").unwrap(), 3);
    assert!(deps.all().unwrap().is_empty());

    let _ = std::fs::remove_file(path);
}

#[test]
fn hooks_order_by_priority_and_toggle() {
    let (db, path) = setup_db("hooks");
    let plugins = PluginRepository::new(&db);
    let hooks = HookRepository::new(&db);

    plugins.create(&NewPlugin::new("acl")).unwrap();
    plugins.create(&NewPlugin::new("search")).unwrap();

    let late = hooks.register("acl", &hook("routing.load", "Acl::routes", 20)).unwrap();
    hooks.register("search", &hook("routing.load", "Search::routes", 5)).unwrap();
    hooks.register("acl", &hook("user.login", "Acl::login", 0)).unwrap();

    let listeners: Vec<String> = hooks
        .for_event("routing.load")
        .unwrap()
        .into_iter()
        .map(|h| h.listener_reference)
        .collect();
    assert_eq!(listeners, vec!["Search::routes", "Acl::routes"]);

    hooks.set_active(late.id, false).unwrap();
    assert_eq!(hooks.for_event("routing.load").unwrap().len(), 1);
    assert!(!hooks.get(late.id).unwrap().is_active);

    // Re-registering reactivates and updates the priority.
    let again = hooks.register("acl", &hook("routing.load", "Acl::routes", 1)).unwrap();
    assert_eq!(again.id, late.id);
    assert!(again.is_active);
    assert_eq!(again.priority, 1);
    assert_eq!(
        hooks.for_event("routing.load").unwrap()[0].listener_reference,
        "Acl::routes"
    );

    assert_eq!(hooks.for_plugin("acl").unwrap().len(), 2);
    assert!(matches!(hooks.set_active(9999, true), Err(DbError::HookNotFound(9999))));
    assert!(matches!(
        hooks.register("ghost", &hook("e", "l", 0)),
        Err(DbError::PluginNotFound(_))
    ));
    assert!(matches!(
        hooks.register("acl", &hook(" ", "l", 0)),
        Err(DbError::Validation(_))
    ));

    let _ = std::fs::remove_file(path);
}

#[test]
fn audit_is_append_only_and_newest_first() {
    let (db, path) = setup_db("audit");
    let plugins = PluginRepository::new(&db);
    let audit = AuditRepository::new(&db);

    let acl = plugins.create(&NewPlugin::new("acl")).unwrap();
    let ctx = AuditContext::actor("admin")
        .with_reason("rollout")
        .with_source_address("10.0.0.1");

    audit
        .append(&NewAuditEntry::new("acl", AuditAction::Register, &ctx).states(None, Some(acl.snapshot())))
        .unwrap();
    let second = audit
        .append(&NewAuditEntry::new("acl", AuditAction::Enable, &AuditContext::default()))
        .unwrap();
    audit
        .append(&NewAuditEntry::new("search", AuditAction::Register, &ctx))
        .unwrap();

    let entries = audit.list(Some("acl"), 0).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, second.id);
    assert_eq!(entries[0].action, AuditAction::Enable);
    assert_eq!(entries[0].actor, None);
    assert_eq!(entries[1].actor.as_deref(), Some("admin"));
    assert_eq!(entries[1].reason.as_deref(), Some("rollout"));
    assert_eq!(entries[1].source_address.as_deref(), Some("10.0.0.1"));
    assert_eq!(entries[1].new_state, Some(acl.snapshot()));
    assert!(entries[1].previous_state.is_none());

    assert_eq!(audit.list(None, 0).unwrap().len(), 3);
    assert_eq!(audit.list(None, 1).unwrap().len(), 1);
    assert_eq!(audit.count("acl", Some(AuditAction::Enable)).unwrap(), 1);
    assert_eq!(audit.count("acl", None).unwrap(), 2);

    let update = db
        .conn()
        .execute("UPDATE plugin_audit SET actor = 'mallory'", []);
    assert!(update.is_err(), "audit rows must not be updatable");
    let delete = db.conn().execute("DELETE FROM plugin_audit", []);
    assert!(delete.is_err(), "audit rows must not be deletable");

    let _ = std::fs::remove_file(path);
}

#[test]
fn global_settings_are_typed() {
    let (db, path) = setup_db("settings");
    let settings = SettingRepository::new(&db);

    assert_eq!(settings.get("missing").unwrap(), None);

    settings.set("max_items", &SettingValue::Integer(25)).unwrap();
    settings.set("theme", &SettingValue::from("dark")).unwrap();
    settings.set("maintenance", &SettingValue::Boolean(false)).unwrap();
    settings
        .set("limits", &SettingValue::Json(serde_json::json!({"a": 1})))
        .unwrap();

    assert_eq!(settings.get("max_items").unwrap(), Some(SettingValue::Integer(25)));
    assert_eq!(
        settings.get("maintenance").unwrap(),
        Some(SettingValue::Boolean(false))
    );
    assert_eq!(
        settings.get("limits").unwrap(),
        Some(SettingValue::Json(serde_json::json!({"a": 1})))
    );

    settings.set("max_items", &SettingValue::from("many")).unwrap();
    assert_eq!(
        settings.get("max_items").unwrap(),
        Some(SettingValue::Text("many".into()))
    );

    let keys: Vec<String> = settings.list().unwrap().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["limits", "maintenance", "max_items", "theme"]);

    assert!(settings.delete("theme").unwrap());
    assert!(!settings.delete("theme").unwrap());
    assert!(matches!(
        settings.set(" ", &SettingValue::Integer(1)),
        Err(DbError::Validation(_))
    ));

    let _ = std::fs::remove_file(path);
}
