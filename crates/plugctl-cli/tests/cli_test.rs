#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use plugctl_cli::{run_for_test, CommandOutput};
use plugctl_db::{Config, Db};
use serde_json::Value;
use tempfile::TempDir;

const ACL_MANIFEST: &str = "\
version: 2.0.0
description: Access control
dependencies: [userPlugin]
owned_tables: [acl_entry]
";

struct Workspace {
    dir: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new(extra: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = dir.path().join("plugctl.yaml");
        let yaml = format!(
            "global:\n  data_dir: {}\nlogging:\n  level: error\n{extra}",
            dir.path().display()
        );
        std::fs::write(&config, yaml).unwrap();
        std::fs::create_dir_all(dir.path().join("plugins")).unwrap();
        Self { dir, config }
    }

    fn run(&self, args: &[&str]) -> CommandOutput {
        let config = self.config.to_string_lossy().into_owned();
        let mut full = vec!["--config", config.as_str()];
        full.extend_from_slice(args);
        run_for_test(&full)
    }

    fn json(&self, args: &[&str]) -> Value {
        let out = self.run(args);
        assert_eq!(out.exit_code, 0, "{args:?} failed: {}", out.stderr);
        serde_json::from_str(&out.stdout).expect("json output")
    }

    fn candidate(&self, name: &str, manifest: Option<&str>) {
        let dir = self.dir.path().join("plugins").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        if let Some(manifest) = manifest {
            std::fs::write(dir.join("plugin.yaml"), manifest).unwrap();
        }
    }

    fn db_path(&self) -> PathBuf {
        self.dir.path().join("plugctl.db")
    }
}

fn names(value: &Value) -> Vec<String> {
    value
        .as_array()
        .expect("array")
        .iter()
        .map(|v| v.as_str().expect("string").to_string())
        .collect()
}

#[test]
fn discover_enable_and_order() {
    let ws = Workspace::new("");
    ws.candidate("aclPlugin", Some(ACL_MANIFEST));
    ws.candidate("userPlugin", None);

    let report = ws.json(&["discover", "--json"]);
    assert_eq!(report["created"], 2);
    assert_eq!(report["dependencies_added"], 1);

    let listed = ws.json(&["--json", "list"]);
    assert_eq!(listed.as_array().unwrap().len(), 2);

    let out = ws.run(&["enable", "aclPlugin"]);
    assert_eq!(out.exit_code, 1);
    assert!(out.stdout.is_empty());
    assert!(out.stderr.contains("requires disabled plugins: userPlugin"), "{}", out.stderr);

    let out = ws.run(&["enable", "userPlugin"]);
    assert_eq!(out.exit_code, 0, "{}", out.stderr);
    assert_eq!(out.stdout, "Plugin 'userPlugin' enabled\n");
    let out = ws.run(&["enable", "userPlugin"]);
    assert_eq!(out.stdout, "Plugin 'userPlugin' already enabled\n");
    assert_eq!(ws.run(&["enable", "aclPlugin"]).exit_code, 0);

    assert_eq!(names(&ws.json(&["order", "--json"])), vec!["userPlugin", "aclPlugin"]);
    assert_eq!(names(&ws.json(&["tree", "aclPlugin", "--json"])), vec!["userPlugin", "aclPlugin"]);

    let out = ws.run(&["disable", "userPlugin"]);
    assert_eq!(out.exit_code, 1);
    assert!(out.stderr.contains("required by enabled plugins: aclPlugin"));

    let out = ws.run(&["verify"]);
    assert_eq!(out.exit_code, 0, "{}", out.stderr);

    let enabled = ws.json(&["list", "--enabled", "--json"]);
    assert_eq!(enabled.as_array().unwrap().len(), 2);
    let shown = ws.json(&["show", "aclPlugin", "--json"]);
    assert_eq!(shown["plugin"]["version"], "2.0.0");
    assert_eq!(shown["dependencies"][0]["requires_plugin"], "userPlugin");
}

#[test]
fn batch_set_reports_rejections() {
    let ws = Workspace::new("");
    ws.candidate("aclPlugin", Some(ACL_MANIFEST));
    ws.candidate("userPlugin", None);
    assert_eq!(ws.run(&["discover"]).exit_code, 0);

    let out = ws.run(&["set", "--enable", "userPlugin,ghostPlugin", "--json"]);
    assert_eq!(out.exit_code, 1);
    let report: Value = serde_json::from_str(&out.stdout).unwrap();
    let items = report["items"].as_array().unwrap();
    assert_eq!(items[0]["outcome"], "applied");
    assert_eq!(items[1]["outcome"], "rejected");
    assert!(out.stderr.contains("1 of 2 change(s) rejected"));
}

#[test]
fn uninstall_backs_up_and_restores() {
    let ws = Workspace::new("");
    ws.candidate("aclPlugin", Some(ACL_MANIFEST));
    ws.candidate("userPlugin", None);
    assert_eq!(ws.run(&["discover"]).exit_code, 0);

    let db = Db::open(Config::new(ws.db_path())).unwrap();
    db.conn()
        .execute_batch(
            "CREATE TABLE acl_entry (id INTEGER PRIMARY KEY, rule TEXT);
             INSERT INTO acl_entry VALUES (1, 'allow all');",
        )
        .unwrap();
    drop(db);

    let outcome = ws.json(&["uninstall", "aclPlugin", "--reason", "retired", "--json"]);
    assert_eq!(outcome["status"], "uninstalled");
    assert_eq!(outcome["dropped_tables"][0], "acl_entry");
    let artifact = outcome["artifact"].as_str().expect("artifact").to_string();
    assert!(Path::new(&artifact).is_file());

    let backups = ws.json(&["backups", "list", "aclPlugin", "--json"]);
    assert_eq!(backups.as_array().unwrap().len(), 1);

    let out = ws.run(&["enable", "aclPlugin"]);
    assert_eq!(out.exit_code, 1);
    assert!(out.stderr.contains("cannot enable"), "{}", out.stderr);

    let restored = ws.json(&["backups", "restore", &artifact, "--json"]);
    assert_eq!(names(&restored["restored_tables"]), vec!["acl_entry"]);
    let plugin = ws.json(&["restore", "aclPlugin", "--json"]);
    assert_eq!(plugin["status"], "registered");

    let audit = ws.json(&["audit", "--plugin", "aclPlugin", "--json"]);
    let actions: Vec<&str> = audit
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["restore", "uninstall", "register"]);
    assert_eq!(audit[1]["actor"], "cli");
    assert_eq!(audit[1]["reason"], "retired");

    let db = Db::open(Config::new(ws.db_path())).unwrap();
    let rows: i64 = db
        .conn()
        .query_row("SELECT COUNT(*) FROM acl_entry", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn settings_round_trip_through_the_cli() {
    let ws = Workspace::new("");
    ws.candidate("userPlugin", None);
    assert_eq!(ws.run(&["install", "userPlugin"]).exit_code, 0);

    assert_eq!(ws.run(&["setting", "set", "site_title", "Archive"]).exit_code, 0);
    let out = ws.run(&["setting", "get", "site_title"]);
    assert_eq!(out.stdout, "Archive\n");

    let out = ws.run(&["setting", "set", "page_size", "25", "--plugin", "userPlugin"]);
    assert_eq!(out.exit_code, 0, "{}", out.stderr);
    assert_eq!(out.stdout, "Set page_size (integer)\n");
    let value = ws.json(&["setting", "get", "page_size", "--plugin", "userPlugin", "--json"]);
    assert_eq!(value["value"], 25);

    let out = ws.run(&["setting", "get", "missing"]);
    assert_eq!(out.exit_code, 1);
    assert_eq!(out.stderr, "setting 'missing' not found\n");
}

#[test]
fn seed_uses_configured_active_list() {
    let ws = Workspace::new("plugins:\n  active: [userPlugin, searchPlugin]\n");
    let report = ws.json(&["seed", "--json"]);
    assert_eq!(report["created"], 2);
    assert_eq!(names(&ws.json(&["order", "--json"])).len(), 2);

    let report = ws.json(&["seed", "--json"]);
    assert_eq!(report["created"], 0);
    assert_eq!(report["skipped"], 2);
}

#[test]
fn migrate_status_and_up() {
    let ws = Workspace::new("");
    let status = ws.json(&["migrate", "status", "--json"]);
    assert!(status
        .as_array()
        .unwrap()
        .iter()
        .all(|row| row["applied"] == false));

    let out = ws.run(&["migrate", "up"]);
    assert_eq!(out.exit_code, 0);
    assert!(out.stderr.starts_with("Applied "), "{}", out.stderr);

    let version = ws.json(&["migrate", "version", "--json"]);
    assert!(version["version"].as_i64().unwrap() > 0);
}

#[test]
fn invalid_config_is_reported() {
    let ws = Workspace::new("backups:\n  keep: 0\n");
    let out = ws.run(&["list"]);
    assert_eq!(out.exit_code, 1);
    assert!(out.stdout.is_empty());
    assert!(out.stderr.contains("backups.keep must be at least 1"), "{}", out.stderr);
}

#[test]
fn missing_plugin_is_an_error() {
    let ws = Workspace::new("");
    let out = ws.run(&["show", "ghostPlugin"]);
    assert_eq!(out.exit_code, 1);
    assert_eq!(out.stderr, "plugin \"ghostPlugin\" not found\n");

    let out = ws.run(&["list", "--status", "broken"]);
    assert_eq!(out.exit_code, 1);
    assert!(out.stderr.contains("invalid --status 'broken'"));
}

#[test]
fn disable_force_overrides_dependents_and_records() {
    let ws = Workspace::new("");
    ws.candidate("aclPlugin", Some(ACL_MANIFEST));
    ws.candidate("userPlugin", None);
    assert_eq!(ws.run(&["discover"]).exit_code, 0);
    assert_eq!(ws.run(&["enable", "userPlugin"]).exit_code, 0);
    assert_eq!(ws.run(&["enable", "aclPlugin"]).exit_code, 0);

    let db = Db::open(Config::new(ws.db_path())).unwrap();
    db.conn()
        .execute_batch(
            "CREATE TABLE acl_entry (id INTEGER PRIMARY KEY, rule TEXT);
             INSERT INTO acl_entry VALUES (1, 'allow all');",
        )
        .unwrap();
    drop(db);

    let out = ws.run(&["disable", "aclPlugin"]);
    assert_eq!(out.exit_code, 1);
    assert!(out.stderr.contains("still holds 1 record(s)"), "{}", out.stderr);

    let out = ws.run(&["disable", "userPlugin", "--force", "--reason", "maintenance"]);
    assert_eq!(out.exit_code, 0, "{}", out.stderr);
    assert_eq!(out.stdout, "Plugin 'userPlugin' disabled\n");
    assert_eq!(ws.run(&["verify"]).exit_code, 1);

    let audit = ws.json(&["audit", "--plugin", "userPlugin", "--limit", "1", "--json"]);
    assert_eq!(audit[0]["action"], "force-disable");
    assert_eq!(audit[0]["reason"], "maintenance");
}
