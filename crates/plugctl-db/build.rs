use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use walkdir::WalkDir;

#[derive(Debug, Default)]
struct MigrationFiles {
    slug: String,
    up: Option<String>,
    down: Option<String>,
}

fn main() {
    let manifest_dir = PathBuf::from(env_var("CARGO_MANIFEST_DIR"));
    let migrations_dir = manifest_dir.join("migrations");

    println!("cargo:rerun-if-changed={}", migrations_dir.display());

    let mut by_version: BTreeMap<i32, MigrationFiles> = BTreeMap::new();

    for entry in WalkDir::new(&migrations_dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => panic!(
                "plugctl-db build: read migrations dir {}: {err}",
                migrations_dir.display()
            ),
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = match entry.file_name().to_str() {
            Some(name) => name.to_string(),
            None => continue,
        };
        println!("cargo:rerun-if-changed={}", entry.path().display());

        let parsed = match parse_migration_filename(&file_name) {
            Some(parsed) => parsed,
            None => continue,
        };

        let slot = by_version.entry(parsed.version).or_default();
        slot.slug = parsed.slug;
        match parsed.direction {
            Direction::Up => slot.up = Some(file_name),
            Direction::Down => slot.down = Some(file_name),
        }
    }

    let out_dir = PathBuf::from(env_var("OUT_DIR"));
    let out_path = out_dir.join("migrations.rs");
    let mut out = match fs::File::create(&out_path) {
        Ok(file) => file,
        Err(err) => panic!("plugctl-db build: create {}: {err}", out_path.display()),
    };

    if let Err(err) = writeln!(
        out,
        "/// Generated; do not edit. Source: crates/plugctl-db/migrations\n\
         #[derive(Clone, Copy, Debug)]\n\
         pub struct EmbeddedMigration {{\n\
           pub version: i32,\n\
           pub description: &'static str,\n\
           pub up_sql: &'static str,\n\
           pub down_sql: &'static str,\n\
         }}\n\
         \n\
         pub static MIGRATIONS: &[EmbeddedMigration] = &["
    ) {
        panic!("plugctl-db build: write header: {err}");
    }

    for (version, files) in by_version {
        let description = files.slug.replace('_', " ");
        if let Err(err) = writeln!(
            out,
            "  EmbeddedMigration {{ version: {version}, description: {desc:?}, up_sql: {up}, down_sql: {down} }},",
            desc = description,
            up = include_expr(&files.up),
            down = include_expr(&files.down)
        ) {
            panic!("plugctl-db build: write migration {version}: {err}");
        }
    }

    if let Err(err) = writeln!(out, "];") {
        panic!("plugctl-db build: write footer: {err}");
    }
}

fn env_var(key: &str) -> String {
    match env::var(key) {
        Ok(value) => value,
        Err(err) => panic!("plugctl-db build: missing env {key}: {err}"),
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone)]
struct ParsedName {
    version: i32,
    slug: String,
    direction: Direction,
}

/// `NNN_slug.up.sql` / `NNN_slug.down.sql`
fn parse_migration_filename(name: &str) -> Option<ParsedName> {
    let (version_part, rest) = name.split_once('_')?;
    let version: i32 = version_part.parse().ok()?;

    let (slug, direction) = if let Some(slug) = rest.strip_suffix(".up.sql") {
        (slug, Direction::Up)
    } else {
        (rest.strip_suffix(".down.sql")?, Direction::Down)
    };
    Some(ParsedName {
        version,
        slug: slug.to_string(),
        direction,
    })
}

fn include_expr(file_name: &Option<String>) -> String {
    match file_name {
        Some(file) => {
            let rel = format!("/migrations/{file}");
            format!("include_str!(concat!(env!(\"CARGO_MANIFEST_DIR\"), {rel:?}))")
        }
        None => "\"\"".to_string(),
    }
}
