//! `plugctl migrate`: schema migrations on the registry store.

use std::io::Write;

use plugctl_db::Db;
use plugctl_lifecycle::db_config;
use serde::Serialize;
use tabwriter::TabWriter;

use crate::Context;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRow {
    pub version: i32,
    pub description: String,
    pub applied: bool,
    pub applied_at: String,
}

pub trait MigrationBackend {
    fn migrate_up(&mut self) -> Result<usize, String>;
    fn migrate_to(&mut self, target_version: i32) -> Result<(), String>;
    fn migrate_down(&mut self, steps: i32) -> Result<usize, String>;
    fn migration_status(&mut self) -> Result<Vec<MigrationRow>, String>;
    fn schema_version(&mut self) -> Result<i32, String>;
}

#[derive(Debug)]
pub struct SqliteMigrationBackend {
    db: Db,
}

impl SqliteMigrationBackend {
    pub fn open(ctx: &Context) -> Result<Self, String> {
        let db = Db::open(db_config(&ctx.config)).map_err(|err| err.to_string())?;
        Ok(Self { db })
    }
}

impl MigrationBackend for SqliteMigrationBackend {
    fn migrate_up(&mut self) -> Result<usize, String> {
        self.db.migrate_up().map_err(|err| err.to_string())
    }

    fn migrate_to(&mut self, target_version: i32) -> Result<(), String> {
        self.db
            .migrate_to(target_version)
            .map_err(|err| err.to_string())
    }

    fn migrate_down(&mut self, steps: i32) -> Result<usize, String> {
        self.db.migrate_down(steps).map_err(|err| err.to_string())
    }

    fn migration_status(&mut self) -> Result<Vec<MigrationRow>, String> {
        let status = self.db.migration_status().map_err(|err| err.to_string())?;
        Ok(status
            .into_iter()
            .map(|row| MigrationRow {
                version: row.version,
                description: row.description,
                applied: row.applied,
                applied_at: row.applied_at,
            })
            .collect())
    }

    fn schema_version(&mut self) -> Result<i32, String> {
        self.db.schema_version().map_err(|err| err.to_string())
    }
}

pub(crate) fn execute(
    args: &[String],
    ctx: &Context,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<(), String> {
    let parsed = parse_args(args)?;
    if parsed.command == Command::Help {
        return write_help(stdout).map_err(|err| err.to_string());
    }
    let mut backend = SqliteMigrationBackend::open(ctx)?;
    run_parsed(&parsed, ctx.json(parsed.json), &mut backend, stdout, stderr)
}

/// Entry point for callers bringing their own backend.
pub fn run_with_backend(
    args: &[String],
    backend: &mut dyn MigrationBackend,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    let result = parse_args(args).and_then(|parsed| {
        if parsed.command == Command::Help {
            return write_help(stdout).map_err(|err| err.to_string());
        }
        run_parsed(&parsed, parsed.json, backend, stdout, stderr)
    });
    match result {
        Ok(()) => 0,
        Err(message) => {
            let _ = writeln!(stderr, "{message}");
            1
        }
    }
}

fn run_parsed(
    parsed: &ParsedArgs,
    json: bool,
    backend: &mut dyn MigrationBackend,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<(), String> {
    match parsed.command {
        Command::Help => write_help(stdout).map_err(|err| err.to_string()),
        Command::Up { target_version } => {
            if target_version > 0 {
                backend
                    .migrate_to(target_version)
                    .map_err(|err| format!("migration failed: {err}"))?;
                writeln!(stderr, "Migrated to version {target_version}")
                    .map_err(|err| err.to_string())?;
                return Ok(());
            }

            let applied = backend
                .migrate_up()
                .map_err(|err| format!("migration failed: {err}"))?;
            if applied == 0 {
                writeln!(stderr, "No pending migrations").map_err(|err| err.to_string())?;
            } else {
                writeln!(stderr, "Applied {applied} migration(s)")
                    .map_err(|err| err.to_string())?;
            }
            Ok(())
        }
        Command::Down { steps } => {
            let rolled_back = backend
                .migrate_down(steps)
                .map_err(|err| format!("rollback failed: {err}"))?;
            if rolled_back == 0 {
                writeln!(stderr, "No migrations to roll back").map_err(|err| err.to_string())?;
            } else {
                writeln!(stderr, "Rolled back {rolled_back} migration(s)")
                    .map_err(|err| err.to_string())?;
            }
            Ok(())
        }
        Command::Status => {
            let status = backend
                .migration_status()
                .map_err(|err| format!("failed to get migration status: {err}"))?;
            if json {
                serde_json::to_writer_pretty(&mut *stdout, &status)
                    .map_err(|err| err.to_string())?;
                writeln!(stdout).map_err(|err| err.to_string())?;
                return Ok(());
            }

            let mut tw = TabWriter::new(&mut *stdout).padding(2);
            writeln!(tw, "VERSION\tDESCRIPTION\tSTATUS\tAPPLIED AT")
                .map_err(|err| err.to_string())?;
            for row in status {
                let state = if row.applied { "applied" } else { "pending" };
                let applied_at = if row.applied {
                    row.applied_at
                } else {
                    "-".to_string()
                };
                writeln!(
                    tw,
                    "{}\t{}\t{}\t{}",
                    row.version, row.description, state, applied_at
                )
                .map_err(|err| err.to_string())?;
            }
            tw.flush().map_err(|err| err.to_string())?;
            Ok(())
        }
        Command::Version => {
            let version = backend
                .schema_version()
                .map_err(|err| format!("failed to get schema version: {err}"))?;
            if json {
                serde_json::to_writer(&mut *stdout, &serde_json::json!({ "version": version }))
                    .map_err(|err| err.to_string())?;
                writeln!(stdout).map_err(|err| err.to_string())?;
                return Ok(());
            }
            writeln!(stdout, "Schema version: {version}").map_err(|err| err.to_string())?;
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Help,
    Up { target_version: i32 },
    Down { steps: i32 },
    Status,
    Version,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedArgs {
    json: bool,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<ParsedArgs, String> {
    let mut index = 0usize;
    let mut json = false;
    if args.get(index).is_some_and(|arg| arg == "migrate") {
        index += 1;
    }

    let mut command = None;
    let mut target_version = 0;
    let mut steps = 1;
    while let Some(token) = args.get(index) {
        match token.as_str() {
            "--json" => {
                json = true;
                index += 1;
            }
            "--help" | "-h" => {
                return Ok(ParsedArgs {
                    json,
                    command: Command::Help,
                });
            }
            "--to" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| "error: missing value for --to".to_string())?;
                target_version = parse_i32_flag("--to", value)?;
                index += 2;
            }
            "--steps" | "-n" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| format!("error: missing value for {token}"))?;
                steps = parse_i32_flag(token, value)?;
                index += 2;
            }
            "up" | "down" | "status" | "version" if command.is_none() => {
                command = Some(token.clone());
                index += 1;
            }
            unknown => {
                return Err(format!(
                    "error: unknown migrate argument '{unknown}' (expected one of: up, down, status, version)"
                ));
            }
        }
    }

    let command = match command.as_deref() {
        None => Command::Help,
        Some("up") => Command::Up { target_version },
        Some("down") => Command::Down { steps },
        Some("status") => Command::Status,
        Some(_) => Command::Version,
    };
    Ok(ParsedArgs { json, command })
}

fn parse_i32_flag(flag: &str, value: &str) -> Result<i32, String> {
    value
        .parse::<i32>()
        .map_err(|_| format!("error: invalid value '{value}' for {flag}"))
}

fn write_help(stdout: &mut dyn Write) -> std::io::Result<()> {
    writeln!(stdout, "Manage registry schema migrations.")?;
    writeln!(stdout)?;
    writeln!(stdout, "Commands:")?;
    writeln!(stdout, "  up       Apply pending migrations (--to N stops at version N)")?;
    writeln!(stdout, "  down     Roll back migrations (--steps N, default 1)")?;
    writeln!(stdout, "  status   Show migration status")?;
    writeln!(stdout, "  version  Show the current schema version")?;
    Ok(())
}
