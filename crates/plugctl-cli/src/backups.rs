use std::io::Write;
use std::path::Path;

use plugctl_lifecycle::LifecycleManager;
use tabwriter::TabWriter;

use crate::flags::{parse_count, CommandArgs};
use crate::output::write_json;
use crate::Context;

/// `backups list NAME`, `backups cleanup NAME [--keep N]`,
/// `backups restore ARTIFACT`.
pub fn execute(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
) -> Result<(), String> {
    let Some(sub) = args.first() else {
        return Err("error: backups requires a subcommand (list, cleanup, restore)".into());
    };
    let parsed = CommandArgs::parse("backups", &args[1..], &["--keep"], &[])?;
    let json = ctx.json(parsed.json);

    match sub.as_str() {
        "list" => {
            let name = parsed.one("backups list", "plugin name")?;
            let artifacts = manager.list_backups(name).map_err(|err| err.to_string())?;
            if json {
                return write_json(stdout, &artifacts);
            }
            if artifacts.is_empty() {
                writeln!(stdout, "No backups for {name}").map_err(|err| err.to_string())?;
                return Ok(());
            }
            let mut tw = TabWriter::new(&mut *stdout).padding(2);
            writeln!(tw, "FILE\tCREATED\tSIZE").map_err(|err| err.to_string())?;
            for artifact in &artifacts {
                let created = artifact
                    .created_at
                    .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                writeln!(
                    tw,
                    "{}\t{}\t{}",
                    artifact.file_name, created, artifact.size_bytes
                )
                .map_err(|err| err.to_string())?;
            }
            tw.flush().map_err(|err| err.to_string())?;
            Ok(())
        }
        "cleanup" => {
            let name = parsed.one("backups cleanup", "plugin name")?;
            let keep = match parsed.value("--keep") {
                Some(raw) => Some(parse_count(raw, "--keep")?),
                None => None,
            };
            if keep == Some(0) {
                return Err("error: --keep must be at least 1".into());
            }
            let removed = manager
                .cleanup_backups(name, keep)
                .map_err(|err| err.to_string())?;
            if json {
                return write_json(stdout, &serde_json::json!({ "plugin": name, "removed": removed }));
            }
            if !ctx.quiet {
                writeln!(stdout, "Removed {removed} backup(s) for {name}")
                    .map_err(|err| err.to_string())?;
            }
            Ok(())
        }
        "restore" => {
            let artifact = parsed.one("backups restore", "artifact path")?;
            let tables = manager
                .restore_data(Path::new(artifact))
                .map_err(|err| err.to_string())?;
            if json {
                return write_json(stdout, &serde_json::json!({ "restored_tables": tables }));
            }
            if !ctx.quiet {
                writeln!(stdout, "Restored {} table(s): {}", tables.len(), tables.join(", "))
                    .map_err(|err| err.to_string())?;
            }
            Ok(())
        }
        other => Err(format!(
            "error: unknown backups subcommand '{other}' (expected one of: list, cleanup, restore)"
        )),
    }
}
