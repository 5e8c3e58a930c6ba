use std::io::Write;

use plugctl_lifecycle::LifecycleManager;
use tabwriter::TabWriter;

use crate::flags::{parse_count, CommandArgs};
use crate::output::{or_dash, write_json};
use crate::Context;

const DEFAULT_LIMIT: usize = 20;

/// `audit [--plugin P] [--limit N]`, newest first. `--limit 0` shows all.
pub fn execute(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
) -> Result<(), String> {
    let parsed = CommandArgs::parse("audit", args, &["--plugin", "--limit"], &[])?;
    if !parsed.positionals.is_empty() {
        return Err("error: audit takes no positional arguments".into());
    }
    let limit = match parsed.value("--limit") {
        Some(raw) => parse_count(raw, "--limit")?,
        None => DEFAULT_LIMIT,
    };
    let entries = manager
        .audit_log(parsed.value("--plugin"), limit)
        .map_err(|err| err.to_string())?;

    if ctx.json(parsed.json) {
        return write_json(stdout, &entries);
    }
    if entries.is_empty() {
        writeln!(stdout, "No audit entries").map_err(|err| err.to_string())?;
        return Ok(());
    }

    let mut tw = TabWriter::new(&mut *stdout).padding(2);
    writeln!(tw, "TIME\tPLUGIN\tACTION\tACTOR\tREASON").map_err(|err| err.to_string())?;
    for entry in &entries {
        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.plugin,
            entry.action,
            or_dash(entry.actor.as_deref()),
            or_dash(entry.reason.as_deref()),
        )
        .map_err(|err| err.to_string())?;
    }
    tw.flush().map_err(|err| err.to_string())?;
    Ok(())
}
