//! Commands that move plugins through the lifecycle.

use std::io::Write;

use plugctl_core::AuditContext;
use plugctl_lifecycle::{BatchAction, BatchOutcome, LifecycleManager, Transition};
use tabwriter::TabWriter;

use crate::flags::CommandArgs;
use crate::output::write_json;
use crate::Context;

const ACTOR: &str = "cli";

pub(crate) fn audit_context(parsed: &CommandArgs) -> AuditContext {
    let ctx = AuditContext::actor(ACTOR);
    match &parsed.reason {
        Some(reason) => ctx.with_reason(reason.clone()),
        None => ctx,
    }
}

pub fn enable(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
) -> Result<(), String> {
    let parsed = CommandArgs::parse("enable", args, &[], &[])?;
    let name = parsed.one("enable", "plugin name")?;
    let transition = manager
        .enable_with(name, &audit_context(&parsed))
        .map_err(|err| err.to_string())?;
    write_transition("enabled", &transition, ctx.json(parsed.json), ctx.quiet, stdout)
}

/// `disable NAME [--force]`. `--force` skips the dependents and record
/// checks.
pub fn disable(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
) -> Result<(), String> {
    let parsed = CommandArgs::parse("disable", args, &[], &["--force"])?;
    let name = parsed.one("disable", "plugin name")?;
    let audit = audit_context(&parsed);
    let result = if parsed.has("--force") {
        manager.force_disable_with(name, &audit)
    } else {
        manager.disable_with(name, &audit)
    };
    let transition = result.map_err(|err| err.to_string())?;
    write_transition("disabled", &transition, ctx.json(parsed.json), ctx.quiet, stdout)
}

fn write_transition(
    state: &str,
    transition: &Transition,
    json: bool,
    quiet: bool,
    stdout: &mut dyn Write,
) -> Result<(), String> {
    if json {
        return write_json(
            stdout,
            &serde_json::json!({
                "plugin": transition.plugin.name,
                "status": transition.plugin.status,
                "is_enabled": transition.plugin.is_enabled,
                "changed": transition.changed,
            }),
        );
    }
    if quiet {
        return Ok(());
    }
    let line = if transition.changed {
        format!("Plugin '{}' {state}", transition.plugin.name)
    } else {
        format!("Plugin '{}' already {state}", transition.plugin.name)
    };
    writeln!(stdout, "{line}").map_err(|err| err.to_string())
}

/// `set --enable a,b --disable c`: a batch where rejections are reported per
/// plugin and the exit code is non-zero if any were rejected.
pub fn set(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
) -> Result<(), String> {
    let parsed = CommandArgs::parse("set", args, &["--enable", "--disable"], &[])?;
    if !parsed.positionals.is_empty() {
        return Err("error: set takes plugin names through --enable and --disable".into());
    }
    let enable = split_names(&parsed, "--enable");
    let disable = split_names(&parsed, "--disable");
    if enable.is_empty() && disable.is_empty() {
        return Err("error: set needs at least one of --enable or --disable".into());
    }

    let report = manager
        .set_plugins(&enable, &disable)
        .map_err(|err| err.to_string())?;

    if ctx.json(parsed.json) {
        write_json(stdout, &report)?;
    } else {
        let mut tw = TabWriter::new(&mut *stdout).padding(2);
        writeln!(tw, "NAME\tACTION\tOUTCOME").map_err(|err| err.to_string())?;
        for item in &report.items {
            let outcome = match &item.outcome {
                BatchOutcome::Applied => "applied".to_string(),
                BatchOutcome::Unchanged => "unchanged".to_string(),
                BatchOutcome::Rejected(message) => format!("rejected: {message}"),
            };
            let action = match item.action {
                BatchAction::Enable => "enable",
                BatchAction::Disable => "disable",
            };
            writeln!(tw, "{}\t{action}\t{outcome}", item.name).map_err(|err| err.to_string())?;
        }
        tw.flush().map_err(|err| err.to_string())?;
    }

    let rejected = report.rejected().count();
    if rejected > 0 {
        return Err(format!("error: {rejected} of {} change(s) rejected", report.items.len()));
    }
    Ok(())
}

/// Every value of a repeatable, comma-separated flag.
fn split_names(parsed: &CommandArgs, flag: &str) -> Vec<String> {
    parsed
        .options
        .iter()
        .filter(|(name, _)| name == flag)
        .filter_map(|(_, value)| value.as_deref())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn uninstall(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
) -> Result<(), String> {
    let parsed = CommandArgs::parse("uninstall", args, &[], &["--no-backup"])?;
    let name = parsed.one("uninstall", "plugin name")?;
    let with_backup = !parsed.has("--no-backup");
    let outcome = manager
        .uninstall_with(name, with_backup, &audit_context(&parsed))
        .map_err(|err| err.to_string())?;

    if ctx.json(parsed.json) {
        return write_json(
            stdout,
            &serde_json::json!({
                "plugin": outcome.plugin.name,
                "status": outcome.plugin.status,
                "artifact": outcome.artifact.as_ref().map(|p| p.display().to_string()),
                "dropped_tables": outcome.dropped_tables,
            }),
        );
    }
    if ctx.quiet {
        return Ok(());
    }
    writeln!(stdout, "Plugin '{}' uninstalled", outcome.plugin.name)
        .map_err(|err| err.to_string())?;
    if let Some(artifact) = &outcome.artifact {
        writeln!(stdout, "Backup: {}", artifact.display()).map_err(|err| err.to_string())?;
    }
    if !outcome.dropped_tables.is_empty() {
        writeln!(stdout, "Dropped tables: {}", outcome.dropped_tables.join(", "))
            .map_err(|err| err.to_string())?;
    }
    Ok(())
}

pub fn restore(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
) -> Result<(), String> {
    let parsed = CommandArgs::parse("restore", args, &[], &[])?;
    let name = parsed.one("restore", "plugin name")?;
    let plugin = manager
        .restore_with(name, &audit_context(&parsed))
        .map_err(|err| err.to_string())?;
    if ctx.json(parsed.json) {
        return write_json(stdout, &plugin);
    }
    if !ctx.quiet {
        writeln!(stdout, "Plugin '{}' restored to {}", plugin.name, plugin.status)
            .map_err(|err| err.to_string())?;
    }
    Ok(())
}

pub fn delete(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
) -> Result<(), String> {
    let parsed = CommandArgs::parse("delete", args, &[], &[])?;
    let name = parsed.one("delete", "plugin name")?;
    manager
        .delete_with(name, &audit_context(&parsed))
        .map_err(|err| err.to_string())?;
    if ctx.json(parsed.json) {
        return write_json(stdout, &serde_json::json!({ "deleted": name }));
    }
    if !ctx.quiet {
        writeln!(stdout, "Plugin '{name}' deleted").map_err(|err| err.to_string())?;
    }
    Ok(())
}
