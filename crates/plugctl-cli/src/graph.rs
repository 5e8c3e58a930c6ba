//! Dependency graph queries and hook bindings.

use std::io::Write;

use plugctl_lifecycle::LifecycleManager;
use tabwriter::TabWriter;

use crate::flags::CommandArgs;
use crate::output::write_json;
use crate::Context;

/// Prints violations and fails when there are any, so scripts can gate on it.
pub fn verify(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
) -> Result<(), String> {
    let parsed = CommandArgs::parse("verify", args, &[], &[])?;
    let violations = manager
        .verify_dependencies()
        .map_err(|err| err.to_string())?;

    if ctx.json(parsed.json) {
        write_json(stdout, &violations)?;
    } else if violations.is_empty() {
        writeln!(stdout, "All enabled plugins have their dependencies enabled")
            .map_err(|err| err.to_string())?;
    } else {
        let mut tw = TabWriter::new(&mut *stdout).padding(2);
        writeln!(tw, "PLUGIN\tMISSING DEPENDENCY").map_err(|err| err.to_string())?;
        for violation in &violations {
            writeln!(tw, "{}\t{}", violation.plugin, violation.missing_dependency)
                .map_err(|err| err.to_string())?;
        }
        tw.flush().map_err(|err| err.to_string())?;
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(format!("error: {} dependency violation(s)", violations.len()))
    }
}

pub fn order(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
) -> Result<(), String> {
    let parsed = CommandArgs::parse("order", args, &[], &[])?;
    let sequence = manager.load_sequence().map_err(|err| err.to_string())?;
    if ctx.json(parsed.json) {
        return write_json(stdout, &sequence);
    }
    for (position, name) in sequence.iter().enumerate() {
        writeln!(stdout, "{:>3}. {name}", position + 1).map_err(|err| err.to_string())?;
    }
    Ok(())
}

pub fn tree(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
) -> Result<(), String> {
    let parsed = CommandArgs::parse("tree", args, &[], &[])?;
    let name = parsed.one("tree", "plugin name")?;
    let requirements = manager
        .dependency_tree(name)
        .map_err(|err| err.to_string())?;
    if ctx.json(parsed.json) {
        return write_json(stdout, &requirements);
    }
    for entry in &requirements {
        writeln!(stdout, "{entry}").map_err(|err| err.to_string())?;
    }
    Ok(())
}

/// `hooks list EVENT`, `hooks enable ID`, `hooks disable ID`.
pub fn hooks(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
) -> Result<(), String> {
    let Some(sub) = args.first() else {
        return Err("error: hooks requires a subcommand (list, enable, disable)".into());
    };
    let parsed = CommandArgs::parse("hooks", &args[1..], &[], &[])?;
    match sub.as_str() {
        "list" => {
            let event = parsed.one("hooks list", "event name")?;
            let bindings = manager
                .hooks_for_event(event)
                .map_err(|err| err.to_string())?;
            if ctx.json(parsed.json) {
                return write_json(stdout, &bindings);
            }
            let mut tw = TabWriter::new(&mut *stdout).padding(2);
            writeln!(tw, "ID\tPLUGIN\tPRIORITY\tLISTENER").map_err(|err| err.to_string())?;
            for binding in &bindings {
                writeln!(
                    tw,
                    "{}\t{}\t{}\t{}",
                    binding.id, binding.plugin, binding.priority, binding.listener_reference
                )
                .map_err(|err| err.to_string())?;
            }
            tw.flush().map_err(|err| err.to_string())?;
            Ok(())
        }
        "enable" | "disable" => {
            let raw = parsed.one("hooks", "binding id")?;
            let id = raw
                .parse::<i64>()
                .map_err(|_| format!("error: invalid binding id '{raw}'"))?;
            let active = sub == "enable";
            manager
                .set_hook_active(id, active)
                .map_err(|err| err.to_string())?;
            if !ctx.quiet && !ctx.json(parsed.json) {
                writeln!(stdout, "Hook {id} {sub}d").map_err(|err| err.to_string())?;
            }
            Ok(())
        }
        other => Err(format!(
            "error: unknown hooks subcommand '{other}' (expected one of: list, enable, disable)"
        )),
    }
}
