//! Discovery and read-only registry commands.

use std::io::Write;
use std::path::PathBuf;

use plugctl_core::{Plugin, PluginFilter, PluginStatus};
use plugctl_lifecycle::{DiscoveryReport, LifecycleManager};
use serde::Serialize;
use tabwriter::TabWriter;

use crate::flags::CommandArgs;
use crate::output::{or_dash, write_json, yes_no};
use crate::Context;

pub fn discover(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<(), String> {
    let parsed = CommandArgs::parse("discover", args, &["--root"], &[])?;
    if !parsed.positionals.is_empty() {
        return Err("error: discover takes no positional arguments".to_string());
    }
    let report = match parsed.value("--root") {
        Some(root) => manager.discover_in(&PathBuf::from(root), &manager.options().active),
        None => manager.discover(),
    }
    .map_err(|err| err.to_string())?;
    write_report("Discovered", &report, ctx.json(parsed.json), stdout, stderr)
}

/// Registers the given names, or the configured active list, as enabled.
pub fn seed(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<(), String> {
    let parsed = CommandArgs::parse("seed", args, &[], &[])?;
    let names = if parsed.positionals.is_empty() {
        ctx.config.plugins.active.clone()
    } else {
        parsed.positionals.clone()
    };
    if names.is_empty() {
        return Err("error: seed needs plugin names or a plugins.active list in the config".into());
    }
    let report = manager
        .seed_from_list(&names)
        .map_err(|err| err.to_string())?;
    write_report("Seeded", &report, ctx.json(parsed.json), stdout, stderr)
}

fn write_report(
    verb: &str,
    report: &DiscoveryReport,
    json: bool,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<(), String> {
    if json {
        return write_json(stdout, report);
    }
    writeln!(
        stdout,
        "{verb}: {} created, {} skipped, {} dependencies added",
        report.created, report.skipped, report.dependencies_added
    )
    .map_err(|err| err.to_string())?;
    for item in &report.errors {
        writeln!(stderr, "warning: {}: {}", item.name, item.message)
            .map_err(|err| err.to_string())?;
    }
    Ok(())
}

pub fn candidates(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
) -> Result<(), String> {
    let parsed = CommandArgs::parse("candidates", args, &[], &[])?;
    let scanned = manager.scan_candidates().map_err(|err| err.to_string())?;
    if ctx.json(parsed.json) {
        return write_json(stdout, &scanned);
    }
    if scanned.is_empty() {
        writeln!(
            stdout,
            "No candidates under {}",
            manager.options().plugins_path.display()
        )
        .map_err(|err| err.to_string())?;
        return Ok(());
    }
    let mut tw = TabWriter::new(&mut *stdout).padding(2);
    writeln!(tw, "NAME\tVERSION\tCATEGORY\tMANIFEST\tREGISTERED").map_err(|err| err.to_string())?;
    for info in &scanned {
        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}",
            info.name,
            or_dash(info.version.as_deref()),
            or_dash(info.category.as_deref()),
            yes_no(info.has_manifest),
            yes_no(info.registered),
        )
        .map_err(|err| err.to_string())?;
    }
    tw.flush().map_err(|err| err.to_string())?;
    Ok(())
}

pub fn list(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
) -> Result<(), String> {
    let parsed = CommandArgs::parse(
        "list",
        args,
        &["--status", "--category"],
        &["--enabled", "--disabled", "--core"],
    )?;
    let filter = parse_filter(&parsed)?;
    let plugins: Vec<Plugin> = manager
        .all()
        .map_err(|err| err.to_string())?
        .into_iter()
        .filter(|plugin| filter.matches(plugin))
        .collect();

    if ctx.json(parsed.json) {
        return write_json(stdout, &plugins);
    }
    if plugins.is_empty() {
        writeln!(stdout, "No plugins found").map_err(|err| err.to_string())?;
        return Ok(());
    }
    let mut tw = TabWriter::new(&mut *stdout).padding(2);
    writeln!(tw, "NAME\tSTATUS\tENABLED\tCATEGORY\tORDER\tVERSION\tFLAGS")
        .map_err(|err| err.to_string())?;
    for plugin in &plugins {
        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            plugin.name,
            plugin.status,
            yes_no(plugin.is_enabled),
            plugin.category,
            plugin.load_order,
            or_dash(plugin.version.as_deref()),
            flags_label(plugin),
        )
        .map_err(|err| err.to_string())?;
    }
    tw.flush().map_err(|err| err.to_string())?;
    Ok(())
}

fn parse_filter(parsed: &CommandArgs) -> Result<PluginFilter, String> {
    let mut filter = PluginFilter::default();
    if let Some(raw) = parsed.value("--status") {
        let status = raw
            .parse::<PluginStatus>()
            .map_err(|_| format!("error: invalid --status '{raw}' (expected one of: registered, enabled, disabled, uninstalled)"))?;
        filter.status = Some(status);
    }
    match (parsed.has("--enabled"), parsed.has("--disabled")) {
        (true, true) => return Err("error: --enabled and --disabled cannot be used together".into()),
        (true, false) => filter.is_enabled = Some(true),
        (false, true) => filter.is_enabled = Some(false),
        (false, false) => {}
    }
    if parsed.has("--core") {
        filter.is_core = Some(true);
    }
    filter.category = parsed.value("--category").map(str::to_string);
    Ok(filter)
}

fn flags_label(plugin: &Plugin) -> String {
    let mut labels = Vec::new();
    if plugin.is_core {
        labels.push("core");
    }
    if plugin.is_locked {
        labels.push("locked");
    }
    if labels.is_empty() {
        "-".to_string()
    } else {
        labels.join(",")
    }
}

#[derive(Serialize)]
struct ShowResult<'a> {
    plugin: &'a Plugin,
    dependencies: &'a [plugctl_core::Dependency],
    dependents: &'a [plugctl_core::Dependent],
}

pub fn show(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
) -> Result<(), String> {
    let parsed = CommandArgs::parse("show", args, &[], &[])?;
    let name = parsed.one("show", "plugin name")?;
    let plugin = manager.get(name).map_err(|err| err.to_string())?;
    let dependencies = manager.dependencies(name).map_err(|err| err.to_string())?;
    let dependents = manager.dependents(name).map_err(|err| err.to_string())?;

    if ctx.json(parsed.json) {
        return write_json(
            stdout,
            &ShowResult {
                plugin: &plugin,
                dependencies: &dependencies,
                dependents: &dependents,
            },
        );
    }

    let mut tw = TabWriter::new(&mut *stdout).padding(1);
    let rows = [
        ("Name:", plugin.name.clone()),
        ("Implementation:", plugin.implementation_reference.clone()),
        ("Version:", or_dash(plugin.version.as_deref()).to_string()),
        ("Description:", or_dash(plugin.description.as_deref()).to_string()),
        ("Category:", plugin.category.clone()),
        ("Status:", plugin.status.to_string()),
        ("Enabled:", yes_no(plugin.is_enabled).to_string()),
        ("Core:", yes_no(plugin.is_core).to_string()),
        ("Locked:", yes_no(plugin.is_locked).to_string()),
        ("Load order:", plugin.load_order.to_string()),
        ("Location:", or_dash(plugin.location.as_deref()).to_string()),
        ("Owned tables:", join_or_dash(plugin.owned_tables.as_slice())),
        ("Revision:", plugin.revision.to_string()),
        ("Updated:", plugin.updated_at.to_rfc3339()),
    ];
    for (label, value) in rows {
        writeln!(tw, "{label}\t{value}").map_err(|err| err.to_string())?;
    }
    tw.flush().map_err(|err| err.to_string())?;

    if !plugin.settings.is_empty() {
        writeln!(stdout, "Settings:").map_err(|err| err.to_string())?;
        for (key, value) in plugin.settings.iter() {
            writeln!(stdout, "  {key} = {value}").map_err(|err| err.to_string())?;
        }
    }
    if !dependencies.is_empty() {
        writeln!(stdout, "Requires:").map_err(|err| err.to_string())?;
        for dep in &dependencies {
            let mut line = format!("  {}", dep.requires_plugin);
            if let Some(bounds) = &dep.version_bounds {
                line.push_str(&format!(" {bounds}"));
            }
            if dep.is_optional {
                line.push_str(" (optional)");
            }
            writeln!(stdout, "{line}").map_err(|err| err.to_string())?;
        }
    }
    if !dependents.is_empty() {
        writeln!(stdout, "Required by:").map_err(|err| err.to_string())?;
        for dependent in &dependents {
            writeln!(
                stdout,
                "  {}{}",
                dependent.name,
                if dependent.is_enabled { " (enabled)" } else { "" }
            )
            .map_err(|err| err.to_string())?;
        }
    }
    Ok(())
}

fn join_or_dash(values: &[String]) -> String {
    if values.is_empty() {
        "-".to_string()
    } else {
        values.join(", ")
    }
}

pub fn install(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
) -> Result<(), String> {
    let parsed = CommandArgs::parse("install", args, &[], &[])?;
    let name = parsed.one("install", "plugin name")?;
    let audit = crate::state::audit_context(&parsed);
    let plugin = manager
        .install_with(name, &audit)
        .map_err(|err| err.to_string())?;
    if ctx.json(parsed.json) {
        return write_json(stdout, &plugin);
    }
    if !ctx.quiet {
        writeln!(stdout, "Installed {} (disabled)", plugin.name).map_err(|err| err.to_string())?;
    }
    Ok(())
}
