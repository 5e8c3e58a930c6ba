use std::io::Write;

use plugctl_core::SettingValue;
use plugctl_lifecycle::LifecycleManager;

use crate::flags::CommandArgs;
use crate::output::write_json;
use crate::state::audit_context;
use crate::Context;

/// `setting get KEY [--plugin P]` and `setting set KEY VALUE [--plugin P]`.
/// Without `--plugin` the host-wide settings are used.
pub fn execute(
    args: &[String],
    manager: &LifecycleManager,
    ctx: &Context,
    stdout: &mut dyn Write,
) -> Result<(), String> {
    let Some(sub) = args.first() else {
        return Err("error: setting requires a subcommand (get, set)".into());
    };
    let parsed = CommandArgs::parse("setting", &args[1..], &["--plugin"], &[])?;
    let plugin = parsed.value("--plugin");
    let json = ctx.json(parsed.json);

    match sub.as_str() {
        "get" => {
            let key = parsed.one("setting get", "key")?;
            let value = manager
                .get_setting(key, plugin)
                .map_err(|err| err.to_string())?;
            if json {
                return write_json(
                    stdout,
                    &serde_json::json!({ "key": key, "plugin": plugin, "value": value }),
                );
            }
            let Some(value) = value else {
                return Err(match plugin {
                    Some(name) => format!("setting '{key}' not found for plugin '{name}'"),
                    None => format!("setting '{key}' not found"),
                });
            };
            writeln!(stdout, "{value}").map_err(|err| err.to_string())
        }
        "set" => {
            let (key, raw) = match parsed.positionals.as_slice() {
                [key, raw] => (key.as_str(), raw.as_str()),
                _ => return Err("error: setting set requires KEY and VALUE".into()),
            };
            let value = SettingValue::infer(raw);
            let kind = value.kind();
            manager
                .set_setting_with(key, value, plugin, &audit_context(&parsed))
                .map_err(|err| err.to_string())?;
            if json {
                return write_json(
                    stdout,
                    &serde_json::json!({ "key": key, "plugin": plugin, "kind": kind }),
                );
            }
            if !ctx.quiet {
                writeln!(stdout, "Set {key} ({kind})").map_err(|err| err.to_string())?;
            }
            Ok(())
        }
        other => Err(format!(
            "error: unknown setting subcommand '{other}' (expected one of: get, set)"
        )),
    }
}
