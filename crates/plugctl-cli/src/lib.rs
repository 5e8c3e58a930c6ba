use std::env;
use std::io::Write;
use std::sync::OnceLock;

pub mod audit;
pub mod backups;
pub mod flags;
pub mod graph;
pub mod logging;
pub mod migrate;
mod output;
pub mod plugin;
pub mod setting;
pub mod state;

use flags::{parse_global_flags, GlobalFlags};
use plugctl_core::Config;
use plugctl_lifecycle::LifecycleManager;
use tracing::debug;

/// Version information set at build time.
static VERSION_STRING: OnceLock<String> = OnceLock::new();

pub fn crate_label() -> &'static str {
    "plugctl-cli"
}

/// Set the version string for `--version` output.
/// Must be called before `run_from_env`.
pub fn set_version(version: &str, commit: &str) {
    let formatted = format!("{version} (commit: {commit})");
    let _ = VERSION_STRING.set(formatted);
}

fn get_version() -> &'static str {
    VERSION_STRING
        .get()
        .map(|value| value.as_str())
        .unwrap_or("dev (commit: none)")
}

/// Loaded configuration plus the output switches every command honours.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: Config,
    pub json: bool,
    pub quiet: bool,
}

impl Context {
    /// Command-local `--json` adds to the global one.
    pub(crate) fn json(&self, local: bool) -> bool {
        self.json || local
    }
}

const COMMANDS: &[&str] = &[
    "audit",
    "backups",
    "candidates",
    "delete",
    "disable",
    "discover",
    "enable",
    "hooks",
    "install",
    "list",
    "migrate",
    "order",
    "restore",
    "seed",
    "set",
    "setting",
    "show",
    "tree",
    "uninstall",
    "verify",
];

pub fn run_from_env() -> i32 {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    run_with_args(&args, &mut stdout, &mut stderr)
}

pub fn run_with_args(args: &[String], stdout: &mut dyn Write, stderr: &mut dyn Write) -> i32 {
    let (flags, index) = parse_global_flags(args);

    if flags.version {
        let _ = writeln!(stdout, "plugctl version {}", get_version());
        return 0;
    }

    let remaining = &args[index..];
    let command = remaining.first().map(|arg| arg.as_str());
    match command {
        None | Some("help") | Some("-h") | Some("--help") => {
            if let Err(err) = write_root_help(stdout) {
                let _ = writeln!(stderr, "{err}");
                return 1;
            }
            0
        }
        Some(name) if !COMMANDS.contains(&name) => {
            let _ = writeln!(
                stderr,
                "error: unknown command '{name}' (run 'plugctl help' for usage)"
            );
            1
        }
        Some(name) => match execute(name, &remaining[1..], &flags, stdout, stderr) {
            Ok(()) => 0,
            Err(message) => {
                let _ = writeln!(stderr, "{message}");
                1
            }
        },
    }
}

fn execute(
    command: &str,
    args: &[String],
    flags: &GlobalFlags,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<(), String> {
    let ctx = load_context(flags)?;
    debug!(
        command = %command,
        database = %ctx.config.database_path().display(),
        "running command"
    );

    // Schema commands work on the raw store, before any migration runs.
    if command == "migrate" {
        return migrate::execute(args, &ctx, stdout, stderr);
    }

    let manager = LifecycleManager::open(&ctx.config).map_err(|err| err.to_string())?;
    match command {
        "discover" => plugin::discover(args, &manager, &ctx, stdout, stderr),
        "seed" => plugin::seed(args, &manager, &ctx, stdout, stderr),
        "candidates" => plugin::candidates(args, &manager, &ctx, stdout),
        "list" => plugin::list(args, &manager, &ctx, stdout),
        "show" => plugin::show(args, &manager, &ctx, stdout),
        "install" => plugin::install(args, &manager, &ctx, stdout),
        "enable" => state::enable(args, &manager, &ctx, stdout),
        "disable" => state::disable(args, &manager, &ctx, stdout),
        "set" => state::set(args, &manager, &ctx, stdout),
        "uninstall" => state::uninstall(args, &manager, &ctx, stdout),
        "restore" => state::restore(args, &manager, &ctx, stdout),
        "delete" => state::delete(args, &manager, &ctx, stdout),
        "setting" => setting::execute(args, &manager, &ctx, stdout),
        "verify" => graph::verify(args, &manager, &ctx, stdout),
        "order" => graph::order(args, &manager, &ctx, stdout),
        "tree" => graph::tree(args, &manager, &ctx, stdout),
        "hooks" => graph::hooks(args, &manager, &ctx, stdout),
        "backups" => backups::execute(args, &manager, &ctx, stdout),
        "audit" => audit::execute(args, &manager, &ctx, stdout),
        other => Err(format!("error: unknown command '{other}'")),
    }
}

/// Loads the config, folds in the logging flags and installs the subscriber.
fn load_context(flags: &GlobalFlags) -> Result<Context, String> {
    let mut config =
        Config::load_or_default(flags.config.as_deref()).map_err(|err| err.to_string())?;
    let (level, format) = logging::resolve(&config.logging, flags);
    config.logging.level = level;
    config.logging.format = format;
    config
        .validate()
        .map_err(|err| format!("invalid config: {err}"))?;
    logging::init(&config.logging.level, &config.logging.format);
    Ok(Context {
        config,
        json: flags.json,
        quiet: flags.quiet,
    })
}

fn write_root_help(out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "Manage the plugin registry of a host application")?;
    writeln!(out)?;
    writeln!(out, "Usage:")?;
    writeln!(out, "  plugctl [global flags] <command> [options]")?;
    writeln!(out)?;
    writeln!(out, "Discovery:")?;
    writeln!(out, "  discover    Register every candidate directory not yet known")?;
    writeln!(out, "  seed        Register names from the legacy active list as enabled")?;
    writeln!(out, "  candidates  List candidate directories and their registration")?;
    writeln!(out, "  install     Register one candidate directory, disabled")?;
    writeln!(out)?;
    writeln!(out, "Registry:")?;
    writeln!(out, "  list        List registered plugins")?;
    writeln!(out, "  show        Show one plugin with its dependencies")?;
    writeln!(out, "  enable      Enable a plugin")?;
    writeln!(out, "  disable     Disable a plugin (--force skips dependents and record checks)")?;
    writeln!(out, "  set         Enable and disable several plugins at once")?;
    writeln!(out, "  uninstall   Back up and drop a plugin's tables, mark it uninstalled")?;
    writeln!(out, "  restore     Return an uninstalled plugin to registered")?;
    writeln!(out, "  delete      Remove a plugin record entirely")?;
    writeln!(out, "  setting     Read or write plugin and host settings")?;
    writeln!(out)?;
    writeln!(out, "Dependencies:")?;
    writeln!(out, "  verify      Report enabled plugins with unmet requirements")?;
    writeln!(out, "  order       Print the load sequence of enabled plugins")?;
    writeln!(out, "  tree        Print a plugin's transitive requirements")?;
    writeln!(out, "  hooks       List or toggle event hook bindings")?;
    writeln!(out)?;
    writeln!(out, "Maintenance:")?;
    writeln!(out, "  backups     List, prune or replay backup artifacts")?;
    writeln!(out, "  audit       Show the lifecycle audit log")?;
    writeln!(out, "  migrate     Apply or roll back store migrations")?;
    writeln!(out)?;
    writeln!(out, "Global Flags:")?;
    writeln!(out, "  -c, --config string      config file (default $PLUGCTL_CONFIG or ~/.config/plugctl/config.yaml)")?;
    writeln!(out, "      --json               output in JSON format")?;
    writeln!(out, "  -q, --quiet              suppress confirmation messages")?;
    writeln!(out, "      --log-level string   override logging level (debug, info, warn, error)")?;
    writeln!(out, "      --log-format string  override logging format (console, json)")?;
    writeln!(out, "      --version            print the version")?;
    Ok(())
}

pub fn run_for_test(args: &[&str]) -> CommandOutput {
    let owned_args: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit_code = run_with_args(&owned_args, &mut stdout, &mut stderr);
    CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}
