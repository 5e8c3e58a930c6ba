//! Root flag parsing shared by every command.

use std::path::PathBuf;

/// Parsed global flags from the root command line.
#[derive(Debug, Clone, Default)]
pub struct GlobalFlags {
    pub json: bool,
    pub quiet: bool,
    pub config: Option<PathBuf>,
    pub log_level: String,
    pub log_format: String,
    pub version: bool,
}

/// Parse global flags from the front of the argument list.
/// Returns the parsed flags and the index of the first non-global token.
pub fn parse_global_flags(args: &[String]) -> (GlobalFlags, usize) {
    let mut flags = GlobalFlags::default();
    let mut index = 0usize;
    while let Some(token) = args.get(index) {
        match token.as_str() {
            "--json" => flags.json = true,
            "--quiet" | "-q" => flags.quiet = true,
            "--version" => flags.version = true,
            "--config" | "-c" => {
                index += 1;
                if let Some(val) = args.get(index) {
                    flags.config = Some(PathBuf::from(val));
                }
            }
            "--log-level" => {
                index += 1;
                if let Some(val) = args.get(index) {
                    flags.log_level = val.clone();
                }
            }
            "--log-format" => {
                index += 1;
                if let Some(val) = args.get(index) {
                    flags.log_format = val.clone();
                }
            }
            _ => break,
        }
        index += 1;
    }
    (flags, index)
}

/// Value following the flag at `index`.
pub(crate) fn take_value(args: &[String], index: usize, flag: &str) -> Result<String, String> {
    args.get(index + 1)
        .cloned()
        .ok_or_else(|| format!("error: missing value for {flag}"))
}

pub(crate) fn parse_count(raw: &str, flag: &str) -> Result<usize, String> {
    raw.parse::<usize>()
        .map_err(|_| format!("error: invalid value '{raw}' for {flag}: expected a non-negative integer"))
}

/// Splits command arguments into positionals and the shared `--json`,
/// `--reason` options. Other flags are returned untouched for the command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CommandArgs {
    pub json: bool,
    pub reason: Option<String>,
    pub positionals: Vec<String>,
    pub options: Vec<(String, Option<String>)>,
}

impl CommandArgs {
    /// `valued` lists the command's flags that take a value; `switches` the
    /// ones that do not. Anything else starting with `-` is rejected.
    pub fn parse(
        command: &str,
        args: &[String],
        valued: &[&str],
        switches: &[&str],
    ) -> Result<Self, String> {
        let mut parsed = Self::default();
        let mut index = 0usize;
        while let Some(token) = args.get(index) {
            match token.as_str() {
                "--json" => {
                    parsed.json = true;
                    index += 1;
                }
                "--reason" => {
                    parsed.reason = Some(take_value(args, index, "--reason")?);
                    index += 2;
                }
                flag if valued.contains(&flag) => {
                    let value = take_value(args, index, flag)?;
                    parsed.options.push((flag.to_string(), Some(value)));
                    index += 2;
                }
                flag if switches.contains(&flag) => {
                    parsed.options.push((flag.to_string(), None));
                    index += 1;
                }
                flag if flag.starts_with('-') && flag.len() > 1 => {
                    return Err(format!("error: unknown argument for {command}: '{flag}'"));
                }
                value => {
                    parsed.positionals.push(value.to_string());
                    index += 1;
                }
            }
        }
        Ok(parsed)
    }

    pub fn value(&self, flag: &str) -> Option<&str> {
        self.options
            .iter()
            .rev()
            .find(|(name, _)| name == flag)
            .and_then(|(_, value)| value.as_deref())
    }

    pub fn has(&self, flag: &str) -> bool {
        self.options.iter().any(|(name, _)| name == flag)
    }

    /// The single required positional argument.
    pub fn one(&self, command: &str, what: &str) -> Result<&str, String> {
        match self.positionals.as_slice() {
            [only] => Ok(only.as_str()),
            [] => Err(format!("error: {command} requires a {what}")),
            _ => Err(format!(
                "error: {command} accepts exactly 1 {what}, received {}",
                self.positionals.len()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| (*a).to_string()).collect()
    }

    #[test]
    fn global_flags_stop_at_the_command() {
        let args = owned(&["--json", "--config", "/tmp/p.yaml", "list", "--json"]);
        let (flags, idx) = parse_global_flags(&args);
        assert!(flags.json);
        assert_eq!(flags.config, Some(PathBuf::from("/tmp/p.yaml")));
        assert_eq!(idx, 3);
    }

    #[test]
    fn command_args_split_options() {
        let args = owned(&["acl", "--no-backup", "--reason", "cleanup", "--json"]);
        let parsed = match CommandArgs::parse("uninstall", &args, &[], &["--no-backup"]) {
            Ok(parsed) => parsed,
            Err(err) => panic!("parse: {err}"),
        };
        assert!(parsed.json);
        assert!(parsed.has("--no-backup"));
        assert_eq!(parsed.reason.as_deref(), Some("cleanup"));
        assert_eq!(parsed.one("uninstall", "plugin name"), Ok("acl"));
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let args = owned(&["acl", "--force"]);
        let err = match CommandArgs::parse("enable", &args, &[], &[]) {
            Ok(_) => panic!("expected parse error"),
            Err(err) => err,
        };
        assert_eq!(err, "error: unknown argument for enable: '--force'");
    }

    #[test]
    fn missing_value_is_reported() {
        let args = owned(&["--status"]);
        let err = match CommandArgs::parse("list", &args, &["--status"], &[]) {
            Ok(_) => panic!("expected parse error"),
            Err(err) => err,
        };
        assert_eq!(err, "error: missing value for --status");
    }
}
