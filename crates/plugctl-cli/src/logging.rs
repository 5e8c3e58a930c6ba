//! Subscriber setup. Logs go to stderr; stdout carries command output only.

use plugctl_core::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::flags::GlobalFlags;

/// Effective level and format after command-line overrides.
pub fn resolve(cfg: &LoggingConfig, flags: &GlobalFlags) -> (String, String) {
    let level = if flags.log_level.trim().is_empty() {
        cfg.level.clone()
    } else {
        flags.log_level.trim().to_lowercase()
    };
    let format = if flags.log_format.trim().is_empty() {
        cfg.format.clone()
    } else {
        flags.log_format.trim().to_lowercase()
    };
    (level, format)
}

/// Installs the global subscriber. `RUST_LOG` wins over `level`. A second
/// call is a no-op.
pub fn init(level: &str, format: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(env_filter);
    let _ = if format == "json" {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init()
    };
}
