//! Tracing subscriber setup
//!
//! Logs go to stderr so stdout carries nothing but events.

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

/// Environment variable holding a full filter directive, e.g. `watcher=trace`
pub const LOG_ENV: &str = "DIRWATCH_LOG";

const DEFAULT_LEVEL: &str = "info";

/// Pick the directive: environment first, then `--log-level`, then `info`
pub fn directive(env_value: Option<String>, cli_level: Option<&str>) -> String {
    env_value
        .filter(|value| !value.trim().is_empty())
        .or_else(|| cli_level.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string())
}

pub fn init(cli_level: Option<&str>) -> Result<()> {
    let directive = directive(std::env::var(LOG_ENV).ok(), cli_level);
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("Invalid log filter '{}'", directive))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_wins() {
        assert_eq!(directive(Some("watcher=trace".into()), Some("warn")), "watcher=trace");
    }

    #[test]
    fn test_flag_then_default() {
        assert_eq!(directive(None, Some("debug")), "debug");
        assert_eq!(directive(Some("  ".into()), Some("debug")), "debug");
        assert_eq!(directive(None, None), "info");
    }
}
