// src/logging.rs

//! stderr `tracing` subscriber for the daemon.
//!
//! `--log-level` beats `JOBTREE_LOG`, which beats `info`. Reports from
//! `--dry-run` and `--schedule` own stdout.

use anyhow::{Result, anyhow};
use tracing::Level;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "JOBTREE_LOG";

/// Install the global subscriber. A second call is an error.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env_value = std::env::var(LOG_ENV).ok();

    fmt()
        .with_max_level(resolve_level(cli_level, env_value.as_deref()))
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("installing the log subscriber: {e}"))
}

/// An unparsable `JOBTREE_LOG` is ignored rather than fatal.
pub fn resolve_level(cli_level: Option<LogLevel>, env_value: Option<&str>) -> Level {
    cli_level
        .map(Level::from)
        .or_else(|| env_value.and_then(env_level))
        .unwrap_or(Level::INFO)
}

impl From<LogLevel> for Level {
    fn from(lvl: LogLevel) -> Self {
        match lvl {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

// `Level::from_str` covers the names and 1-5; "warning" is our alias.
fn env_level(raw: &str) -> Option<Level> {
    match raw.trim() {
        s if s.eq_ignore_ascii_case("warning") => Some(Level::WARN),
        s => s.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_wins_over_env() {
        assert_eq!(resolve_level(Some(LogLevel::Warn), Some("trace")), Level::WARN);
    }

    #[test]
    fn env_is_parsed_leniently() {
        assert_eq!(resolve_level(None, Some(" Debug ")), Level::DEBUG);
        assert_eq!(resolve_level(None, Some("warning")), Level::WARN);
        assert_eq!(resolve_level(None, Some("ERROR")), Level::ERROR);
    }

    #[test]
    fn falls_back_to_info() {
        assert_eq!(resolve_level(None, Some("loud")), Level::INFO);
        assert_eq!(resolve_level(None, Some("")), Level::INFO);
        assert_eq!(resolve_level(None, None), Level::INFO);
    }
}
