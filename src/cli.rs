// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::ScheduleId;

/// Command-line arguments for `jobtree`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "jobtree",
    version,
    about = "Run task-graph jobs on cron schedules.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Jobtree.toml")]
    pub config: String,

    /// Run a single tick for the current minute, wait for its jobs, exit.
    #[arg(long)]
    pub once: bool,

    /// Run this schedule immediately (ad hoc), print the outcome and exit.
    #[arg(long, value_name = "ID", conflicts_with = "once")]
    pub schedule: Option<ScheduleId>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `JOBTREE_LOG` or `info` is used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print every schedule's task chain, run nothing.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = CliArgs::try_parse_from(["jobtree"]).unwrap();
        assert_eq!(args.config, "Jobtree.toml");
        assert!(!args.once && !args.dry_run);
        assert!(args.schedule.is_none());
    }

    #[test]
    fn schedule_and_once_conflict() {
        assert!(CliArgs::try_parse_from(["jobtree", "--once", "--schedule", "3"]).is_err());
        let args = CliArgs::try_parse_from(["jobtree", "--schedule", "3"]).unwrap();
        assert_eq!(args.schedule, Some(3));
    }
}
