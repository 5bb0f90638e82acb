// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::{ConfigFile, RawConfigFile, ScheduleSection};
use crate::dag::TaskGraph;
use crate::errors::{JobtreeError, Result};
use crate::scheduler::CronExpr;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = JobtreeError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.scheduler, raw.schedule))
    }
}

pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    validate_scheduler_section(cfg)?;
    validate_schedule_ids(cfg)?;
    for schedule in &cfg.schedule {
        validate_schedule(schedule)?;
    }
    Ok(())
}

fn validate_scheduler_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.scheduler.max_concurrent_jobs == 0 {
        return Err(JobtreeError::ConfigError(
            "[scheduler].max_concurrent_jobs must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.scheduler.max_concurrent_run_now_jobs == 0 {
        return Err(JobtreeError::ConfigError(
            "[scheduler].max_concurrent_run_now_jobs must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_schedule_ids(cfg: &RawConfigFile) -> Result<()> {
    let mut seen = HashSet::new();
    for schedule in &cfg.schedule {
        if !seen.insert(schedule.id) {
            return Err(JobtreeError::ConfigError(format!(
                "schedule id {} is declared more than once",
                schedule.id
            )));
        }
    }
    Ok(())
}

/// Structural checks only; task kinds are resolved when a job is built.
fn validate_schedule(schedule: &ScheduleSection) -> Result<()> {
    let context = |e: JobtreeError| {
        JobtreeError::ConfigError(format!(
            "schedule {} ('{}'): {}",
            schedule.id, schedule.name, e
        ))
    };

    CronExpr::parse(&schedule.cron).map_err(context)?;
    TaskGraph::build(schedule.tasks.clone()).map_err(context)?;
    Ok(())
}
