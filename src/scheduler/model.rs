// src/scheduler/model.rs

//! Persisted schedule rows and the job hand-off object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::TaskConfig;
use crate::errors::Result;
use crate::types::{JobType, ScheduleId};

/// One row of the `schedules` table.
///
/// `tasks` is the JSON-encoded task list, kept as text the way it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRow {
    /// `None` until the store assigns one on insert.
    #[serde(default)]
    pub id: Option<ScheduleId>,
    pub cron: String,
    pub name: String,
    pub tasks: String,
    /// Single-flight guard shared across processes.
    #[serde(default)]
    pub running: bool,
    /// Enable/disable switch, orthogonal to `running`.
    #[serde(default = "default_true")]
    pub should_run_next: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub worker_id: u32,
}

fn default_true() -> bool {
    true
}

impl ScheduleRow {
    pub fn new(name: impl Into<String>, cron: impl Into<String>, tasks: &[TaskConfig]) -> Result<Self> {
        Ok(Self {
            id: None,
            cron: cron.into(),
            name: name.into(),
            tasks: serde_json::to_string(tasks)?,
            running: false,
            should_run_next: true,
            last_run: None,
            priority: 0,
            worker_id: 0,
        })
    }

    /// Decode the stored task list.
    pub fn task_configs(&self) -> Result<Vec<TaskConfig>> {
        Ok(serde_json::from_str(&self.tasks)?)
    }

    /// Copy for re-insertion: id cleared, name suffixed, not running.
    pub fn duplicate(&self) -> Self {
        Self {
            id: None,
            name: format!("{} - Copy", self.name),
            running: false,
            last_run: None,
            ..self.clone()
        }
    }
}

/// Everything the job layer needs to create one job for a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    #[serde(default)]
    pub meta: serde_json::Value,
    pub name: String,
    pub paused_filename: String,
    #[serde(default)]
    pub priority: i32,
    pub schedule_id: ScheduleId,
    /// JSON-encoded task list, copied from the schedule row.
    pub tasks: String,
    #[serde(rename = "type", default)]
    pub job_type: JobType,
    #[serde(default)]
    pub worker_id: u32,
}
