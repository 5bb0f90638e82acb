// src/config/model.rs

use std::path::PathBuf;

use serde::Deserialize;

use crate::dag::TaskConfig;
use crate::engine::queue::DEFAULT_MAX_RUN_NOW_JOBS;
use crate::errors::Result;
use crate::scheduler::ScheduleRow;
use crate::types::ScheduleId;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [scheduler]
/// snapshot_dir = ".jobtree/snapshots"
/// store_path = ".jobtree/schedules.json"
/// worker_id = 1
/// max_concurrent_jobs = 4
/// max_concurrent_run_now_jobs = 50
/// jobs_path = ".jobtree/jobs.json"
///
/// [[schedule]]
/// id = 1
/// name = "nightly copy"
/// cron = "0 2 * * *"
///
/// [[schedule.tasks]]
/// id = 0
/// task_id = "import"
/// params = { path = "in.csv" }
/// ```
///
/// Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub schedule: Vec<ScheduleSection>,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub scheduler: SchedulerSection,
    pub schedule: Vec<ScheduleSection>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(scheduler: SchedulerSection, schedule: Vec<ScheduleSection>) -> Self {
        Self {
            scheduler,
            schedule,
        }
    }

    pub fn schedule(&self, id: ScheduleId) -> Option<&ScheduleSection> {
        self.schedule.iter().find(|s| s.id == id)
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// Directory for `Task_<id>_<timestamp>.bin` pause snapshots.
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,

    /// JSON file mirroring the schedule rows. `None` keeps rows in memory.
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    #[serde(default)]
    pub worker_id: u32,

    /// Upper bound on simultaneously walking jobs.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Separate bound for ad-hoc runs; one past it is rejected, not queued.
    #[serde(default = "default_max_run_now_jobs")]
    pub max_concurrent_run_now_jobs: usize,

    /// JSON file holding job records. `None` keeps them in memory.
    #[serde(default)]
    pub jobs_path: Option<PathBuf>,
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from(".jobtree/snapshots")
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_max_run_now_jobs() -> usize {
    DEFAULT_MAX_RUN_NOW_JOBS
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            snapshot_dir: default_snapshot_dir(),
            store_path: None,
            worker_id: 0,
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_concurrent_run_now_jobs: default_max_run_now_jobs(),
            jobs_path: None,
        }
    }
}

/// One `[[schedule]]` entry, seeded into the store at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSection {
    pub id: ScheduleId,

    #[serde(default)]
    pub name: String,

    pub cron: String,

    /// Maps to the row's `shouldRunNext`.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

fn default_enabled() -> bool {
    true
}

impl ScheduleSection {
    /// The store row this entry seeds.
    pub fn to_row(&self, worker_id: u32) -> Result<ScheduleRow> {
        let mut row = ScheduleRow::new(&self.name, &self.cron, &self.tasks)?;
        row.id = Some(self.id);
        row.should_run_next = self.enabled;
        row.priority = self.priority;
        row.worker_id = worker_id;
        Ok(row)
    }
}
