use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a task inside one tree (`TaskConfig::id`).
pub type TaskId = u64;

/// Identifier of a persisted schedule row.
pub type ScheduleId = u64;

/// Identifier handed out by the [`JobQueue`](crate::engine::JobQueue).
pub type JobId = u64;

/// Run state of a task tree.
///
/// `Cancelled` is absorbing: once a tree is cancelled no transition leads out
/// of it. `Paused` is only ever left through an explicit unpause (or a fresh
/// `visit`, which marks the tree `Running` again).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Running,
    Paused,
    Cancelled,
}

impl JobStatus {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            JobStatus::Idle => 0,
            JobStatus::Running => 1,
            JobStatus::Paused => 2,
            JobStatus::Cancelled => 3,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => JobStatus::Running,
            2 => JobStatus::Paused,
            3 => JobStatus::Cancelled,
            _ => JobStatus::Idle,
        }
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Idle
    }
}

/// Why a job was created.
///
/// - `Default`: launched by the scheduler tick.
/// - `RunNow`: launched ad hoc (e.g. `--schedule <ID>` on the CLI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Default,
    RunNow,
}

impl Default for JobType {
    fn default() -> Self {
        JobType::Default
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::Default => f.write_str("default"),
            JobType::RunNow => f.write_str("runnow"),
        }
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(JobType::Default),
            "runnow" | "run_now" => Ok(JobType::RunNow),
            other => Err(format!(
                "invalid job type: {other} (expected \"default\" or \"runnow\")"
            )),
        }
    }
}
