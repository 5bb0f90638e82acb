// src/engine/history.rs

//! Job records: one row per job created by the queue, kept after the job
//! itself is gone.
//!
//! Status codes follow the life of a job:
//! `PENDING -> RUNNING -> SUCCESS | FAILURE | CANCELED | PAUSED`, with
//! `PAUSED -> RUNNING` on unpause. A record that is not final when a
//! process starts was orphaned by its predecessor and becomes `ABORTED`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::{JobtreeError, Result};
use crate::scheduler::model::JobConfig;
use crate::types::{JobId, JobType, ScheduleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Pending,
    Running,
    Success,
    Failure,
    Paused,
    Canceled,
    Aborted,
}

impl JobState {
    /// States a job never leaves.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            JobState::Success | JobState::Failure | JobState::Canceled | JobState::Aborted
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Success => "SUCCESS",
            JobState::Failure => "FAILURE",
            JobState::Paused => "PAUSED",
            JobState::Canceled => "CANCELED",
            JobState::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// What is known about one job, live or finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub schedule_id: ScheduleId,
    pub name: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub priority: i32,
    pub worker_id: u32,
    pub paused_filename: String,
    pub status: JobState,
    /// `true` from the first start until a final state; a paused job is
    /// still running in this sense.
    pub running: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Log lines of the finished walk.
    #[serde(default)]
    pub log: Vec<String>,
}

#[derive(Debug, Default)]
struct Records {
    jobs: BTreeMap<JobId, JobRecord>,
    next_id: JobId,
}

impl Records {
    fn record_mut(&mut self, id: JobId) -> Result<&mut JobRecord> {
        self.jobs.get_mut(&id).ok_or(JobtreeError::JobNotFound(id))
    }
}

/// Job records held in memory, optionally mirrored to a JSON file.
///
/// The history also hands out job ids, so ids stay unique across restarts
/// of a file-backed history.
#[derive(Debug, Default)]
pub struct JobHistory {
    inner: Mutex<Records>,
    path: Option<PathBuf>,
}

impl JobHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load records from `path` if it exists, and persist there from now on.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut records = Records::default();
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => {
                let list: Vec<JobRecord> = serde_json::from_str(&json)?;
                info!(path = %path.display(), jobs = list.len(), "loaded job history");
                for record in list {
                    records.next_id = records.next_id.max(record.id);
                    records.jobs.insert(record.id, record);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no job history yet; starting empty");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            inner: Mutex::new(records),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, records: &Records) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let list: Vec<&JobRecord> = records.jobs.values().collect();
        tokio::fs::write(path, serde_json::to_string_pretty(&list)?).await?;
        Ok(())
    }

    /// Record a new `PENDING` job and return its id (ids start at 1).
    pub async fn insert(&self, config: &JobConfig, at: DateTime<Utc>) -> Result<JobId> {
        let mut records = self.inner.lock().await;
        records.next_id += 1;
        let id = records.next_id;
        records.jobs.insert(
            id,
            JobRecord {
                id,
                schedule_id: config.schedule_id,
                name: config.name.clone(),
                job_type: config.job_type,
                priority: config.priority,
                worker_id: config.worker_id,
                paused_filename: config.paused_filename.clone(),
                status: JobState::Pending,
                running: false,
                created_at: at,
                start_time: None,
                end_time: None,
                log: Vec::new(),
            },
        );
        self.persist(&records).await?;
        Ok(id)
    }

    /// Mark a job `RUNNING`. The start time is kept from the first start, so
    /// a resumed job still reports when it originally began.
    pub async fn start(&self, id: JobId, at: DateTime<Utc>) -> Result<()> {
        let mut records = self.inner.lock().await;
        let record = records.record_mut(id)?;
        if record.status.is_final() {
            return Ok(());
        }
        record.status = JobState::Running;
        record.running = true;
        record.start_time.get_or_insert(at);
        self.persist(&records).await
    }

    /// Mark a job `PAUSED`; it stays running until it is finished. Final
    /// states are kept, as they are by `start`.
    pub async fn suspend(&self, id: JobId) -> Result<()> {
        let mut records = self.inner.lock().await;
        let record = records.record_mut(id)?;
        if record.status.is_final() {
            return Ok(());
        }
        record.status = JobState::Paused;
        self.persist(&records).await
    }

    /// Move a job to a final state, keeping the walk's log.
    ///
    /// A job that is already final is left alone and `Ok(false)` returned.
    pub async fn finish(
        &self,
        id: JobId,
        status: JobState,
        log: Vec<String>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut records = self.inner.lock().await;
        let record = records.record_mut(id)?;
        if record.status.is_final() {
            return Ok(false);
        }
        record.status = status;
        record.running = false;
        record.end_time = Some(at);
        record.log = log;
        self.persist(&records).await?;
        Ok(true)
    }

    pub async fn get(&self, id: JobId) -> Option<JobRecord> {
        self.inner.lock().await.jobs.get(&id).cloned()
    }

    /// All records, ascending by id.
    pub async fn list(&self) -> Vec<JobRecord> {
        self.inner.lock().await.jobs.values().cloned().collect()
    }

    /// Records for one schedule, ascending by id.
    pub async fn for_schedule(&self, schedule_id: ScheduleId) -> Vec<JobRecord> {
        self.inner
            .lock()
            .await
            .jobs
            .values()
            .filter(|r| r.schedule_id == schedule_id)
            .cloned()
            .collect()
    }

    /// Mark every job that is not in a final state as `ABORTED`.
    ///
    /// Called once at startup, before this process creates any job.
    pub async fn abort_unfinished(&self, at: DateTime<Utc>) -> Result<usize> {
        let mut records = self.inner.lock().await;
        let mut aborted = 0;
        for record in records.jobs.values_mut().filter(|r| !r.status.is_final()) {
            if record.running {
                record.end_time = Some(at);
            }
            record.status = JobState::Aborted;
            record.running = false;
            aborted += 1;
        }
        if aborted > 0 {
            self.persist(&records).await?;
        }
        Ok(aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(schedule_id: ScheduleId) -> JobConfig {
        JobConfig {
            meta: serde_json::Value::Null,
            name: "nightly".to_string(),
            paused_filename: "snap.bin".to_string(),
            priority: 2,
            schedule_id,
            tasks: "[]".to_string(),
            job_type: JobType::Default,
            worker_id: 1,
        }
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 3, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn lifecycle_stamps_start_and_end() {
        let history = JobHistory::new();
        let id = history.insert(&config(7), at(0)).await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(history.get(id).await.unwrap().status, JobState::Pending);

        history.start(id, at(1)).await.unwrap();
        history.suspend(id).await.unwrap();
        history.start(id, at(5)).await.unwrap();
        assert!(
            history
                .finish(id, JobState::Success, vec!["done".into()], at(6))
                .await
                .unwrap()
        );

        let record = history.get(id).await.unwrap();
        assert_eq!(record.status, JobState::Success);
        assert!(!record.running);
        assert_eq!(record.start_time, Some(at(1)));
        assert_eq!(record.end_time, Some(at(6)));
        assert_eq!(record.log, vec!["done".to_string()]);
    }

    #[tokio::test]
    async fn final_states_are_not_overwritten() {
        let history = JobHistory::new();
        let id = history.insert(&config(1), at(0)).await.unwrap();
        history.finish(id, JobState::Canceled, Vec::new(), at(1)).await.unwrap();

        assert!(!history.finish(id, JobState::Success, Vec::new(), at(2)).await.unwrap());
        assert_eq!(history.get(id).await.unwrap().status, JobState::Canceled);
    }

    #[tokio::test]
    async fn reopened_history_aborts_orphans_and_keeps_ids_unique() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");

        let history = JobHistory::open(&path).await.unwrap();
        let done = history.insert(&config(1), at(0)).await.unwrap();
        history.finish(done, JobState::Failure, Vec::new(), at(1)).await.unwrap();
        let orphan = history.insert(&config(1), at(2)).await.unwrap();
        history.start(orphan, at(2)).await.unwrap();
        history.suspend(orphan).await.unwrap();
        drop(history);

        let reopened = JobHistory::open(&path).await.unwrap();
        assert_eq!(reopened.abort_unfinished(at(9)).await.unwrap(), 1);
        assert_eq!(reopened.get(orphan).await.unwrap().status, JobState::Aborted);
        assert_eq!(reopened.get(done).await.unwrap().status, JobState::Failure);
        assert_eq!(reopened.for_schedule(1).await.len(), 2);
        assert_eq!(reopened.insert(&config(1), at(10)).await.unwrap(), orphan + 1);
    }

    #[test]
    fn states_serialize_as_status_codes() {
        assert_eq!(serde_json::to_string(&JobState::Canceled).unwrap(), "\"CANCELED\"");
        assert_eq!(JobState::Aborted.to_string(), "ABORTED");
    }
}
