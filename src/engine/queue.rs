// src/engine/queue.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use chrono::Utc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info, warn};

use crate::dag::{TaskConfig, VisitOutcome};
use crate::engine::history::{JobHistory, JobRecord, JobState};
use crate::engine::job::Job;
use crate::errors::{JobtreeError, Result};
use crate::exec::TaskRegistry;
use crate::scheduler::model::JobConfig;
use crate::types::{JobId, JobType};

/// Default cap on simultaneous run-now jobs. Hitting it means something
/// upstream is flooding the queue.
pub const DEFAULT_MAX_RUN_NOW_JOBS: usize = 50;

#[derive(Debug)]
struct Entry {
    job: Arc<Job>,
    job_type: JobType,
}

/// Registry of live jobs plus the history of every job it created.
///
/// Semantics:
/// - Ids come from the [`JobHistory`], starting at 1.
/// - Scheduled jobs wait FIFO for one of `max_concurrent_jobs` slots.
///   `JobConfig::priority` is recorded but not consulted.
/// - Run-now jobs have their own pool and never wait: past the limit they
///   fail with [`JobtreeError::RunNowLimit`].
/// - A job is deregistered when its run ends, unless it ended paused, in
///   which case it stays addressable for `unpause` / `cancel`. Its record
///   stays in the history either way.
/// - Lookups by unknown id soft-fail for `cancel` and `pause`.
#[derive(Debug)]
pub struct JobQueue {
    jobs: Mutex<HashMap<JobId, Entry>>,
    slots: Semaphore,
    run_now_slots: Semaphore,
    max_run_now: usize,
    history: JobHistory,
    registry: TaskRegistry,
}

impl JobQueue {
    /// `max_concurrent_jobs` is clamped to at least 1. The history starts
    /// empty and in memory.
    pub fn new(registry: TaskRegistry, max_concurrent_jobs: usize) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            slots: Semaphore::new(max_concurrent_jobs.max(1)),
            run_now_slots: Semaphore::new(DEFAULT_MAX_RUN_NOW_JOBS),
            max_run_now: DEFAULT_MAX_RUN_NOW_JOBS,
            history: JobHistory::new(),
            registry,
        }
    }

    /// Replace the run-now limit (clamped to at least 1).
    pub fn with_run_now_limit(mut self, max: usize) -> Self {
        let max = max.max(1);
        self.run_now_slots = Semaphore::new(max);
        self.max_run_now = max;
        self
    }

    pub fn with_history(mut self, history: JobHistory) -> Self {
        self.history = history;
        self
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn history(&self) -> &JobHistory {
        &self.history
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, Entry>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn entry(&self, id: JobId) -> Result<(Arc<Job>, JobType)> {
        self.jobs()
            .get(&id)
            .map(|entry| (Arc::clone(&entry.job), entry.job_type))
            .ok_or(JobtreeError::JobNotFound(id))
    }

    /// Decode the task list, build the job, record it as `PENDING` and
    /// register it.
    pub async fn create(&self, config: &JobConfig) -> Result<(JobId, Arc<Job>)> {
        let tasks: Vec<TaskConfig> = serde_json::from_str(&config.tasks)?;
        let job = Arc::new(Job::create(tasks, &config.paused_filename, &self.registry)?);

        let id = self.history.insert(config, Utc::now()).await?;
        self.jobs().insert(
            id,
            Entry {
                job: Arc::clone(&job),
                job_type: config.job_type,
            },
        );

        info!(
            job_id = id,
            schedule_id = config.schedule_id,
            name = %config.name,
            kind = %config.job_type,
            "job created"
        );
        Ok((id, job))
    }

    async fn admit(&self, job_type: JobType) -> Result<SemaphorePermit<'_>> {
        match job_type {
            JobType::Default => self
                .slots
                .acquire()
                .await
                .map_err(|e| anyhow!("job slots closed: {e}").into()),
            JobType::RunNow => self
                .run_now_slots
                .try_acquire()
                .map_err(|_| JobtreeError::RunNowLimit(self.max_run_now)),
        }
    }

    /// Run a registered job once it is admitted.
    pub async fn run(&self, id: JobId) -> Result<VisitOutcome> {
        let (job, job_type) = self.entry(id)?;

        let _permit = match self.admit(job_type).await {
            Ok(permit) => permit,
            Err(e) => {
                self.settle(id, Err(&e)).await;
                return Err(e);
            }
        };
        debug!(job_id = id, kind = %job_type, "job admitted");
        self.note(id, self.history.start(id, Utc::now()).await);

        let outcome = job.run().await;
        self.settle(id, outcome.as_ref()).await;
        outcome
    }

    /// Cancel by id. Returns `false` if no such job is registered.
    ///
    /// A walking job stops at its next step boundary and is settled by its
    /// run. A suspended job has no walk left, so it is settled here.
    pub async fn cancel(&self, id: JobId) -> bool {
        let Some(job) = self.get(id) else {
            debug!(job_id = id, "cancel requested for unknown job");
            return false;
        };

        job.cancel();
        if job.is_suspended() {
            self.remove(id);
            let log = vec!["cancelled while paused".to_string()];
            let written = self
                .history
                .finish(id, JobState::Canceled, log, Utc::now())
                .await;
            self.note(id, written.map(|_| ()));
        }
        info!(job_id = id, "job cancelled");
        true
    }

    /// Request a pause by id. Returns `false` for unknown or cancelled jobs.
    pub fn pause(&self, id: JobId) -> bool {
        let paused = self.get(id).is_some_and(|job| job.pause());
        if paused {
            info!(job_id = id, "job pause requested");
        }
        paused
    }

    /// Withdraw a pause nobody has observed yet; see [`Job::withdraw_pause`].
    pub fn withdraw_pause(&self, id: JobId) -> bool {
        self.get(id).is_some_and(|job| job.withdraw_pause())
    }

    /// Resume a paused job by id; see [`Job::unpause`].
    ///
    /// A job that is not suspended only has its pending pause withdrawn. A
    /// resume goes through admission again, like a fresh run.
    pub async fn unpause(&self, id: JobId) -> Result<Option<VisitOutcome>> {
        let (job, job_type) = self.entry(id)?;
        if !job.is_suspended() {
            job.withdraw_pause();
            return Ok(None);
        }

        let _permit = self.admit(job_type).await?;
        self.note(id, self.history.start(id, Utc::now()).await);

        let outcome = job.unpause().await;
        match &outcome {
            Ok(None) => {
                if job.is_suspended() {
                    self.note(id, self.history.suspend(id).await);
                }
            }
            Ok(Some(resumed)) => self.settle(id, Ok(resumed)).await,
            Err(e) => self.settle(id, Err(e)).await,
        }
        outcome
    }

    pub fn get(&self, id: JobId) -> Option<Arc<Job>> {
        self.jobs().get(&id).map(|entry| Arc::clone(&entry.job))
    }

    /// The job's record, live or finished.
    pub async fn record(&self, id: JobId) -> Option<JobRecord> {
        self.history.get(id).await
    }

    /// Drop a job from the registry without touching its run state.
    pub fn remove(&self, id: JobId) -> Option<Arc<Job>> {
        self.jobs().remove(&id).map(|entry| entry.job)
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }

    /// Registered ids, ascending.
    pub fn ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.jobs().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn settle(
        &self,
        id: JobId,
        outcome: std::result::Result<&VisitOutcome, &JobtreeError>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let now = Utc::now();
        let settled = Self::settled(id, outcome);
        async move {
            match settled {
                None => self.note(id, self.history.suspend(id).await),
                Some((state, log)) => {
                    self.remove(id);
                    debug!(job_id = id, status = %state, "job run ended");
                    self.note(id, self.history.finish(id, state, log, now).await.map(|_| ()));
                }
            }
        }
    }

    /// Owned result of a run: `None` for a pause, else the final state and log.
    fn settled(
        id: JobId,
        outcome: std::result::Result<&VisitOutcome, &JobtreeError>,
    ) -> Option<(JobState, Vec<String>)> {
        let (state, log) = match outcome {
            Ok(VisitOutcome::Paused { resume_at, .. }) => {
                info!(job_id = id, resume_at, "job paused; keeping it registered");
                return None;
            }
            Ok(VisitOutcome::Finished { output, .. }) => {
                let state = if output.status {
                    JobState::Success
                } else {
                    JobState::Failure
                };
                (state, output.log.clone())
            }
            Ok(VisitOutcome::Cancelled { last, .. }) => (
                JobState::Canceled,
                last.as_ref().map(|o| o.log.clone()).unwrap_or_default(),
            ),
            Err(e) => {
                warn!(job_id = id, error = %e, "job run failed");
                (JobState::Failure, vec![e.to_string()])
            }
        };
        Some((state, log))
    }

    /// History is book-keeping; a failed write never changes a run's result.
    fn note(&self, id: JobId, written: Result<()>) {
        if let Err(e) = written {
            warn!(job_id = id, error = %e, "failed to update job record");
        }
    }
}
