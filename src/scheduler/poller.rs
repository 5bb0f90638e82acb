// src/scheduler/poller.rs

//! The minute-aligned schedule poller.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dag::{TaskGraph, VisitOutcome, snapshot};
use crate::engine::JobQueue;
use crate::errors::{JobtreeError, Result};
use crate::types::{JobId, JobType, ScheduleId};

use super::cron::{CronExpr, delay_until_next_minute, truncate_to_minute};
use super::logs::ScheduleLog;
use super::model::{JobConfig, ScheduleRow};
use super::store::ScheduleStore;

/// How one `run_schedule` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunReport {
    /// This process already has a job for the schedule, or another worker
    /// won the claim on the row.
    AlreadyRunning,
    Finished { job_id: JobId, success: bool },
    Cancelled { job_id: JobId },
    /// The job stopped on a pause; the schedule stays marked running until it
    /// is unpaused or cancelled.
    Paused { job_id: JobId },
}

/// Process-local single-flight slot for one schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Reserved before the first await; no job yet.
    Reserved,
    Running(JobId),
    Suspended(JobId),
}

impl Slot {
    fn job_id(self) -> Option<JobId> {
        match self {
            Slot::Reserved => None,
            Slot::Running(id) | Slot::Suspended(id) => Some(id),
        }
    }
}

/// Drives schedules: picks due rows once per minute and turns each into a job.
///
/// Two guards keep a schedule single-flight:
/// - the in-process slot map, reserved synchronously before any await;
/// - the row's `running` flag, claimed with an atomic false -> true update
///   and cleared only after the job's walk has ended.
pub struct Scheduler {
    store: Arc<dyn ScheduleStore>,
    queue: Arc<JobQueue>,
    snapshot_dir: PathBuf,
    worker_id: u32,
    slots: Mutex<HashMap<ScheduleId, Slot>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        queue: Arc<JobQueue>,
        snapshot_dir: impl Into<PathBuf>,
        worker_id: u32,
    ) -> Self {
        Self {
            store,
            queue,
            snapshot_dir: snapshot_dir.into(),
            worker_id,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<dyn ScheduleStore> {
        &self.store
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ScheduleId, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reserve(&self, id: ScheduleId) -> bool {
        let mut slots = self.slots();
        if slots.contains_key(&id) {
            return false;
        }
        slots.insert(id, Slot::Reserved);
        true
    }

    fn set_slot(&self, id: ScheduleId, slot: Slot) {
        self.slots().insert(id, slot);
    }

    fn release(&self, id: ScheduleId) {
        self.slots().remove(&id);
    }

    fn slot(&self, id: ScheduleId) -> Option<Slot> {
        self.slots().get(&id).copied()
    }

    /// Atomically move a suspended slot to running. Only one caller wins.
    fn take_suspended(&self, id: ScheduleId) -> Option<JobId> {
        let mut slots = self.slots();
        let slot = slots.get_mut(&id)?;
        let Slot::Suspended(job_id) = *slot else {
            return None;
        };
        *slot = Slot::Running(job_id);
        Some(job_id)
    }

    /// Atomically drop a suspended slot.
    fn release_suspended(&self, id: ScheduleId) -> Option<JobId> {
        let mut slots = self.slots();
        let Some(Slot::Suspended(job_id)) = slots.get(&id).copied() else {
            return None;
        };
        slots.remove(&id);
        Some(job_id)
    }

    /// Whether this process currently holds a job for the schedule.
    pub fn is_running(&self, id: ScheduleId) -> bool {
        self.slots().contains_key(&id)
    }

    /// Reset rows left `running` by a previous process and mark its
    /// unfinished jobs `ABORTED`. Returns the number of rows reset.
    pub async fn initialize(&self) -> Result<usize> {
        let reset = self.store.reset_running().await?;
        if reset > 0 {
            warn!(reset, "cleared stale running flags left by a previous run");
        } else {
            debug!("no stale running flags");
        }

        let aborted = self.queue.history().abort_unfinished(Utc::now()).await?;
        if aborted > 0 {
            warn!(aborted, "jobs left unfinished by a previous run marked aborted");
        }
        Ok(reset)
    }

    /// Rows that should start at the minute containing `now`: not running,
    /// enabled, and due according to their cron expression.
    pub async fn eligible(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleRow>> {
        let rows = self.store.select_not_running().await?;
        let due = rows
            .into_iter()
            .filter(|row| row.should_run_next)
            .filter(|row| match CronExpr::parse(&row.cron) {
                Ok(cron) => cron.is_due(now),
                Err(e) => {
                    warn!(schedule_id = ?row.id, error = %e, "skipping schedule with invalid cron");
                    false
                }
            })
            .collect();
        Ok(due)
    }

    /// Launch every eligible schedule without waiting for any of them.
    ///
    /// A failing schedule is logged and does not affect its siblings. The
    /// returned handles let callers (e.g. `--once`) wait for the launched
    /// jobs.
    pub async fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> Result<Vec<JoinHandle<()>>> {
        let minute = truncate_to_minute(now);
        let due = self.eligible(minute).await?;
        info!(at = %minute, due = due.len(), "scheduler tick");

        let mut handles = Vec::with_capacity(due.len());
        for id in due.into_iter().filter_map(|row| row.id) {
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                match this.run_schedule(id, false).await {
                    Ok(report) => debug!(schedule_id = id, ?report, "scheduled run ended"),
                    Err(e) => warn!(schedule_id = id, error = %e, "scheduled run failed"),
                }
            }));
        }
        Ok(handles)
    }

    /// Tick on every wall-clock minute boundary until `shutdown` resolves.
    ///
    /// The delay is recomputed after each tick so drift does not build up.
    pub async fn run_loop<F>(self: Arc<Self>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let delay = delay_until_next_minute(Utc::now());
            debug!(delay_ms = delay.as_millis() as u64, "waiting for next minute");

            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler loop stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        warn!(error = %e, "scheduler tick failed");
                    }
                }
            }
        }
    }

    /// Run one schedule now.
    ///
    /// `run_now` tags the job as an ad-hoc run rather than a scheduled one.
    pub async fn run_schedule(&self, id: ScheduleId, run_now: bool) -> Result<RunReport> {
        if !self.reserve(id) {
            info!(schedule_id = id, "schedule already running in this process");
            return Ok(RunReport::AlreadyRunning);
        }

        let result = self.claim_and_run(id, run_now).await;
        match &result {
            Ok(RunReport::Paused { .. }) => {}
            _ => self.release(id),
        }
        result
    }

    async fn claim_and_run(&self, id: ScheduleId, run_now: bool) -> Result<RunReport> {
        let row = self
            .store
            .get(id)
            .await?
            .ok_or(JobtreeError::ScheduleNotFound(id))?;

        if !self.store.try_claim(id).await? {
            warn!(schedule_id = id, "lost the claim on schedule; another run holds it");
            return Ok(RunReport::AlreadyRunning);
        }

        let config = self.job_config(&row, id, run_now);
        let job_id = match self.queue.create(&config).await {
            Ok((job_id, _)) => job_id,
            Err(e) => {
                self.store.set_running(id, false).await?;
                self.log_outcome(id, false, format!("job not created: {e}")).await;
                return Err(e);
            }
        };
        self.set_slot(id, Slot::Running(job_id));

        let outcome = self.queue.run(job_id).await;
        self.settle(id, job_id, outcome).await
    }

    fn job_config(&self, row: &ScheduleRow, id: ScheduleId, run_now: bool) -> JobConfig {
        let filename = self
            .snapshot_dir
            .join(snapshot::snapshot_file_name(id, Utc::now()));

        JobConfig {
            meta: serde_json::json!({ "cron": row.cron }),
            name: row.name.clone(),
            paused_filename: filename.to_string_lossy().into_owned(),
            priority: row.priority,
            schedule_id: id,
            tasks: row.tasks.clone(),
            job_type: if run_now { JobType::RunNow } else { JobType::Default },
            worker_id: self.worker_id,
        }
    }

    /// Book-keeping after a walk ended: a paused job keeps the schedule
    /// claimed, anything else clears `running`, stamps `last_run` and adds
    /// the run to the schedule's log.
    async fn settle(
        &self,
        id: ScheduleId,
        job_id: JobId,
        outcome: Result<VisitOutcome>,
    ) -> Result<RunReport> {
        let report = match outcome {
            Ok(VisitOutcome::Paused { .. }) => {
                self.set_slot(id, Slot::Suspended(job_id));
                info!(schedule_id = id, job_id, "job paused; schedule stays claimed");
                return Ok(RunReport::Paused { job_id });
            }
            Ok(VisitOutcome::Finished { output, .. }) => RunReport::Finished {
                job_id,
                success: output.status,
            },
            Ok(VisitOutcome::Cancelled { .. }) => RunReport::Cancelled { job_id },
            Err(e) => {
                self.store.set_running(id, false).await?;
                self.log_outcome(id, false, format!("job {job_id} failed: {e}")).await;
                return Err(e);
            }
        };

        self.store.record_run(id, Utc::now()).await?;
        let (success, note) = match report {
            RunReport::Finished { success: true, .. } => (true, format!("job {job_id} succeeded")),
            RunReport::Finished { .. } => (false, format!("job {job_id} failed")),
            _ => (false, format!("job {job_id} cancelled")),
        };
        self.log_outcome(id, success, note).await;
        info!(schedule_id = id, job_id, ?report, "schedule run recorded");
        Ok(report)
    }

    /// The run log is a summary; failing to write it never fails the run.
    async fn log_outcome(&self, id: ScheduleId, success: bool, note: String) {
        if let Err(e) = self
            .store
            .record_outcome(id, success, Some(note), Utc::now())
            .await
        {
            warn!(schedule_id = id, error = %e, "failed to update schedule log");
        }
    }

    /// Run summary of a schedule; `None` before its first finished run.
    pub async fn log(&self, id: ScheduleId) -> Result<Option<ScheduleLog>> {
        self.store.get_log(id).await
    }

    /// Request a pause of the schedule's live job.
    pub fn pause(&self, id: ScheduleId) -> bool {
        match self.slot(id).and_then(Slot::job_id) {
            Some(job_id) => self.queue.pause(job_id),
            None => false,
        }
    }

    /// Resume the schedule's paused job.
    ///
    /// `Ok(None)` when nothing was suspended (a pending pause on a running
    /// job is withdrawn instead).
    pub async fn unpause(&self, id: ScheduleId) -> Result<Option<RunReport>> {
        let Some(job_id) = self.take_suspended(id) else {
            // Never resume from here: only the caller that took the
            // suspended slot may walk the job.
            if let Some(Slot::Running(job_id)) = self.slot(id) {
                self.queue.withdraw_pause(job_id);
            }
            return Ok(None);
        };

        let resumed = match self.queue.unpause(job_id).await {
            Ok(Some(outcome)) => Ok(outcome),
            Ok(None) => return self.restore_suspended(id, job_id).await.map(|()| None),
            Err(e) if self.queue.get(job_id).is_some_and(|job| job.is_suspended()) => {
                // not admitted; still paused
                self.set_slot(id, Slot::Suspended(job_id));
                return Err(e);
            }
            Err(e) => Err(e),
        };

        let report = self.settle(id, job_id, resumed).await;
        if !matches!(report, Ok(RunReport::Paused { .. })) {
            self.release(id);
        }
        report.map(Some)
    }

    /// After an unpause that resumed nothing: keep the slot suspended if the
    /// job is still there, otherwise it was cancelled meanwhile and the
    /// schedule is released.
    async fn restore_suspended(&self, id: ScheduleId, job_id: JobId) -> Result<()> {
        if self.queue.get(job_id).is_some() {
            self.set_slot(id, Slot::Suspended(job_id));
            return Ok(());
        }
        self.release(id);
        self.store.record_run(id, Utc::now()).await?;
        self.log_outcome(id, false, format!("job {job_id} cancelled while paused"))
            .await;
        Ok(())
    }

    /// Cancel the schedule's live job.
    ///
    /// A running job stops at its next step boundary and is settled by the
    /// run that owns it. A suspended job has no walk left to settle it, so the
    /// schedule is released here.
    pub async fn cancel(&self, id: ScheduleId) -> Result<bool> {
        if let Some(job_id) = self.release_suspended(id) {
            let cancelled = self.queue.cancel(job_id).await;
            self.store.record_run(id, Utc::now()).await?;
            self.log_outcome(id, false, format!("job {job_id} cancelled while paused"))
                .await;
            info!(schedule_id = id, job_id, "suspended job cancelled");
            return Ok(cancelled);
        }

        match self.slot(id) {
            Some(Slot::Running(job_id)) => Ok(self.queue.cancel(job_id).await),
            Some(Slot::Suspended(_) | Slot::Reserved) | None => Ok(false),
        }
    }

    pub async fn get(&self, id: ScheduleId) -> Result<ScheduleRow> {
        self.store
            .get(id)
            .await?
            .ok_or(JobtreeError::ScheduleNotFound(id))
    }

    pub async fn list(&self) -> Result<Vec<ScheduleRow>> {
        self.store.list().await
    }

    /// Validate and insert a schedule.
    pub async fn create(&self, row: ScheduleRow) -> Result<ScheduleId> {
        self.validate(&row)?;
        let id = self.store.upsert(row).await?;
        info!(schedule_id = id, "schedule saved");
        Ok(id)
    }

    pub async fn delete(&self, id: ScheduleId) -> Result<bool> {
        let deleted = self.store.delete(id).await?;
        if deleted {
            info!(schedule_id = id, "schedule deleted");
        }
        Ok(deleted)
    }

    /// Copy a schedule under a new id with `" - Copy"` appended to its name.
    pub async fn duplicate(&self, id: ScheduleId) -> Result<ScheduleId> {
        let copy = self.get(id).await?.duplicate();
        let new_id = self.store.upsert(copy).await?;
        info!(schedule_id = id, copy_id = new_id, "schedule duplicated");
        Ok(new_id)
    }

    /// Enable or disable future runs (`shouldRunNext`).
    pub async fn set_status(&self, id: ScheduleId, enabled: bool) -> Result<()> {
        self.store.set_enabled(id, enabled).await?;
        info!(schedule_id = id, enabled, "schedule status changed");
        Ok(())
    }

    fn validate(&self, row: &ScheduleRow) -> Result<()> {
        CronExpr::parse(&row.cron)?;
        let tasks = row.task_configs()?;
        for task in &tasks {
            if !self.queue.registry().contains(&task.task_id) {
                return Err(JobtreeError::UnknownTaskKind(task.task_id.clone()));
            }
        }
        TaskGraph::build(tasks)?;
        Ok(())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("snapshot_dir", &self.snapshot_dir)
            .field("worker_id", &self.worker_id)
            .field("slots", &*self.slots())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{TaskConfig, TaskInput, TaskOutput};
    use crate::exec::{TaskFuture, TaskRegistry, TaskRunner};
    use crate::scheduler::store::InMemoryScheduleStore;
    use chrono::TimeZone;

    struct Pass;

    impl TaskRunner for Pass {
        fn run<'a>(&'a self, _config: &'a TaskConfig, input: TaskInput) -> TaskFuture<'a> {
            Box::pin(async move { TaskOutput::success(input.stream) })
        }
    }

    fn scheduler() -> Arc<Scheduler> {
        let mut registry = TaskRegistry::new();
        registry.register_runner("pass", Arc::new(Pass));
        Arc::new(Scheduler::new(
            Arc::new(InMemoryScheduleStore::new()),
            Arc::new(JobQueue::new(registry, 4)),
            std::env::temp_dir(),
            1,
        ))
    }

    fn row(cron: &str) -> ScheduleRow {
        ScheduleRow::new("test", cron, &[TaskConfig::new(1, "pass")]).unwrap()
    }

    #[tokio::test]
    async fn eligibility_filters_running_disabled_and_not_due() {
        let scheduler = scheduler();
        let due = scheduler.create(row("30 2 * * *")).await.unwrap();
        let not_due = scheduler.create(row("31 2 * * *")).await.unwrap();
        let disabled = scheduler.create(row("30 2 * * *")).await.unwrap();
        let running = scheduler.create(row("30 2 * * *")).await.unwrap();

        scheduler.set_status(disabled, false).await.unwrap();
        scheduler.store().set_running(running, true).await.unwrap();

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 2, 30, 5).unwrap();
        let ids: Vec<_> = scheduler
            .eligible(now)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![due]);
        assert!(!ids.contains(&not_due));
    }

    #[tokio::test]
    async fn run_schedule_clears_running_after_the_job() {
        let scheduler = scheduler();
        let id = scheduler.create(row("* * * * *")).await.unwrap();

        let report = scheduler.run_schedule(id, true).await.unwrap();
        assert!(matches!(report, RunReport::Finished { success: true, .. }));

        let stored = scheduler.get(id).await.unwrap();
        assert!(!stored.running);
        assert!(stored.last_run.is_some());
        assert!(!scheduler.is_running(id));
        assert!(scheduler.queue().is_empty());
    }

    #[tokio::test]
    async fn missing_schedule_is_an_error_and_frees_the_slot() {
        let scheduler = scheduler();
        let err = scheduler.run_schedule(99, false).await.unwrap_err();
        assert!(matches!(err, JobtreeError::ScheduleNotFound(99)));
        assert!(!scheduler.is_running(99));
    }

    #[tokio::test]
    async fn create_rejects_bad_rows() {
        let scheduler = scheduler();
        assert!(matches!(
            scheduler.create(row("not a cron")).await,
            Err(JobtreeError::InvalidCron { .. })
        ));

        let unknown = ScheduleRow::new("x", "* * * * *", &[TaskConfig::new(1, "mysql")]).unwrap();
        assert!(matches!(
            scheduler.create(unknown).await,
            Err(JobtreeError::UnknownTaskKind(_))
        ));

        let empty = ScheduleRow::new("x", "* * * * *", &[]).unwrap();
        assert!(matches!(
            scheduler.create(empty).await,
            Err(JobtreeError::EmptyTaskList)
        ));
    }

    #[tokio::test]
    async fn duplicate_appends_copy_suffix() {
        let scheduler = scheduler();
        let id = scheduler.create(row("* * * * *")).await.unwrap();
        let copy = scheduler.duplicate(id).await.unwrap();
        assert_ne!(id, copy);
        assert_eq!(scheduler.get(copy).await.unwrap().name, "test - Copy");
        assert!(scheduler.delete(copy).await.unwrap());
        assert!(!scheduler.delete(copy).await.unwrap());
    }

    #[tokio::test]
    async fn initialize_resets_stale_flags() {
        let scheduler = scheduler();
        let id = scheduler.create(row("* * * * *")).await.unwrap();
        scheduler.store().set_running(id, true).await.unwrap();

        assert_eq!(scheduler.initialize().await.unwrap(), 1);
        assert!(!scheduler.get(id).await.unwrap().running);
    }

    #[tokio::test]
    async fn initialize_aborts_jobs_left_over_from_a_previous_process() {
        let scheduler = scheduler();
        let id = scheduler.create(row("* * * * *")).await.unwrap();
        let config = scheduler.job_config(&scheduler.get(id).await.unwrap(), id, false);
        let (job_id, _) = scheduler.queue().create(&config).await.unwrap();
        scheduler.queue().history().start(job_id, Utc::now()).await.unwrap();

        scheduler.initialize().await.unwrap();
        let record = scheduler.queue().record(job_id).await.unwrap();
        assert_eq!(record.status, crate::engine::JobState::Aborted);
        assert!(record.end_time.is_some());
    }

    #[test]
    fn only_one_caller_takes_a_suspended_slot() {
        let scheduler = scheduler();
        scheduler.set_slot(7, Slot::Suspended(3));

        assert_eq!(scheduler.take_suspended(7), Some(3));
        assert_eq!(scheduler.take_suspended(7), None);
        assert_eq!(scheduler.slot(7), Some(Slot::Running(3)));
        // a running slot is not released by cancel's suspended path
        assert_eq!(scheduler.release_suspended(7), None);

        scheduler.set_slot(7, Slot::Suspended(3));
        assert_eq!(scheduler.release_suspended(7), Some(3));
        assert_eq!(scheduler.slot(7), None);
    }
}
