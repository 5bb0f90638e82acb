// src/scheduler/store.rs

//! Persistence contract for schedule rows, plus a process-local
//! implementation optionally mirrored to a JSON file.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::{JobtreeError, Result};
use crate::types::ScheduleId;

use super::logs::ScheduleLog;
use super::model::ScheduleRow;

/// Boxed future returned by [`ScheduleStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Row-level access to the `schedules` table.
///
/// Every method is a suspension point. `try_claim` is the one operation that
/// must be atomic: it flips `running` from `false` to `true` and reports
/// whether this caller won.
pub trait ScheduleStore: Send + Sync {
    fn get(&self, id: ScheduleId) -> StoreFuture<'_, Option<ScheduleRow>>;

    fn list(&self) -> StoreFuture<'_, Vec<ScheduleRow>>;

    /// Rows with `running == false`.
    fn select_not_running(&self) -> StoreFuture<'_, Vec<ScheduleRow>>;

    /// Insert (assigning an id when `row.id` is `None`) or replace.
    fn upsert(&self, row: ScheduleRow) -> StoreFuture<'_, ScheduleId>;

    /// Returns `false` if there was no such row.
    fn delete(&self, id: ScheduleId) -> StoreFuture<'_, bool>;

    fn set_running(&self, id: ScheduleId, running: bool) -> StoreFuture<'_, ()>;

    fn set_enabled(&self, id: ScheduleId, enabled: bool) -> StoreFuture<'_, ()>;

    /// Atomic `running: false -> true`. `Ok(false)` means someone else holds it.
    fn try_claim(&self, id: ScheduleId) -> StoreFuture<'_, bool>;

    /// Clear `running` and stamp `last_run`.
    fn record_run(&self, id: ScheduleId, at: DateTime<Utc>) -> StoreFuture<'_, ()>;

    /// Clear every `running` flag; returns how many rows were reset.
    fn reset_running(&self) -> StoreFuture<'_, usize>;

    /// Add one finished run to the schedule's log, creating the log on
    /// first use. Returns the updated log.
    fn record_outcome(
        &self,
        id: ScheduleId,
        success: bool,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, ScheduleLog>;

    fn get_log(&self, id: ScheduleId) -> StoreFuture<'_, Option<ScheduleLog>>;
}

/// On-disk shape of a file-backed store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    schedules: Vec<ScheduleRow>,
    #[serde(default)]
    logs: Vec<ScheduleLog>,
}

#[derive(Debug, Default)]
struct Rows {
    rows: BTreeMap<ScheduleId, ScheduleRow>,
    logs: BTreeMap<ScheduleId, ScheduleLog>,
    next_id: ScheduleId,
}

impl Rows {
    fn from_file(file: StoreFile) -> Self {
        let mut rows = Rows::default();
        for row in file.schedules {
            rows.insert(row);
        }
        for log in file.logs {
            rows.logs.insert(log.schedule_id, log);
        }
        rows
    }

    fn insert(&mut self, mut row: ScheduleRow) -> ScheduleId {
        let id = match row.id {
            Some(id) => id,
            None => self.next_id.max(1),
        };
        row.id = Some(id);
        self.next_id = self.next_id.max(id + 1);
        self.rows.insert(id, row);
        id
    }

    fn row_mut(&mut self, id: ScheduleId) -> Result<&mut ScheduleRow> {
        self.rows
            .get_mut(&id)
            .ok_or(JobtreeError::ScheduleNotFound(id))
    }
}

/// Schedule rows held in memory.
///
/// With a backing file every mutation rewrites the file as pretty JSON, so a
/// restarted process sees the same rows (including stale `running` flags,
/// which the scheduler resets on startup).
#[derive(Debug, Default)]
pub struct InMemoryScheduleStore {
    inner: Mutex<Rows>,
    path: Option<PathBuf>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rows from `path` if it exists, and persist there from now on.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let rows = match tokio::fs::read_to_string(&path).await {
            Ok(json) => {
                let file: StoreFile = serde_json::from_str(&json)?;
                info!(path = %path.display(), rows = file.schedules.len(), "loaded schedule store");
                Rows::from_file(file)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no schedule store yet; starting empty");
                Rows::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            inner: Mutex::new(rows),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, rows: &Rows) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = StoreFile {
            schedules: rows.rows.values().cloned().collect(),
            logs: rows.logs.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        tokio::fs::write(path, json).await?;
        debug!(path = %path.display(), rows = file.schedules.len(), "saved schedule store");
        Ok(())
    }
}

impl ScheduleStore for InMemoryScheduleStore {
    fn get(&self, id: ScheduleId) -> StoreFuture<'_, Option<ScheduleRow>> {
        Box::pin(async move { Ok(self.inner.lock().await.rows.get(&id).cloned()) })
    }

    fn list(&self) -> StoreFuture<'_, Vec<ScheduleRow>> {
        Box::pin(async move { Ok(self.inner.lock().await.rows.values().cloned().collect()) })
    }

    fn select_not_running(&self) -> StoreFuture<'_, Vec<ScheduleRow>> {
        Box::pin(async move {
            let rows = self.inner.lock().await;
            Ok(rows
                .rows
                .values()
                .filter(|row| !row.running)
                .cloned()
                .collect())
        })
    }

    fn upsert(&self, row: ScheduleRow) -> StoreFuture<'_, ScheduleId> {
        Box::pin(async move {
            let mut rows = self.inner.lock().await;
            let id = rows.insert(row);
            self.persist(&rows).await?;
            Ok(id)
        })
    }

    fn delete(&self, id: ScheduleId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut rows = self.inner.lock().await;
            let removed = rows.rows.remove(&id).is_some();
            if removed {
                rows.logs.remove(&id);
                self.persist(&rows).await?;
            }
            Ok(removed)
        })
    }

    fn set_running(&self, id: ScheduleId, running: bool) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut rows = self.inner.lock().await;
            rows.row_mut(id)?.running = running;
            self.persist(&rows).await
        })
    }

    fn set_enabled(&self, id: ScheduleId, enabled: bool) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut rows = self.inner.lock().await;
            rows.row_mut(id)?.should_run_next = enabled;
            self.persist(&rows).await
        })
    }

    fn try_claim(&self, id: ScheduleId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut rows = self.inner.lock().await;
            let row = rows.row_mut(id)?;
            if row.running {
                return Ok(false);
            }
            row.running = true;
            self.persist(&rows).await?;
            Ok(true)
        })
    }

    fn record_run(&self, id: ScheduleId, at: DateTime<Utc>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut rows = self.inner.lock().await;
            let row = rows.row_mut(id)?;
            row.running = false;
            row.last_run = Some(at);
            self.persist(&rows).await
        })
    }

    fn reset_running(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut rows = self.inner.lock().await;
            let mut reset = 0;
            for row in rows.rows.values_mut().filter(|row| row.running) {
                row.running = false;
                reset += 1;
            }
            if reset > 0 {
                self.persist(&rows).await?;
            }
            Ok(reset)
        })
    }

    fn record_outcome(
        &self,
        id: ScheduleId,
        success: bool,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, ScheduleLog> {
        Box::pin(async move {
            let mut rows = self.inner.lock().await;
            if !rows.rows.contains_key(&id) {
                return Err(JobtreeError::ScheduleNotFound(id));
            }
            let log = rows
                .logs
                .entry(id)
                .or_insert_with(|| ScheduleLog::new(id));
            log.record(success, note.as_deref(), at);
            let log = log.clone();
            self.persist(&rows).await?;
            Ok(log)
        })
    }

    fn get_log(&self, id: ScheduleId) -> StoreFuture<'_, Option<ScheduleLog>> {
        Box::pin(async move { Ok(self.inner.lock().await.logs.get(&id).cloned()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str) -> ScheduleRow {
        ScheduleRow::new(name, "* * * * *", &[]).unwrap()
    }

    #[tokio::test]
    async fn upsert_assigns_increasing_ids() {
        let store = InMemoryScheduleStore::new();
        let a = store.upsert(row("a")).await.unwrap();
        let b = store.upsert(row("b")).await.unwrap();
        assert_eq!((a, b), (1, 2));

        let mut explicit = row("c");
        explicit.id = Some(10);
        assert_eq!(store.upsert(explicit).await.unwrap(), 10);
        assert_eq!(store.upsert(row("d")).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn claim_is_single_winner() {
        let store = InMemoryScheduleStore::new();
        let id = store.upsert(row("a")).await.unwrap();

        assert!(store.try_claim(id).await.unwrap());
        assert!(!store.try_claim(id).await.unwrap());
        assert!(store.select_not_running().await.unwrap().is_empty());

        store.record_run(id, Utc::now()).await.unwrap();
        let row = store.get(id).await.unwrap().unwrap();
        assert!(!row.running);
        assert!(row.last_run.is_some());
    }

    #[tokio::test]
    async fn missing_rows_are_reported() {
        let store = InMemoryScheduleStore::new();
        assert!(matches!(
            store.set_running(3, true).await,
            Err(JobtreeError::ScheduleNotFound(3))
        ));
        assert!(!store.delete(3).await.unwrap());
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("schedules.json");

        let store = InMemoryScheduleStore::open(&path).await.unwrap();
        let id = store.upsert(row("nightly")).await.unwrap();
        store.set_running(id, true).await.unwrap();
        drop(store);

        let reopened = InMemoryScheduleStore::open(&path).await.unwrap();
        let rows = reopened.list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].running);

        assert_eq!(reopened.reset_running().await.unwrap(), 1);
        assert_eq!(reopened.upsert(row("next")).await.unwrap(), id + 1);
    }

    #[tokio::test]
    async fn run_logs_persist_and_go_away_with_their_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedules.json");

        let store = InMemoryScheduleStore::open(&path).await.unwrap();
        let id = store.upsert(row("nightly")).await.unwrap();
        store.record_outcome(id, true, None, Utc::now()).await.unwrap();
        let log = store
            .record_outcome(id, false, Some("job 2 ended FAILURE".into()), Utc::now())
            .await
            .unwrap();
        assert_eq!(log.number_of_runs, 2);
        assert!(matches!(
            store.record_outcome(99, true, None, Utc::now()).await,
            Err(JobtreeError::ScheduleNotFound(99))
        ));
        drop(store);

        let reopened = InMemoryScheduleStore::open(&path).await.unwrap();
        assert_eq!(reopened.get_log(id).await.unwrap(), Some(log));

        assert!(reopened.delete(id).await.unwrap());
        assert!(reopened.get_log(id).await.unwrap().is_none());
    }
}
