// src/engine/job.rs

//! One runnable job: a thin façade over a single [`TaskTree`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::dag::{RunControl, TaskConfig, TaskTree, VisitOutcome};
use crate::errors::Result;
use crate::exec::TaskRegistry;
use crate::types::JobStatus;

/// A job owns its tree and the flat task list it was built from.
///
/// The tree sits behind an async mutex held for the duration of a walk;
/// control requests go through the shared [`RunControl`] so they never wait
/// on that lock.
#[derive(Debug)]
pub struct Job {
    tree: Mutex<TaskTree>,
    control: Arc<RunControl>,
    tasks: Vec<TaskConfig>,
    filename: PathBuf,
    description: Vec<String>,
}

impl Job {
    /// Build the tree; construction errors are returned unchanged.
    pub fn create(
        tasks: Vec<TaskConfig>,
        filename: impl Into<PathBuf>,
        registry: &TaskRegistry,
    ) -> Result<Self> {
        let filename = filename.into();
        let tree = TaskTree::create(tasks.clone(), filename.clone(), registry)?;
        let control = tree.control();
        let description = tree.describe();

        Ok(Self {
            tree: Mutex::new(tree),
            control,
            tasks,
            filename,
            description,
        })
    }

    /// Walk the tree. A suspended tree resumes from its snapshot.
    pub async fn run(&self) -> Result<VisitOutcome> {
        let mut tree = self.tree.lock().await;
        tree.visit().await
    }

    /// Request a pause at the next step boundary. Refused once cancelled.
    pub fn pause(&self) -> bool {
        self.control.pause()
    }

    /// Resume a paused job.
    ///
    /// Returns the outcome of the resumed walk if the tree had stopped on a
    /// pause. A pause that has not yet been observed by a running walk is
    /// simply withdrawn, and a cancelled job is never resumed.
    pub async fn unpause(&self) -> Result<Option<VisitOutcome>> {
        if self.control.is_cancelled() {
            debug!("unpause ignored for a cancelled job");
            return Ok(None);
        }

        let Ok(mut tree) = self.tree.try_lock() else {
            // A walk is still in progress; let it carry on.
            self.control.mark_running();
            return Ok(None);
        };

        if !tree.is_suspended() {
            self.control.mark_idle();
            return Ok(None);
        }

        info!(snapshot = %self.filename.display(), "unpausing job");
        tree.visit().await.map(Some)
    }

    /// Withdraw a pause request that no walk has observed yet.
    ///
    /// Never resumes anything: a tree that already stopped on its pause is
    /// left suspended and `false` is returned, as it is for a cancelled job.
    pub fn withdraw_pause(&self) -> bool {
        match self.tree.try_lock() {
            Err(_) => self.control.mark_running(),
            Ok(tree) if tree.is_suspended() => false,
            Ok(_) => self.control.mark_idle(),
        }
    }

    /// Whether a walk stopped on a pause and is waiting for `unpause`.
    /// `false` while a walk is in progress.
    pub fn is_suspended(&self) -> bool {
        self.tree
            .try_lock()
            .map(|tree| tree.is_suspended())
            .unwrap_or(false)
    }

    /// Cancel; permanent for this job.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn status(&self) -> JobStatus {
        self.control.status()
    }

    pub fn tasks(&self) -> &[TaskConfig] {
        &self.tasks
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.filename
    }

    /// The all-success path of the tree, one line per task.
    pub fn describe(&self) -> &[String] {
        &self.description
    }
}
