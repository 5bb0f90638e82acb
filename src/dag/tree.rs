// src/dag/tree.rs

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::control::RunControl;
use crate::dag::graph::TaskGraph;
use crate::dag::snapshot;
use crate::dag::task::{Task, TaskConfig, TaskOutput, TaskStream};
use crate::errors::{JobtreeError, Result};
use crate::exec::TaskRegistry;
use crate::types::{JobStatus, TaskId};

/// How a call to [`TaskTree::visit`] ended.
///
/// Every variant carries the ids of the tasks executed during that call, in
/// order.
#[derive(Debug)]
pub enum VisitOutcome {
    /// A sink task was reached.
    Finished {
        output: TaskOutput,
        visited: Vec<TaskId>,
    },
    /// The walk stopped at a step boundary because the tree was cancelled.
    /// `last` is the most recent result, if any task ran.
    Cancelled {
        last: Option<TaskOutput>,
        visited: Vec<TaskId>,
    },
    /// The walk stopped at a step boundary because a pause was requested.
    /// The in-flight stream was written to `snapshot`.
    Paused {
        resume_at: TaskId,
        snapshot: PathBuf,
        visited: Vec<TaskId>,
    },
}

impl VisitOutcome {
    /// `true` only for a walk that ended in the success sink.
    pub fn succeeded(&self) -> bool {
        matches!(self, VisitOutcome::Finished { output, .. } if output.status)
    }

    pub fn visited(&self) -> &[TaskId] {
        match self {
            VisitOutcome::Finished { visited, .. }
            | VisitOutcome::Cancelled { visited, .. }
            | VisitOutcome::Paused { visited, .. } => visited,
        }
    }
}

/// The constructed task graph of one job plus its run state.
///
/// Execution is strictly sequential: one task at a time, routed by the
/// boolean status of its output. Cancel and pause are observed at step
/// boundaries only.
pub struct TaskTree {
    tasks: Vec<Task>,
    filename: PathBuf,
    /// Position to resume from after a pause.
    paused_at: Option<usize>,
    control: Arc<RunControl>,
}

impl TaskTree {
    /// Build a tree from a flat task list.
    ///
    /// `filename` is where the in-flight stream is persisted on pause.
    pub fn create(
        configs: Vec<TaskConfig>,
        filename: impl Into<PathBuf>,
        registry: &TaskRegistry,
    ) -> Result<Self> {
        let graph = TaskGraph::build(configs)?;

        let mut tasks = Vec::with_capacity(graph.len());
        for node in graph.into_nodes() {
            let runner = registry.instantiate(&node.config)?;
            tasks.push(Task::new(node.config, node.on_success, node.on_failure, runner));
        }

        Ok(Self {
            tasks,
            filename: filename.into(),
            paused_at: None,
            control: Arc::new(RunControl::new()),
        })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Shared handle for cancelling or pausing while a walk is in progress.
    pub fn control(&self) -> Arc<RunControl> {
        Arc::clone(&self.control)
    }

    pub fn status(&self) -> JobStatus {
        self.control.status()
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// Whether a previous walk stopped on a pause and left a resume point.
    pub fn is_suspended(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Request a pause; a no-op (returning `false`) once cancelled.
    pub fn pause(&self) -> bool {
        self.control.pause()
    }

    /// Names along the all-success path, from the first task to the sink.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut ind = 0;
        loop {
            let task = &self.tasks[ind];
            lines.push(format!(
                "[{}] {} ({})",
                task.id(),
                task.config().display_name(),
                task.config().task_id
            ));
            match task.on_success() {
                Some(next) => ind = next,
                None => break,
            }
        }
        lines
    }

    /// Log the all-success path, one task per line.
    pub fn print_tree(&self) {
        for (i, line) in self.describe().into_iter().enumerate() {
            if i > 0 {
                info!("-->");
            }
            info!("{line}");
        }
    }

    /// Walk the tree until a sink is reached, the tree is cancelled, or a
    /// pause is observed.
    ///
    /// A suspended tree resumes at its stored position, with the snapshot
    /// stream as that task's input.
    pub async fn visit(&mut self) -> Result<VisitOutcome> {
        let mut visited = Vec::new();

        if !self.control.mark_running() {
            info!("visit called on a cancelled tree; nothing to do");
            return Ok(VisitOutcome::Cancelled {
                last: None,
                visited,
            });
        }

        let mut ind = 0;
        if let Some(resume_at) = self.paused_at.take() {
            ind = resume_at;
            let stream = resume_stream(&self.filename).await;
            self.tasks[ind].set_input_stream(Some(stream));
            info!(task = self.tasks[ind].id(), "resuming paused tree");
        }

        let mut journal: Vec<String> = Vec::new();
        let mut result = self.step(ind, &mut visited, &mut journal).await;

        while !result.exit {
            let next = {
                let current = &self.tasks[ind];
                let next = if result.status {
                    current.on_success()
                } else {
                    current.on_failure()
                }
                .ok_or_else(|| {
                    JobtreeError::InvalidGraph(format!(
                        "task {} produced a non-terminal result but has no outgoing edge",
                        current.id()
                    ))
                })?;

                debug!(
                    from = current.id(),
                    to = self.tasks[next].id(),
                    status = result.status,
                    "routing to next task"
                );
                next
            };

            if self.control.is_cancelled() {
                info!(next = self.tasks[next].id(), "tree cancelled; stopping walk");
                result.log = journal;
                return Ok(VisitOutcome::Cancelled {
                    last: Some(result),
                    visited,
                });
            }

            if self.control.is_paused() {
                let stream = result.take_stream().unwrap_or_else(empty_stream);
                save_snapshot(&self.filename, stream).await;
                self.paused_at = Some(next);
                info!(
                    resume_at = self.tasks[next].id(),
                    snapshot = %self.filename.display(),
                    "tree paused"
                );
                return Ok(VisitOutcome::Paused {
                    resume_at: self.tasks[next].id(),
                    snapshot: self.filename.clone(),
                    visited,
                });
            }

            ind = next;
            self.tasks[ind].set_input(result);
            result = self.step(ind, &mut visited, &mut journal).await;
        }

        self.control.mark_idle();
        result.log = journal;
        Ok(VisitOutcome::Finished {
            output: result,
            visited,
        })
    }

    async fn step(
        &mut self,
        ind: usize,
        visited: &mut Vec<TaskId>,
        journal: &mut Vec<String>,
    ) -> TaskOutput {
        let task = &mut self.tasks[ind];
        debug!(task = task.id(), name = %task.config().display_name(), "executing task");

        let mut output = task.execute().await;
        visited.push(task.id());
        journal.append(&mut output.log);
        output
    }
}

async fn save_snapshot(path: &Path, stream: TaskStream) {
    match snapshot::save_to_file(stream, path).await {
        Ok(bytes) => info!(path = %path.display(), bytes, "saved in-flight output"),
        Err(e) => warn!(
            path = %path.display(),
            error = %e,
            "error while saving pause snapshot"
        ),
    }
}

async fn resume_stream(path: &Path) -> TaskStream {
    match snapshot::read_from_file(path).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "pause snapshot unreadable; resuming with empty input"
            );
            empty_stream()
        }
    }
}

fn empty_stream() -> TaskStream {
    Box::new(tokio::io::empty())
}

impl fmt::Debug for TaskTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskTree")
            .field("tasks", &self.tasks)
            .field("filename", &self.filename)
            .field("paused_at", &self.paused_at)
            .field("status", &self.control.status())
            .finish()
    }
}
