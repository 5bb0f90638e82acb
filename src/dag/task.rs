// src/dag/task.rs

//! Task declarations, task inputs/outputs and the runtime task node.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::exec::TaskRunner;
use crate::types::TaskId;

/// Byte stream handed from one task to the next.
pub type TaskStream = Box<dyn AsyncRead + Send + Unpin>;

/// One node's declaration, as stored (JSON-encoded) in a schedule row.
///
/// `on_success` / `on_failure` are task ids; `None` means "use the default
/// wiring" (next task on success, Default Failure on failure).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    pub id: TaskId,

    /// Discriminant selecting the runner (see [`TaskRegistry`](crate::exec::TaskRegistry)).
    #[serde(alias = "task_id")]
    pub task_id: String,

    #[serde(default)]
    pub name: String,

    /// Opaque bag consumed by the concrete runner.
    #[serde(default)]
    pub params: serde_json::Value,

    #[serde(default, alias = "on_success")]
    pub on_success: Option<TaskId>,

    #[serde(default, alias = "on_failure")]
    pub on_failure: Option<TaskId>,
}

impl TaskConfig {
    pub fn new(id: TaskId, task_id: impl Into<String>) -> Self {
        Self {
            id,
            task_id: task_id.into(),
            name: String::new(),
            params: serde_json::Value::Null,
            on_success: None,
            on_failure: None,
        }
    }

    /// Name used in logs: the configured name, or `<kind>#<id>`.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("{}#{}", self.task_id, self.id)
        } else {
            self.name.clone()
        }
    }
}

/// Input for a single task execution.
#[derive(Default)]
pub struct TaskInput {
    pub params: serde_json::Value,
    /// Output stream of the previously executed task, or a resumed snapshot.
    pub stream: Option<TaskStream>,
}

impl fmt::Debug for TaskInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskInput")
            .field("params", &self.params)
            .field("stream", &self.stream.is_some())
            .finish()
    }
}

/// Result of a single task execution.
///
/// `exit` is only ever `true` for the terminal sink tasks; the tree walk stops
/// at the first output with `exit == true`.
pub struct TaskOutput {
    pub status: bool,
    pub exit: bool,
    pub stream: Option<TaskStream>,
    pub log: Vec<String>,
}

impl TaskOutput {
    pub fn success(stream: Option<TaskStream>) -> Self {
        Self {
            status: true,
            exit: false,
            stream,
            log: Vec::new(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            status: false,
            exit: false,
            stream: None,
            log: vec![reason.into()],
        }
    }

    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.log.push(line.into());
        self
    }

    pub fn take_stream(&mut self) -> Option<TaskStream> {
        self.stream.take()
    }
}

impl fmt::Debug for TaskOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOutput")
            .field("status", &self.status)
            .field("exit", &self.exit)
            .field("stream", &self.stream.is_some())
            .field("log", &self.log)
            .finish()
    }
}

/// Runtime node of a [`TaskTree`](crate::dag::TaskTree).
///
/// Edges are resolved to positions in the tree's task vector. Sinks have no
/// outgoing edges.
pub struct Task {
    config: TaskConfig,
    on_success: Option<usize>,
    on_failure: Option<usize>,
    runner: Arc<dyn TaskRunner>,
    input: Option<TaskInput>,
}

impl Task {
    pub fn new(
        config: TaskConfig,
        on_success: Option<usize>,
        on_failure: Option<usize>,
        runner: Arc<dyn TaskRunner>,
    ) -> Self {
        Self {
            config,
            on_success,
            on_failure,
            runner,
            input: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.config.id
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn on_success(&self) -> Option<usize> {
        self.on_success
    }

    pub fn on_failure(&self) -> Option<usize> {
        self.on_failure
    }

    /// Feed the previous task's result into this task.
    pub fn set_input(&mut self, mut previous: TaskOutput) {
        self.set_input_stream(previous.take_stream());
    }

    /// Replace this task's input stream (used when resuming from a snapshot).
    pub fn set_input_stream(&mut self, stream: Option<TaskStream>) {
        self.input = Some(TaskInput {
            params: self.config.params.clone(),
            stream,
        });
    }

    /// Run this task once, consuming its staged input.
    pub async fn execute(&mut self) -> TaskOutput {
        let input = self.input.take().unwrap_or_else(|| TaskInput {
            params: self.config.params.clone(),
            stream: None,
        });
        self.runner.run(&self.config, input).await
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.config.id)
            .field("kind", &self.config.task_id)
            .field("on_success", &self.on_success)
            .field("on_failure", &self.on_failure)
            .finish_non_exhaustive()
    }
}
