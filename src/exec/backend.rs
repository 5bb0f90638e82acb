// src/exec/backend.rs

//! Pluggable task execution.
//!
//! The tree walk talks to a `TaskRunner` per node instead of switching on
//! the task kind. Runners are looked up by the `taskId` discriminant in a
//! [`TaskRegistry`], so new kinds can be added without touching the tree
//! builder, and tests can register scripted runners.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::dag::graph::{DEFAULT_EXIT_KIND, DEFAULT_FAILURE_KIND};
use crate::dag::task::{TaskConfig, TaskInput, TaskOutput};
use crate::errors::{JobtreeError, Result};

use super::command::CommandTask;
use super::file::{ExportTask, ImportTask};
use super::sinks::{DefaultExit, DefaultFailure};

/// Boxed future returned by [`TaskRunner::run`].
pub type TaskFuture<'a> = Pin<Box<dyn Future<Output = TaskOutput> + Send + 'a>>;

/// Trait abstracting how a single task is executed.
///
/// A runner never fails with an error: internal failures are reported as an
/// output with `status == false`, which the tree routes along the failure
/// edge.
pub trait TaskRunner: Send + Sync {
    fn run<'a>(&'a self, config: &'a TaskConfig, input: TaskInput) -> TaskFuture<'a>;
}

type Factory = Arc<dyn Fn(&TaskConfig) -> Result<Arc<dyn TaskRunner>> + Send + Sync>;

/// Maps task kinds to runner factories.
///
/// The two sink kinds are always present.
#[derive(Clone)]
pub struct TaskRegistry {
    factories: HashMap<String, Factory>,
}

impl TaskRegistry {
    /// Registry with only the sink kinds.
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register_runner(DEFAULT_EXIT_KIND, Arc::new(DefaultExit));
        registry.register_runner(DEFAULT_FAILURE_KIND, Arc::new(DefaultFailure));
        registry
    }

    /// Registry with the sinks plus the built-in `import`, `export` and
    /// `command` kinds.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_runner(ImportTask::KIND, Arc::new(ImportTask));
        registry.register_runner(ExportTask::KIND, Arc::new(ExportTask));
        registry.register_runner(CommandTask::KIND, Arc::new(CommandTask));
        registry
    }

    /// Register a factory that builds a runner per task declaration.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&TaskConfig) -> Result<Arc<dyn TaskRunner>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    /// Register one shared runner for every task of this kind.
    pub fn register_runner(&mut self, kind: impl Into<String>, runner: Arc<dyn TaskRunner>) {
        self.register(kind, move |_cfg| Ok(Arc::clone(&runner)));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Build the runner for one declaration; unknown kinds are an error.
    pub fn instantiate(&self, config: &TaskConfig) -> Result<Arc<dyn TaskRunner>> {
        let factory = self
            .factories
            .get(&config.task_id)
            .ok_or_else(|| JobtreeError::UnknownTaskKind(config.task_id.clone()))?;
        factory(config)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
