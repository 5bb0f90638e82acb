#![allow(dead_code)]

use jobtree::dag::TaskConfig;
use jobtree::scheduler::ScheduleRow;
use jobtree::types::{ScheduleId, TaskId};
use serde_json::Value;

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(id: TaskId, kind: &str) -> Self {
        Self {
            task: TaskConfig::new(id, kind),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.task.params = params;
        self
    }

    pub fn on_success(mut self, target: TaskId) -> Self {
        self.task.on_success = Some(target);
        self
    }

    pub fn on_failure(mut self, target: TaskId) -> Self {
        self.task.on_failure = Some(target);
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// `kinds[i]` becomes task `i`, with default wiring.
pub fn chain(kinds: &[&str]) -> Vec<TaskConfig> {
    kinds
        .iter()
        .enumerate()
        .map(|(i, kind)| TaskConfig::new(i as TaskId, *kind))
        .collect()
}

/// Builder for `ScheduleRow`.
pub struct ScheduleRowBuilder {
    row: ScheduleRow,
}

impl ScheduleRowBuilder {
    pub fn new(cron: &str, tasks: &[TaskConfig]) -> Self {
        Self {
            row: ScheduleRow::new("test schedule", cron, tasks)
                .expect("task list serializes"),
        }
    }

    pub fn id(mut self, id: ScheduleId) -> Self {
        self.row.id = Some(id);
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.row.name = name.to_string();
        self
    }

    pub fn running(mut self) -> Self {
        self.row.running = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.row.should_run_next = false;
        self
    }

    pub fn build(self) -> ScheduleRow {
        self.row
    }
}
