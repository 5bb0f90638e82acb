// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::types::{JobId, ScheduleId, TaskId};

#[derive(Error, Debug)]
pub enum JobtreeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task list is empty; a job needs at least one task")]
    EmptyTaskList,

    #[error("All tasks must have unique IDs (duplicate id {0})")]
    DuplicateTaskId(TaskId),

    #[error("Invalid task graph: {0}")]
    InvalidGraph(String),

    #[error("Unknown task kind: {0}")]
    UnknownTaskKind(String),

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(ScheduleId),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Too many run-now jobs in progress (limit {0})")]
    RunNowLimit(usize),

    #[error("Invalid cron expression '{expr}': {message}")]
    InvalidCron { expr: String, message: String },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, JobtreeError>;
