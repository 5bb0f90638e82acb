// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`backend`] provides the `TaskRunner` trait and the `TaskRegistry` that
//!   maps a task kind to its runner.
//! - [`sinks`] holds the Default Exit / Default Failure runners.
//! - [`file`] holds the built-in `import` and `export` tasks.
//! - [`command`] holds the built-in `command` task, which runs a shell command
//!   with `tokio::process::Command`.

pub mod backend;
pub mod command;
pub mod file;
pub mod sinks;

pub use backend::{TaskFuture, TaskRegistry, TaskRunner};
pub use command::CommandTask;
pub use file::{ExportTask, ImportTask};
pub use sinks::{DefaultExit, DefaultFailure};
