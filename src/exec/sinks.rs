// src/exec/sinks.rs

//! The two terminal tasks appended to every tree.
//!
//! Both pass the incoming stream through, so the caller of a finished job
//! still gets the last task's output.

use crate::dag::task::{TaskConfig, TaskInput, TaskOutput};

use super::backend::{TaskFuture, TaskRunner};

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExit;

impl TaskRunner for DefaultExit {
    fn run<'a>(&'a self, _config: &'a TaskConfig, input: TaskInput) -> TaskFuture<'a> {
        Box::pin(async move {
            TaskOutput {
                status: true,
                exit: true,
                stream: input.stream,
                log: vec!["job finished successfully".to_string()],
            }
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFailure;

impl TaskRunner for DefaultFailure {
    fn run<'a>(&'a self, _config: &'a TaskConfig, input: TaskInput) -> TaskFuture<'a> {
        Box::pin(async move {
            TaskOutput {
                status: false,
                exit: true,
                stream: input.stream,
                log: vec!["job failed".to_string()],
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sinks_terminate_with_their_status() {
        let cfg = TaskConfig::new(9, "default_exit");

        let exit = DefaultExit.run(&cfg, TaskInput::default()).await;
        assert!(exit.exit && exit.status);

        let failure = DefaultFailure.run(&cfg, TaskInput::default()).await;
        assert!(failure.exit && !failure.status);
    }
}
