// src/exec/command.rs

//! Built-in `command` task: run a shell command over the input stream.
//!
//! - The incoming stream (if any) is piped into the child's stdin.
//! - Everything the child writes to stdout becomes the output stream.
//! - stderr is consumed line by line and logged at debug.
//! - A zero exit status is success; anything else routes along the failure
//!   edge.

use std::io::Cursor;
use std::process::Stdio;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, info, warn};

use crate::dag::task::{TaskConfig, TaskInput, TaskOutput, TaskStream};

use super::backend::{TaskFuture, TaskRunner};

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandTask;

impl CommandTask {
    pub const KIND: &'static str = "command";
}

impl TaskRunner for CommandTask {
    fn run<'a>(&'a self, config: &'a TaskConfig, input: TaskInput) -> TaskFuture<'a> {
        Box::pin(async move {
            match run_command(config, input).await {
                Ok(output) => output,
                Err(err) => {
                    warn!(
                        task = %config.display_name(),
                        error = %err,
                        "command task execution error"
                    );
                    TaskOutput::failure(format!("command failed: {err:#}"))
                }
            }
        })
    }
}

/// Build a shell command appropriate for the platform.
fn shell(cmd: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    }
}

async fn run_command(config: &TaskConfig, input: TaskInput) -> Result<TaskOutput> {
    let cmd_str = input
        .params
        .get("cmd")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("task {} needs a string `cmd` parameter", config.id))?
        .to_string();

    info!(task = %config.display_name(), cmd = %cmd_str, "starting command task");

    let mut cmd = shell(&cmd_str);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", config.display_name()))?;

    // Feed stdin from a separate task so a chatty child cannot deadlock us.
    let stdin = child.stdin.take();
    let feeder = tokio::spawn(async move {
        match (stdin, input.stream) {
            (Some(mut stdin), Some(mut stream)) => {
                let fed = feed_stdin(&mut stream, &mut stdin).await;
                let _ = stdin.shutdown().await;
                fed
            }
            (Some(mut stdin), None) => {
                let _ = stdin.shutdown().await;
                Ok(())
            }
            (None, _) => Ok(()),
        }
    });

    if let Some(stderr) = child.stderr.take() {
        let task_name = config.display_name();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_name, "stderr: {}", line);
            }
        });
    }

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout of task '{}' was not captured", config.display_name()))?;
    let mut captured = Vec::new();
    stdout
        .read_to_end(&mut captured)
        .await
        .with_context(|| format!("reading stdout of task '{}'", config.display_name()))?;

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of task '{}'", config.display_name()))?;
    let input_error = match feeder.await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(e) => Some(format!("stdin feeder stopped: {e}")),
    };

    let code = status.code().unwrap_or(-1);
    info!(
        task = %config.display_name(),
        exit_code = code,
        success = status.success(),
        bytes = captured.len(),
        "command task exited"
    );

    if let Some(e) = input_error {
        warn!(task = %config.display_name(), error = %e, "input stream failed; command saw partial input");
        return Ok(TaskOutput::failure(format!(
            "`{cmd_str}` ran on partial input: reading the input stream failed: {e}"
        )));
    }

    let stream: TaskStream = Box::new(Cursor::new(captured));
    let output = if status.success() {
        TaskOutput::success(Some(stream))
    } else {
        TaskOutput {
            status: false,
            exit: false,
            stream: Some(stream),
            log: Vec::new(),
        }
    };
    Ok(output.with_log(format!("`{cmd_str}` exited with code {code}")))
}

/// Copy `stream` into the child's stdin.
///
/// A read error on `stream` is returned. A write error only means the child
/// stopped reading early (e.g. `head`), which is its own business.
async fn feed_stdin(stream: &mut TaskStream, stdin: &mut ChildStdin) -> std::io::Result<()> {
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        if let Err(e) = stdin.write_all(&buf[..n]).await {
            debug!(error = %e, "child closed stdin before input was drained");
            return Ok(());
        }
    }
}
