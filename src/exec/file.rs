// src/exec/file.rs

//! Built-in file tasks.
//!
//! - `import`: opens `params.path` and hands its bytes on as the output stream.
//! - `export`: writes the incoming stream to `params.path`.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::dag::task::{TaskConfig, TaskInput, TaskOutput, TaskStream};

use super::backend::{TaskFuture, TaskRunner};

/// Read `params.path` (a string) from a task's parameter bag.
pub(crate) fn path_param(config: &TaskConfig, params: &serde_json::Value) -> Result<PathBuf> {
    params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("task {} needs a string `path` parameter", config.id))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImportTask;

impl ImportTask {
    pub const KIND: &'static str = "import";
}

impl TaskRunner for ImportTask {
    fn run<'a>(&'a self, config: &'a TaskConfig, input: TaskInput) -> TaskFuture<'a> {
        Box::pin(async move {
            let result: Result<(PathBuf, File)> = async {
                let path = path_param(config, &input.params)?;
                let file = File::open(&path)
                    .await
                    .with_context(|| format!("opening import source {:?}", path))?;
                Ok((path, file))
            }
            .await;

            match result {
                Ok((path, file)) => {
                    info!(task = %config.display_name(), path = %path.display(), "import opened");
                    let stream: TaskStream = Box::new(file);
                    TaskOutput::success(Some(stream))
                        .with_log(format!("imported {}", path.display()))
                }
                Err(err) => {
                    warn!(task = %config.display_name(), error = %err, "import failed");
                    TaskOutput::failure(format!("import failed: {err:#}"))
                }
            }
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportTask;

impl ExportTask {
    pub const KIND: &'static str = "export";
}

impl TaskRunner for ExportTask {
    fn run<'a>(&'a self, config: &'a TaskConfig, input: TaskInput) -> TaskFuture<'a> {
        Box::pin(async move {
            match export(config, input).await {
                Ok((path, bytes)) => {
                    info!(
                        task = %config.display_name(),
                        path = %path.display(),
                        bytes,
                        "export written"
                    );
                    TaskOutput::success(None)
                        .with_log(format!("exported {bytes} bytes to {}", path.display()))
                }
                Err(err) => {
                    warn!(task = %config.display_name(), error = %err, "export failed");
                    TaskOutput::failure(format!("export failed: {err:#}"))
                }
            }
        })
    }
}

async fn export(config: &TaskConfig, input: TaskInput) -> Result<(PathBuf, u64)> {
    let path = path_param(config, &input.params)?;
    let mut stream = input
        .stream
        .ok_or_else(|| anyhow!("task {} has no input stream to export", config.id))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating dir {:?}", parent))?;
        }
    }

    let mut file = File::create(&path)
        .await
        .with_context(|| format!("creating export target {:?}", path))?;
    let bytes = tokio::io::copy(&mut stream, &mut file)
        .await
        .with_context(|| format!("writing export target {:?}", path))?;
    file.flush().await?;

    Ok((path, bytes))
}
