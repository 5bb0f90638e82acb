use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use tokio::io::AsyncReadExt;
use tokio::sync::Notify;
use jobtree::dag::{TaskConfig, TaskInput, TaskOutput, TaskStream};
use jobtree::exec::{TaskFuture, TaskRegistry, TaskRunner};
use jobtree::types::TaskId;

/// Kinds registered by [`Recorder::registry`].
pub const OK: &str = "ok";
pub const FAIL: &str = "fail";
pub const EMIT: &str = "emit";
pub const CAPTURE: &str = "capture";
pub const GATED: &str = "gated";

/// Shared observation point for scripted runners.
///
/// - `ok`: succeeds, passing its input stream through.
/// - `fail`: reports `status = false`.
/// - `emit`: succeeds with `params.data` (a string) as its output stream.
/// - `capture`: drains its input, records the bytes, passes them on.
/// - `gated`: signals [`Recorder::wait_entered`], then blocks until
///   [`Recorder::release`] before passing its input through.
#[derive(Clone, Default)]
pub struct Recorder {
    executed: Arc<Mutex<Vec<TaskId>>>,
    captured: Arc<Mutex<HashMap<TaskId, Vec<u8>>>>,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in kinds plus the scripted ones above.
    pub fn registry(&self) -> TaskRegistry {
        let mut registry = TaskRegistry::with_builtin();
        for kind in [OK, FAIL, EMIT, CAPTURE, GATED] {
            registry.register_runner(
                kind,
                Arc::new(ScriptedRunner {
                    kind,
                    recorder: self.clone(),
                }),
            );
        }
        registry
    }

    /// Ids of executed scripted tasks, in order.
    pub fn executed(&self) -> Vec<TaskId> {
        self.executed.lock().unwrap().clone()
    }

    pub fn captured(&self, id: TaskId) -> Option<Vec<u8>> {
        self.captured.lock().unwrap().get(&id).cloned()
    }

    /// Resolves once a `gated` task has started.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let one blocked `gated` task finish.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

struct ScriptedRunner {
    kind: &'static str,
    recorder: Recorder,
}

fn bytes_stream(bytes: Vec<u8>) -> Option<TaskStream> {
    Some(Box::new(Cursor::new(bytes)))
}

impl TaskRunner for ScriptedRunner {
    fn run<'a>(&'a self, config: &'a TaskConfig, input: TaskInput) -> TaskFuture<'a> {
        Box::pin(async move {
            self.recorder.executed.lock().unwrap().push(config.id);

            match self.kind {
                FAIL => TaskOutput::failure(format!("task {} failed on purpose", config.id)),
                EMIT => {
                    let data = input.params["data"].as_str().unwrap_or_default();
                    TaskOutput::success(bytes_stream(data.as_bytes().to_vec()))
                }
                CAPTURE => {
                    let mut bytes = Vec::new();
                    if let Some(mut stream) = input.stream {
                        stream.read_to_end(&mut bytes).await.unwrap();
                    }
                    self.recorder
                        .captured
                        .lock()
                        .unwrap()
                        .insert(config.id, bytes.clone());
                    TaskOutput::success(bytes_stream(bytes))
                }
                GATED => {
                    self.recorder.entered.notify_one();
                    self.recorder.release.notified().await;
                    TaskOutput::success(input.stream)
                }
                _ => TaskOutput::success(input.stream),
            }
        })
    }
}
