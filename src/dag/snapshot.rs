// src/dag/snapshot.rs

//! Pause snapshots: the in-flight stream of a paused tree, dumped to a file.
//!
//! - [`save_to_file`] drains the whole stream into the file and only returns
//!   once the bytes are flushed; the walk does not continue before that.
//! - [`read_from_file`] returns a stream over the file that deletes the file
//!   once the reader hits end-of-file.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tracing::{debug, warn};

use crate::dag::task::TaskStream;
use crate::types::ScheduleId;

/// Snapshot file name for a schedule run: `Task_<id>_<ISO-8601>.bin`.
///
/// Colons are kept out of the timestamp so the name is valid on every
/// platform.
pub fn snapshot_file_name(schedule_id: ScheduleId, at: DateTime<Utc>) -> String {
    let stamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace(':', "-");
    format!("Task_{schedule_id}_{stamp}.bin")
}

/// Write every chunk of `stream` to `path`, creating parent directories.
///
/// The bytes go to a `.tmp` sibling first and are renamed over `path` once
/// synced. `stream` may itself be a reader over `path` (a resumed tree that
/// is paused again before its input was consumed), so `path` is never
/// truncated while it is being read.
///
/// Returns the number of bytes written.
pub async fn save_to_file(mut stream: TaskStream, path: &Path) -> io::Result<u64> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let tmp = temp_sibling(path);
    let written = async {
        let mut file = File::create(&tmp).await?;
        let written = tokio::io::copy(&mut stream, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok::<_, io::Error>(written)
    }
    .await;

    let written = match written {
        Ok(written) => written,
        Err(e) => {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
    };
    fs::rename(&tmp, path).await?;

    debug!(path = %path.display(), bytes = written, "snapshot saved");
    Ok(written)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Open a snapshot for reading. The file is removed once fully drained.
pub async fn read_from_file(path: &Path) -> io::Result<TaskStream> {
    let file = File::open(path).await?;
    Ok(Box::new(DrainThenDelete {
        inner: file,
        path: path.to_path_buf(),
        removed: false,
    }))
}

struct DrainThenDelete {
    inner: File,
    path: PathBuf,
    removed: bool,
}

impl AsyncRead for DrainThenDelete {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();

        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);

        if let Poll::Ready(Ok(())) = poll {
            let at_eof = buf.filled().len() == before && buf.remaining() > 0;
            if at_eof && !this.removed {
                this.removed = true;
                // Blocking, but a single unlink. It must complete before the
                // caller can write a new snapshot to the same path.
                match std::fs::remove_file(&this.path) {
                    Ok(()) => debug!(path = %this.path.display(), "snapshot drained and removed"),
                    Err(e) => warn!(
                        path = %this.path.display(),
                        error = %e,
                        "failed to remove drained snapshot"
                    ),
                }
            }
        }

        poll
    }
}
