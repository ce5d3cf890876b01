//! Log source: one-shot priming read and live follow of appended content.
//!
//! The follow task watches the log file's parent directory with `notify`
//! (kqueue on macOS, inotify on Linux) and reads appended bytes from a
//! tracked offset whenever the file changes. A periodic poll backstops
//! missed file-system events. Chunks are delivered to the session's event
//! queue; the task is cancelled through a watch channel before a new
//! follower may be armed, so lines are never delivered twice.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::session::SessionEvent;

/// Fallback poll interval for appends the file watcher missed.
const POLL_FALLBACK: Duration = Duration::from_secs(2);

/// A Murmur log file to prime from and follow.
#[derive(Debug, Clone)]
pub struct LogSource {
    path: PathBuf,
}

impl LogSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the entire existing content, returning it together with the
    /// offset live following should start from.
    pub async fn read_all(&self) -> Result<(String, u64)> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("failed to read log file {}", self.path.display()))?;
        let offset = bytes.len() as u64;
        Ok((String::from_utf8_lossy(&bytes).into_owned(), offset))
    }

    /// Current end of file.
    pub async fn end_offset(&self) -> Result<u64> {
        let meta = tokio::fs::metadata(&self.path)
            .await
            .with_context(|| format!("failed to stat log file {}", self.path.display()))?;
        Ok(meta.len())
    }

    /// Start delivering content appended after `from` to `events`.
    ///
    /// Runs until cancelled. An unexpected end of the watcher's event stream
    /// is reported as [`SessionEvent::LogClosed`]; a missing or unreadable
    /// file is retried on the next poll, so log rotation survives.
    pub fn follow(
        &self,
        from: u64,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<FollowHandle> {
        let (fs_tx, fs_rx) = mpsc::channel::<()>(16);
        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    if matches!(
                        event.kind,
                        notify::EventKind::Modify(_) | notify::EventKind::Create(_)
                    ) {
                        let _ = fs_tx.try_send(());
                    }
                }
            },
        )
        .context("failed to create log watcher")?;

        // Watch the parent directory so rotation and recreation stay visible.
        let watch_path = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", watch_path.display()))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(follow_loop(
            self.path.clone(),
            from,
            watcher,
            fs_rx,
            events,
            stop_rx,
        ));
        log::info!("following {} from byte {}", self.path.display(), from);

        Ok(FollowHandle {
            stop: stop_tx,
            task,
        })
    }
}

/// Handle to a running follow task.
#[derive(Debug)]
pub struct FollowHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl FollowHandle {
    /// Stop the follow task. No further chunks are delivered after this
    /// returns, so a replacement follower can be armed without duplicates.
    pub fn cancel(self) {
        let _ = self.stop.send(true);
        self.task.abort();
    }
}

// The watcher moves in here so it stays alive for the lifetime of the task.
async fn follow_loop(
    path: PathBuf,
    mut offset: u64,
    _watcher: RecommendedWatcher,
    mut fs_rx: mpsc::Receiver<()>,
    events: mpsc::Sender<SessionEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            changed = fs_rx.recv() => {
                if changed.is_none() {
                    log::error!("log watcher event stream closed unexpectedly");
                    let _ = events.send(SessionEvent::LogClosed).await;
                    break;
                }
                // Collapse bursts of events into one read.
                while fs_rx.try_recv().is_ok() {}
            }
            _ = tokio::time::sleep(POLL_FALLBACK) => {}
        }

        match read_appended(&path, offset).await {
            Ok((chunk, new_offset)) => {
                offset = new_offset;
                if !chunk.is_empty() && events.send(SessionEvent::LogData(chunk)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                log::warn!("failed to read appended log data: {e:#}");
            }
        }
    }
}

/// Read everything between `offset` and the current end of file.
///
/// Truncation (file shorter than `offset`) resets the offset to zero, which
/// is what a freshly attached reader would observe after rotation.
async fn read_appended(path: &Path, offset: u64) -> Result<(Vec<u8>, u64)> {
    let len = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();

    let mut start = offset;
    if len < start {
        log::warn!(
            "{} truncated ({} -> {} bytes); rereading from start",
            path.display(),
            start,
            len
        );
        start = 0;
    }
    if len == start {
        return Ok((Vec::new(), start));
    }

    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.seek(SeekFrom::Start(start)).await?;

    let mut buf = Vec::with_capacity((len - start) as usize);
    file.take(len - start).read_to_end(&mut buf).await?;
    let read = buf.len() as u64;
    Ok((buf, start + read))
}
