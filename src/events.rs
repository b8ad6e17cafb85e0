//! Everything related to watching the chat log for modifications.
//!
//! Tailing itself is driven by polling; these events only cut the idle wait
//! short when the client writes to the log, so new lines arrive promptly
//! without polling more often.

use std::fmt::{self, Debug, Formatter};
use std::future;
use std::path::{Path, PathBuf};

use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Wakes the tailing task when the watched file changes.
pub(crate) struct FileWatch {
    path: PathBuf,
    _inner: notify::RecommendedWatcher,
    events: mpsc::Receiver<()>,
}

impl Debug for FileWatch {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("FileWatch")
            .field("path", &self.path)
            .finish()
    }
}

impl FileWatch {
    /// Starts watching `path`, which must exist.
    pub fn new(path: impl AsRef<Path>) -> notify::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (tx, rx) = mpsc::channel(1);

        let mut inner = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    EventKind::Any | EventKind::Create(_) | EventKind::Modify(_)
                ) {
                    // A full channel already holds a pending wake-up, and a
                    // closed one means the watch is being dropped.
                    let _ = tx.try_send(());
                }
            }
        })?;

        inner.watch(&path, RecursiveMode::NonRecursive)?;

        Ok(FileWatch {
            path,
            _inner: inner,
            events: rx,
        })
    }

    /// Resolves once the file has changed since the last call.
    pub async fn changed(&mut self) {
        if self.events.recv().await.is_none() {
            future::pending::<()>().await;
        }
    }
}

/// Waits on `watch` if there is one, otherwise never resolves.
pub(crate) async fn changed(watch: &mut Option<FileWatch>) {
    match watch {
        Some(watch) => watch.changed().await,
        None => future::pending().await,
    }
}
