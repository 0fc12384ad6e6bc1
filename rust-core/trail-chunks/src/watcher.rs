// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore chunks - Chunk directory watcher
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Reports chunk files appearing in or disappearing from the chunk directory,
// whether this process wrote them or another one did. When the platform
// drops notifications the watcher asks for a full rescan instead.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::chunk_file::chunk_id_of;
use crate::error::ChunkResult;

/// A change in the chunk directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderEvent {
    /// A chunk file now exists at this path.
    Appeared(PathBuf),
    /// The chunk file at this path is gone.
    Disappeared(PathBuf),
    /// Notifications were lost; re-list the directory.
    Rescan,
}

/// Turn one notification into folder events for chunk files.
pub fn classify(event: &Event) -> Vec<FolderEvent> {
    if event.need_rescan() {
        return vec![FolderEvent::Rescan];
    }
    match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(_) => event
            .paths
            .iter()
            .filter(|path| chunk_id_of(path).is_some())
            .map(|path| {
                if path.is_file() {
                    FolderEvent::Appeared(path.clone())
                } else {
                    FolderEvent::Disappeared(path.clone())
                }
            })
            .collect(),
        EventKind::Other => vec![FolderEvent::Rescan],
        _ => Vec::new(),
    }
}

/// Background watch on one directory. Stops when dropped.
pub struct ChunkWatcher {
    watcher: Option<RecommendedWatcher>,
    thread: Option<JoinHandle<()>>,
    dir: PathBuf,
}

impl ChunkWatcher {
    /// Start watching `dir`, calling `handler` from a background thread for
    /// every change.
    pub fn spawn<F>(dir: &Path, handler: F) -> ChunkResult<Self>
    where
        F: Fn(FolderEvent) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(tx, Config::default())?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        let thread = thread::Builder::new()
            .name("trail-chunk-watch".to_string())
            .spawn(move || {
                // Ends once the watcher, and with it the sender, is dropped.
                for received in rx {
                    match received {
                        Ok(event) => {
                            for folder_event in classify(&event) {
                                debug!(event = ?folder_event, "Chunk directory changed");
                                handler(folder_event);
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "Chunk directory watch error; rescanning");
                            handler(FolderEvent::Rescan);
                        }
                    }
                }
            })?;

        info!(dir = %dir.display(), "Watching chunk directory");
        Ok(Self {
            watcher: Some(watcher),
            thread: Some(thread),
            dir: dir.to_path_buf(),
        })
    }

    /// The watched directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stop watching and wait for the listener thread to finish.
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(err) = watcher.unwatch(&self.dir) {
                debug!(error = %err, "Unwatching chunk directory failed");
            }
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Chunk directory listener panicked");
            }
        }
    }
}

impl Drop for ChunkWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ChunkWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkWatcher")
            .field("dir", &self.dir)
            .field("running", &self.thread.is_some())
            .finish()
    }
}
