//! Filesystem notification source backed by `notify`.
//!
//! notify invokes its handler on its own thread; the handler translates each
//! [`notify::Event`] into create/modify calls on a [`FileEventSink`] (the
//! [`Detector`](super::Detector) in production). Only creations, modifications
//! and renames into the watched tree are forwarded. Removals are ignored.

use camino::{Utf8Path, Utf8PathBuf};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Failed to initialize watcher: {0}")]
    Init(#[source] notify::Error),

    #[error("Failed to watch {path}: {source}")]
    Watch {
        path: Utf8PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Receiver of filesystem notifications
pub trait FileEventSink: Send + Sync {
    fn on_create(&self, path: &Path, is_directory: bool);
    fn on_modify(&self, path: &Path, is_directory: bool);
}

/// Route one notify event to the sink.
pub fn dispatch_event(sink: &dyn FileEventSink, event: &Event) {
    match &event.kind {
        EventKind::Create(kind) => {
            for path in &event.paths {
                let is_directory = matches!(kind, CreateKind::Folder) || path.is_dir();
                sink.on_create(path, is_directory);
            }
        }
        // Destination side of a rename: the file is new to the watched tree
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in &event.paths {
                sink.on_create(path, path.is_dir());
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let Some(to) = event.paths.get(1) {
                sink.on_create(to, to.is_dir());
            }
        }
        // Backends that cannot tell the two sides apart: keep paths that still exist
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
            for path in event.paths.iter().filter(|p| p.exists()) {
                sink.on_create(path, path.is_dir());
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => {}
        EventKind::Modify(_) => {
            for path in &event.paths {
                sink.on_modify(path, path.is_dir());
            }
        }
        _ => {}
    }
}

/// An armed directory subscription. Dropping it stops notifications.
pub struct FsWatcher {
    watcher: RecommendedWatcher,
    root: Utf8PathBuf,
}

impl FsWatcher {
    /// Subscribe to changes under `root` and forward them to `sink`.
    pub fn start(
        root: &Utf8Path,
        recursive: bool,
        sink: Arc<dyn FileEventSink>,
    ) -> Result<Self, WatcherError> {
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => dispatch_event(sink.as_ref(), &event),
                Err(e) => warn!("Filesystem watcher error: {}", e),
            }
        })
        .map_err(WatcherError::Init)?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        watcher
            .watch(root.as_std_path(), mode)
            .map_err(|source| WatcherError::Watch {
                path: root.to_path_buf(),
                source,
            })?;

        info!("Filesystem watcher started on {} (recursive: {})", root, recursive);

        Ok(Self {
            watcher,
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Unsubscribe and release the watcher
    pub fn stop(mut self) {
        if let Err(e) = self.watcher.unwatch(self.root.as_std_path()) {
            warn!("Failed to unwatch {}: {}", self.root, e);
        }
        info!("Filesystem watcher stopped on {}", self.root);
    }
}

impl std::fmt::Debug for FsWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsWatcher").field("root", &self.root).finish()
    }
}
