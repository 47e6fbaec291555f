//! File watching for live reload.
//!
//! Bridges `notify` filesystem events into the reload server's event loop.
//! Every change to any watched file collapses into the same
//! [`WatchEvent::Changed`] message; the server does not care which file it was.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Capacity of the change queue between the watcher thread and the server.
pub(crate) const CHANGE_QUEUE_CAPACITY: usize = 100;

/// Message delivered to the server when a watched file changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    Changed,
}

/// Error setting up file watching.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to create file watcher: {0}")]
    Create(#[source] notify::Error),
    #[error("failed to watch {}: {source}", path.display())]
    Subscribe {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Ordered, de-duplicated set of absolute file paths to watch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WatchTargets {
    paths: Vec<PathBuf>,
}

impl WatchTargets {
    /// Build a target set, resolving relative paths against `base`.
    ///
    /// Order of first occurrence is kept; repeated paths are dropped.
    pub fn new<I, P>(paths: I, base: &Path) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut seen = HashSet::new();
        let paths = paths
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    base.join(p)
                }
            })
            .filter(|p| seen.insert(p.clone()))
            .collect();
        Self { paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Cloneable handle that injects change events into a running server.
#[derive(Clone, Debug)]
pub struct ChangeNotifier {
    tx: mpsc::Sender<WatchEvent>,
}

impl ChangeNotifier {
    pub(crate) fn new(tx: mpsc::Sender<WatchEvent>) -> Self {
        Self { tx }
    }

    /// Report that a watched file changed.
    ///
    /// Never blocks. A full queue already holds a pending change, so dropping
    /// the event loses nothing; a closed queue means the server has stopped.
    pub fn notify(&self) {
        let _ = self.tx.try_send(WatchEvent::Changed);
    }
}

/// Active filesystem subscriptions for a [`WatchTargets`] set.
///
/// Each existing target's parent directory is watched non-recursively and
/// events are filtered down to the target files. Watching the directory rather
/// than the file keeps the subscription alive when an editor or compiler
/// replaces the file by writing a temporary file and renaming it into place.
///
/// Dropping the bridge releases every subscription.
pub struct FileWatchBridge {
    watcher: Option<RecommendedWatcher>,
    watched: Vec<PathBuf>,
}

impl FileWatchBridge {
    /// Subscribe to changes for `targets`, forwarding them to `notifier`.
    ///
    /// Targets that do not exist yet are skipped with a warning; they are not
    /// picked up if created later.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform watcher cannot be created or a
    /// directory subscription fails.
    pub fn start(targets: &WatchTargets, notifier: ChangeNotifier) -> Result<Self, WatchError> {
        let watched: Vec<PathBuf> = targets
            .paths()
            .iter()
            .filter_map(|path| match path.canonicalize() {
                Ok(real) if real.is_file() => Some(real),
                Ok(_) => {
                    tracing::warn!(path = %path.display(), "Not a file, skipping watch");
                    None
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "File not found, skipping watch");
                    None
                }
            })
            .collect();

        if watched.is_empty() {
            return Ok(Self {
                watcher: None,
                watched,
            });
        }

        let filter: HashSet<PathBuf> = watched.iter().cloned().collect();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if is_content_change(&event.kind)
                        && event.paths.iter().any(|p| filter.contains(p))
                    {
                        tracing::debug!(paths = ?event.paths, kind = ?event.kind, "Watched file changed");
                        notifier.notify();
                    }
                }
                Err(e) => tracing::warn!(error = %e, "File watcher error"),
            }
        })
        .map_err(WatchError::Create)?;

        let directories: BTreeSet<&Path> = watched.iter().filter_map(|p| p.parent()).collect();
        for dir in directories {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|source| WatchError::Subscribe {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        for path in &watched {
            tracing::info!(path = %path.display(), "Watching file");
        }

        Ok(Self {
            watcher: Some(watcher),
            watched,
        })
    }

    /// Resolved paths of the files actually being watched.
    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }

    /// Release all subscriptions (consumes the bridge).
    pub fn stop(mut self) {
        self.watcher.take();
    }
}

/// Whether a `notify` event means the file content may differ now.
///
/// Creations and modifications (including a rename onto the target) count;
/// removals and accesses do not.
fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}
