//! # busscripts-adapter-watch
//!
//! Watch adapter: observes extension directories and files and reports the
//! first debounced change to a recognised source.
//!
//! The daemon reacts by exiting so that a supervisor restarts it with the
//! new sources; nothing here reloads units in place.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_mini::notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, DebouncedEventKind, Debouncer, new_debouncer};
use tokio::sync::mpsc;

/// Debounce window used by the daemon.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Errors specific to the watch adapter.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to start file watcher")]
    Init(#[source] notify_debouncer_mini::notify::Error),

    #[error("failed to watch {path}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify_debouncer_mini::notify::Error,
    },
}

/// First settled event whose path `recognizes` accepts.
pub fn first_relevant<'a, I, F>(events: I, recognizes: &F) -> Option<&'a Path>
where
    I: IntoIterator<Item = (&'a Path, &'a DebouncedEventKind)>,
    F: Fn(&Path) -> bool + ?Sized,
{
    events
        .into_iter()
        .find(|(path, kind)| matches!(kind, DebouncedEventKind::Any) && recognizes(path))
        .map(|(path, _)| path)
}

/// Reports changed sources on a channel while alive.
pub struct SourceWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
    changes: mpsc::UnboundedReceiver<PathBuf>,
}

impl SourceWatcher {
    /// Watch `dirs` recursively and `files` individually.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError`] when the watcher cannot start or a path cannot
    /// be watched (for example because it does not exist).
    pub fn start<F>(
        dirs: &[PathBuf],
        files: &[PathBuf],
        debounce: Duration,
        recognizes: F,
    ) -> Result<Self, WatchError>
    where
        F: Fn(&Path) -> bool + Send + 'static,
    {
        let (tx, changes) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let changed = first_relevant(
                        events.iter().map(|event| (event.path.as_path(), &event.kind)),
                        &recognizes,
                    );
                    if let Some(path) = changed {
                        if tx.send(path.to_path_buf()).is_err() {
                            tracing::debug!(path = %path.display(), "change ignored, watcher dropped");
                        }
                    }
                }
                Err(err) => tracing::warn!(%err, "file watcher error"),
            }
        })
        .map_err(WatchError::Init)?;

        let targets = dirs
            .iter()
            .map(|dir| (dir, RecursiveMode::Recursive))
            .chain(files.iter().map(|file| (file, RecursiveMode::NonRecursive)));
        for (path, mode) in targets {
            debouncer
                .watcher()
                .watch(path, mode)
                .map_err(|source| WatchError::Watch {
                    path: path.clone(),
                    source,
                })?;
            tracing::debug!(path = %path.display(), "watching");
        }

        Ok(Self {
            _debouncer: debouncer,
            changes,
        })
    }

    /// Wait for the next changed source.
    pub async fn changed(&mut self) -> Option<PathBuf> {
        self.changes.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_rhai(path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "rhai")
    }

    #[test]
    fn should_pick_first_recognised_settled_event() {
        let notes = PathBuf::from("scripts/notes.txt");
        let busy = PathBuf::from("scripts/busy.rhai");
        let lamp = PathBuf::from("scripts/lamp.rhai");
        let events = [
            (notes.as_path(), &DebouncedEventKind::Any),
            (busy.as_path(), &DebouncedEventKind::AnyContinuous),
            (lamp.as_path(), &DebouncedEventKind::Any),
        ];
        assert_eq!(first_relevant(events, &is_rhai), Some(lamp.as_path()));
    }

    #[test]
    fn should_ignore_unrecognised_files() {
        let notes = PathBuf::from("scripts/notes.txt");
        let events = [(notes.as_path(), &DebouncedEventKind::Any)];
        assert_eq!(first_relevant(events, &is_rhai), None);
    }

    #[tokio::test]
    async fn should_fail_on_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let result = SourceWatcher::start(&[missing], &[], DEFAULT_DEBOUNCE, is_rhai);
        assert!(matches!(result, Err(WatchError::Watch { .. })));
    }

    #[tokio::test]
    async fn should_watch_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = SourceWatcher::start(
            &[dir.path().to_path_buf()],
            &[],
            DEFAULT_DEBOUNCE,
            is_rhai,
        );
        assert!(result.is_ok());
    }
}
