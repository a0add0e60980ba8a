//! Reload the store when its file is edited outside the process.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};

use super::ConfigStore;
use crate::AdminError;

/// Watches the config file and calls [`ConfigStore::load`] on changes.
///
/// The parent directory is watched (non-recursively) so the file may be
/// created, replaced or deleted by editors. Stop watching by dropping it.
pub struct ConfigWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    path: PathBuf,
}

impl ConfigWatcher {
    /// Start watching `path` on behalf of `store`.
    ///
    /// # Errors
    ///
    /// - [`AdminError::BadRequest`] if `path` has no file name
    /// - [`AdminError::Io`] if the watcher cannot be created or attached
    pub fn spawn(store: ConfigStore, path: impl Into<PathBuf>) -> Result<Self, AdminError> {
        let path = path.into();
        let target: OsString = path
            .file_name()
            .ok_or_else(|| AdminError::BadRequest(format!("not a file: {}", path.display())))?
            .to_os_string();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let touched = events.iter().any(|event| {
                        !matches!(event.kind, EventKind::Access(_))
                            && event
                                .paths
                                .iter()
                                .any(|p| p.file_name() == Some(target.as_os_str()))
                    });
                    if touched {
                        tracing::debug!("config file changed, reloading");
                        if let Err(error) = store.load() {
                            tracing::warn!(%error, "config reload failed");
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        tracing::warn!(%error, "config watcher error");
                    }
                }
            },
        )
        .map_err(|e| AdminError::io("watch", &dir, std::io::Error::other(e)))?;

        debouncer
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| AdminError::io("watch", &dir, std::io::Error::other(e)))?;

        Ok(Self {
            _debouncer: debouncer,
            path,
        })
    }

    /// The watched config file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
