//! Directory listing stream.
//!
//! [`DirLister::list`] returns a pull-based [`ListIter`] that reads one
//! directory level lazily and checks a [`CancellationToken`] before every
//! entry, so an aborted request stops the walk without an error.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::{AdminError, DirEntry, FileStats};

/// Enumerates drive roots (`C:`, `D:`, ...).
pub type DriveProbe = Arc<dyn Fn() -> std::io::Result<Vec<String>> + Send + Sync>;

/// Iterator over listed entries.
///
/// - Outer `Option` = "is there another entry, and are we still wanted?"
/// - Inner `Result` = "could this entry be read?"
///
/// Once the token is cancelled the iterator is exhausted for good.
pub struct ListIter {
    inner: Box<dyn Iterator<Item = Result<DirEntry, AdminError>> + Send + 'static>,
    cancel: CancellationToken,
    done: bool,
}

impl ListIter {
    /// Create from any compatible iterator.
    pub fn new<I>(iter: I, cancel: CancellationToken) -> Self
    where
        I: Iterator<Item = Result<DirEntry, AdminError>> + Send + 'static,
    {
        Self {
            inner: Box::new(iter),
            cancel,
            done: false,
        }
    }

    /// Collect all entries, short-circuiting on first error.
    pub fn collect_all(self) -> Result<Vec<DirEntry>, AdminError> {
        self.collect()
    }
}

impl Iterator for ListIter {
    type Item = Result<DirEntry, AdminError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.cancel.is_cancelled() {
            self.done = true;
            return None;
        }
        let item = self.inner.next();
        if item.is_none() {
            self.done = true;
        }
        item
    }
}

/// Produces listing streams for real directories or, on platforms with
/// drive letters, for the set of drives.
#[derive(Clone)]
pub struct DirLister {
    drives: Option<DriveProbe>,
}

impl Default for DirLister {
    fn default() -> Self {
        Self::new()
    }
}

impl DirLister {
    /// Lister for the current platform.
    pub fn new() -> Self {
        #[cfg(windows)]
        {
            Self::with_drives(windows_drives)
        }
        #[cfg(not(windows))]
        {
            Self { drives: None }
        }
    }

    /// Lister that answers a pathless request with `probe`'s drives.
    pub fn with_drives<F>(probe: F) -> Self
    where
        F: Fn() -> std::io::Result<Vec<String>> + Send + Sync + 'static,
    {
        Self {
            drives: Some(Arc::new(probe)),
        }
    }

    /// Whether pathless requests list drives.
    pub fn has_drives(&self) -> bool {
        self.drives.is_some()
    }

    /// Stream the immediate children of `path`, dotfiles included.
    ///
    /// Without a path, drives are listed when the platform has them;
    /// otherwise the working directory is listed. A path that is not a
    /// directory yields nothing. Links that cannot be followed are listed
    /// with their own stats. Other traversal errors are yielded as `Err`
    /// items.
    pub fn list(&self, path: Option<&str>, cancel: CancellationToken) -> ListIter {
        let path = path.filter(|p| !p.is_empty());
        match (path, &self.drives) {
            (None, Some(probe)) => ListIter::new(drive_entries(probe.clone()), cancel),
            (None, None) => ListIter::new(dir_entries(PathBuf::from(".")), cancel),
            (Some(path), _) => ListIter::new(dir_entries(normalize_drive(path)), cancel),
        }
    }
}

fn drive_entries(probe: DriveProbe) -> impl Iterator<Item = Result<DirEntry, AdminError>> + Send {
    std::iter::once(probe)
        .flat_map(|probe| match probe() {
            Ok(drives) => drives,
            Err(error) => {
                tracing::debug!(%error, "drive enumeration failed");
                Vec::new()
            }
        })
        .map(|name| Ok(DirEntry::drive(name)))
}

fn dir_entries(path: PathBuf) -> impl Iterator<Item = Result<DirEntry, AdminError>> + Send {
    WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_map(|item| match item {
            Ok(entry) => Some(match entry.metadata() {
                Ok(meta) => Ok(entry_from(entry.file_name(), &meta)),
                Err(error) => link_entry(entry.path()).ok_or_else(|| AdminError::from(error)),
            }),
            Err(error) if is_not_a_directory(&error) => None,
            Err(error) => Some(
                error
                    .path()
                    .filter(|_| error.depth() > 0)
                    .and_then(link_entry)
                    .ok_or_else(|| AdminError::from(error)),
            ),
        })
}

fn entry_from(name: &OsStr, meta: &std::fs::Metadata) -> DirEntry {
    DirEntry::from_stats(name.to_string_lossy(), &FileStats::from_metadata(meta))
}

/// Entry for a link that cannot be followed (dangling or looping), from
/// the target's stats when reachable, else the link's own.
fn link_entry(path: &Path) -> Option<DirEntry> {
    let name = path.file_name()?;
    let meta = std::fs::metadata(path)
        .or_else(|_| std::fs::symlink_metadata(path))
        .ok()?;
    tracing::debug!(path = %path.display(), "listing unfollowable link");
    Some(entry_from(name, &meta))
}

fn is_not_a_directory(error: &walkdir::Error) -> bool {
    error
        .io_error()
        .is_some_and(|e| e.kind() == std::io::ErrorKind::NotADirectory)
}

/// `C:` names the drive's current directory on Windows; list its root.
fn normalize_drive(path: &str) -> PathBuf {
    let bytes = path.as_bytes();
    if bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return PathBuf::from(format!("{path}/"));
    }
    PathBuf::from(path)
}

#[cfg(windows)]
fn windows_drives() -> std::io::Result<Vec<String>> {
    Ok((b'A'..=b'Z')
        .map(|c| format!("{}:", c as char))
        .filter(|d| std::path::Path::new(&format!("{d}\\")).exists())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntryKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn lists_files_dirs_and_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "abc").unwrap();
        std::fs::write(dir.path().join(".hidden"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/deep.txt"), "").unwrap();

        let lister = DirLister::new();
        let mut entries = lister
            .list(Some(&dir.path().to_string_lossy()), CancellationToken::new())
            .collect_all()
            .unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![".hidden", "a.txt", "sub"]);
        assert_eq!(entries[1].size, Some(3));
        assert_eq!(entries[1].kind, EntryKind::File);
        assert!(entries[2].is_dir());
    }

    #[test]
    fn file_path_ends_silently() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "abc").unwrap();

        let lister = DirLister::new();
        let entries: Vec<_> = lister
            .list(Some(&file.to_string_lossy()), CancellationToken::new())
            .collect();
        assert!(entries.is_empty());

        let below = file.join("x");
        let entries: Vec<_> = lister
            .list(Some(&below.to_string_lossy()), CancellationToken::new())
            .collect();
        assert!(entries.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn unfollowable_links_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "abc").unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("broken")).unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("selfloop")).unwrap();

        let mut names: Vec<_> = DirLister::new()
            .list(Some(&dir.path().to_string_lossy()), CancellationToken::new())
            .collect_all()
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "broken", "selfloop"]);
    }

    #[test]
    fn missing_path_propagates_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let result = DirLister::new()
            .list(Some(&missing.to_string_lossy()), CancellationToken::new())
            .collect_all();
        assert!(result.is_err());
    }

    #[test]
    fn cancellation_stops_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c", "d"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let cancel = CancellationToken::new();
        let mut iter = DirLister::new().list(Some(&dir.path().to_string_lossy()), cancel.clone());

        assert!(iter.next().unwrap().is_ok());
        cancel.cancel();
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn pathless_request_lists_drives_only() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let lister = DirLister::with_drives(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["C:".into(), "D:".into()])
        });

        let iter = lister.list(None, CancellationToken::new());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let entries = iter.collect_all().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(entries, vec![DirEntry::drive("C:"), DirEntry::drive("D:")]);
    }

    #[test]
    fn drive_enumeration_failure_ends_quietly() {
        let lister = DirLister::with_drives(|| Err(std::io::Error::other("wmic missing")));
        let entries: Vec<_> = lister.list(Some(""), CancellationToken::new()).collect();
        assert!(entries.is_empty());
    }

    #[test]
    fn bare_drive_letter_is_rooted() {
        assert_eq!(normalize_drive("C:"), PathBuf::from("C:/"));
        assert_eq!(normalize_drive("/tmp"), PathBuf::from("/tmp"));
    }

    #[test]
    fn list_iter_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<ListIter>();
    }
}
