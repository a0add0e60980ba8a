//! Core types shared by the tree walk and the listing stream.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Kind of a listed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file (or anything that is not a directory).
    File,
    /// Directory.
    Directory,
    /// Drive root, only produced on platforms with drive letters.
    Drive,
}

/// Filesystem stats for one real path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStats {
    /// Size in bytes.
    pub size: u64,
    /// Creation time, when the platform reports one.
    pub created: Option<SystemTime>,
    /// Last modification time.
    pub modified: Option<SystemTime>,
    /// Whether the path is a directory.
    pub is_dir: bool,
}

impl FileStats {
    /// Extract the fields we report from `std::fs::Metadata`.
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        Self {
            size: meta.len(),
            created: meta.created().ok(),
            modified: meta.modified().ok(),
            is_dir: meta.is_dir(),
        }
    }
}

/// A directory entry produced by the listing stream.
///
/// Transient: it lives only as long as the listing request that yielded it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (file name only, or the drive name like `C:`).
    pub name: String,
    /// Size in bytes; absent for drives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Creation time.
    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub created: Option<SystemTime>,
    /// Last modification time.
    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub modified: Option<SystemTime>,
    /// Directory, file or drive.
    pub kind: EntryKind,
}

impl DirEntry {
    /// Build an entry for a real path from its name and stats.
    pub fn from_stats(name: impl Into<String>, stats: &FileStats) -> Self {
        Self {
            name: name.into(),
            size: Some(stats.size),
            created: stats.created,
            modified: stats.modified,
            kind: if stats.is_dir {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
        }
    }

    /// Build an entry for a drive root.
    pub fn drive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            created: None,
            modified: None,
            kind: EntryKind::Drive,
        }
    }

    /// Returns `true` if this entry is a directory.
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Serde support for optional `SystemTime` values as RFC 3339 strings.
pub(crate) mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::SystemTime;

    pub fn serialize<S>(time: &Option<SystemTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match time {
            Some(t) => serializer.serialize_str(&DateTime::<Utc>::from(*t).to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<SystemTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(SystemTime::from)
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn entry_kind_from_stats() {
        let stats = FileStats {
            size: 10,
            created: None,
            modified: None,
            is_dir: true,
        };
        let entry = DirEntry::from_stats("docs", &stats);
        assert!(entry.is_dir());
        assert_eq!(entry.size, Some(10));
    }

    #[test]
    fn drive_entry_has_no_stats() {
        let entry = DirEntry::drive("C:");
        assert_eq!(entry.kind, EntryKind::Drive);
        assert!(entry.size.is_none());
        assert!(!entry.is_dir());
    }

    #[test]
    fn entry_serializes_timestamps_as_rfc3339() {
        let entry = DirEntry {
            name: "a.txt".into(),
            size: Some(3),
            created: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(86_400)),
            modified: None,
            kind: EntryKind::File,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["created"], "1970-01-02T00:00:00+00:00");
        assert!(json.get("modified").is_none());
        assert_eq!(json["kind"], "file");

        let back: DirEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EntryKind>();
        assert_send_sync::<FileStats>();
        assert_send_sync::<DirEntry>();
    }
}
