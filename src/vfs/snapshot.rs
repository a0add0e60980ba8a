//! Stats-enriched tree snapshots for the admin surface.

use std::time::SystemTime;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde::Serialize;
use serde_json::Value;

use super::VfsNode;
use crate::types::{FileStats, timestamp};
use crate::ConfigMap;

/// Size reported when a source cannot be stat'ed.
pub const SIZE_ERROR: i64 = -1;

/// One node of the snapshot returned by [`Vfs::get_full_tree`](super::Vfs::get_full_tree).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminNode {
    /// Display name.
    pub name: String,
    /// Whether the node acts as a directory.
    #[serde(rename = "type", serialize_with = "folder_tag", skip_serializing_if = "is_false")]
    pub folder: bool,
    /// Size of a file source, or [`SIZE_ERROR`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    /// Creation time of a file source.
    #[serde(rename = "ctime", with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub created: Option<SystemTime>,
    /// Modification time of a file source; omitted when equal to `created`.
    #[serde(rename = "mtime", with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub modified: Option<SystemTime>,
    /// Real filesystem path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// See [`VfsNode::hidden`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    /// See [`VfsNode::forbid`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forbid: Option<bool>,
    /// See [`VfsNode::perm`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perm: Option<Value>,
    /// See [`VfsNode::hide`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hide: Option<bool>,
    /// See [`VfsNode::remove`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove: Option<bool>,
    /// Unknown stored keys.
    #[serde(flatten)]
    pub extra: ConfigMap,
    /// Child snapshots, in stored order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<AdminNode>>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn folder_tag<S: serde::Serializer>(_: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str("folder")
}

/// `modified`, unless it names the same millisecond as `created`.
fn shown_mtime(created: Option<SystemTime>, modified: Option<SystemTime>) -> Option<SystemTime> {
    match (created.map(millis), modified.map(millis)) {
        (Some(c), Some(m)) if c == m => None,
        _ => modified,
    }
}

fn millis(time: SystemTime) -> i128 {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i128,
        Err(e) => -(e.duration().as_millis() as i128),
    }
}

pub(super) fn walk(node: VfsNode) -> BoxFuture<'static, AdminNode> {
    async move {
        let name = node.display_name();
        let stats = match node.source.as_deref() {
            Some(source) => Some(
                tokio::fs::metadata(source)
                    .await
                    .map(|m| FileStats::from_metadata(&m)),
            ),
            None => None,
        };
        let folder = node.is_structural_dir()
            || matches!(&stats, Some(Ok(s)) if s.is_dir);

        let (mut size, mut created, mut modified) = (None, None, None);
        if !folder {
            match stats {
                Some(Ok(s)) => {
                    size = Some(i64::try_from(s.size).unwrap_or(i64::MAX));
                    created = s.created;
                    modified = s.modified;
                }
                Some(Err(error)) => {
                    tracing::debug!(source = node.source.as_deref(), %error, "stat failed");
                    size = Some(SIZE_ERROR);
                }
                None => {}
            }
        }
        modified = shown_mtime(created, modified);

        let children = match node.children {
            Some(children) => Some(join_all(children.into_iter().map(walk)).await),
            None => None,
        };

        AdminNode {
            name,
            folder,
            size,
            created,
            modified,
            source: node.source,
            hidden: node.hidden,
            forbid: node.forbid,
            perm: node.perm,
            hide: node.hide,
            remove: node.remove,
            extra: node.extra,
            children,
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn tree(v: Value) -> VfsNode {
        serde_json::from_value(v).unwrap()
    }

    #[tokio::test]
    async fn file_source_gets_stats() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "hello").unwrap();

        let snap = walk(tree(json!({ "source": file.to_string_lossy() }))).await;
        assert_eq!(snap.name, "a.txt");
        assert!(!snap.folder);
        assert_eq!(snap.size, Some(5));
    }

    #[test]
    fn mtime_hidden_only_when_same_millisecond() {
        let ctime = SystemTime::UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let same = ctime + Duration::from_micros(400);
        let later = ctime + Duration::from_millis(5);

        assert_eq!(shown_mtime(Some(ctime), Some(ctime)), None);
        assert_eq!(shown_mtime(Some(ctime), Some(same)), None);
        assert_eq!(shown_mtime(Some(ctime), Some(later)), Some(later));
        assert_eq!(shown_mtime(None, Some(later)), Some(later));
        assert_eq!(shown_mtime(Some(ctime), None), None);
    }

    #[tokio::test]
    async fn distinct_mtime_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("old.txt");
        std::fs::write(&file, "x").unwrap();
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000);
        std::fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(mtime)
            .unwrap();

        let snap = walk(tree(json!({ "source": file.to_string_lossy() }))).await;
        assert_eq!(snap.modified, Some(mtime));
    }

    #[tokio::test]
    async fn missing_source_reports_error_size() {
        let snap = walk(tree(json!({ "source": "/definitely/not/here.bin" }))).await;
        assert_eq!(snap.size, Some(SIZE_ERROR));
        assert!(snap.created.is_none());
        assert!(!snap.folder);
    }

    #[tokio::test]
    async fn directories_have_no_stats() {
        let dir = tempfile::tempdir().unwrap();
        let snap = walk(tree(json!({ "children": [
            { "source": dir.path().to_string_lossy() },
            { "name": "group" }
        ]})))
        .await;
        assert!(snap.folder);
        let children = snap.children.unwrap();
        assert!(children.iter().all(|c| c.folder && c.size.is_none()));
        assert_eq!(children[1].name, "group");
    }

    #[tokio::test]
    async fn serialized_shape() {
        let snap = walk(tree(json!({ "name": "root", "hidden": true, "children": [] }))).await;
        let v = serde_json::to_value(&snap).unwrap();
        assert_eq!(v, json!({ "name": "root", "type": "folder", "hidden": true, "children": [] }));
    }
}
