//! # Virtual File Tree
//!
//! Maps uri paths onto real filesystem locations and virtual groupings.
//!
//! ## Storage
//!
//! The tree lives in the configuration store under [`VFS_KEY`]. The tree
//! subscribes to that key, so loading or reloading the store rebuilds it,
//! and every mutation writes the tree back with a partial set, which
//! schedules a coalesced persist.
//!
//! ## Resolution
//!
//! A uri is split into segments and followed from the root by display name.
//! When a segment matches no stored child but the current node has a real
//! source directory, resolution continues on disk and yields a temp node.
//! Temp nodes can be inspected but never mutated.
//!
//! ```rust
//! use fsadmin::{ConfigStore, MemoryBackend, Vfs};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), fsadmin::AdminError> {
//! let store = ConfigStore::builder(Arc::new(MemoryBackend::new())).build()?;
//! let vfs = Vfs::attach(store.clone());
//! store.load()?;
//!
//! vfs.add_child(None, None, Some("shared".into()))?;
//! assert!(vfs.resolve("/shared").is_some());
//! # Ok(())
//! # }
//! ```

mod node;
mod snapshot;

use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use serde_json::{Value, json};

use crate::config::lock;
use crate::{AdminError, ConfigDef, ConfigMap, ConfigStore, Subscription};
use node::{join_source, parent_uri, uri_segments};

pub use node::{MUTABLE_PROPS, VfsNode, VfsNodeType, name_from_source};
pub use snapshot::{AdminNode, SIZE_ERROR};

/// Config key holding the tree.
pub const VFS_KEY: &str = "vfs";

/// Status reported for a successfully removed uri.
pub const STATUS_OK: u16 = 0;

/// Handle to the process-wide tree. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Vfs {
    inner: Arc<VfsInner>,
}

struct VfsInner {
    root: RwLock<Option<VfsNode>>,
    store: ConfigStore,
    subscription: Mutex<Option<Subscription>>,
    write_back: Mutex<()>,
}

impl Drop for VfsInner {
    fn drop(&mut self) {
        if let Some(sub) = lock(&self.subscription).take() {
            sub.unsubscribe();
        }
    }
}

enum Resolved {
    Stored(Vec<usize>),
    Temp(VfsNode),
}

impl Vfs {
    /// Bind a tree to `store`'s [`VFS_KEY`].
    ///
    /// The key defaults to an empty virtual root. The tree is empty until
    /// the store loads.
    pub fn attach(store: ConfigStore) -> Self {
        let inner = Arc::new(VfsInner {
            root: RwLock::new(None),
            store: store.clone(),
            subscription: Mutex::new(None),
            write_back: Mutex::new(()),
        });
        let weak: Weak<VfsInner> = Arc::downgrade(&inner);
        let def = ConfigDef::with_default(json!({}));
        let sub = store.subscribe(VFS_KEY, Some(def), move |value, _| {
            if let Some(inner) = weak.upgrade() {
                inner.replace_root(value);
            }
        });
        *lock(&inner.subscription) = Some(sub);
        Self { inner }
    }

    /// Copy of the root node, if any.
    pub fn root(&self) -> Option<VfsNode> {
        self.inner.read().clone()
    }

    /// Node at `uri`, or `None` if some segment matches nothing.
    pub fn resolve(&self, uri: &str) -> Option<VfsNode> {
        let root = self.inner.read();
        let root = root.as_ref()?;
        match resolve_in(root, uri)? {
            Resolved::Stored(path) => node_at(root, &path).cloned(),
            Resolved::Temp(node) => Some(node),
        }
    }

    /// Update whitelisted properties of the node at `uri`.
    ///
    /// Null or empty-string values unset a property. A name the source
    /// already implies is dropped.
    ///
    /// # Errors
    ///
    /// - [`AdminError::NotFound`] if `uri` resolves to nothing
    /// - [`AdminError::Forbidden`] if `uri` resolves to a temp node
    /// - [`AdminError::BadRequest`] if a property has the wrong shape
    pub fn set_node_props(&self, uri: &str, props: &ConfigMap) -> Result<VfsNode, AdminError> {
        let updated = {
            let mut guard = self.inner.write();
            let root = guard.as_mut().ok_or_else(|| not_found(uri))?;
            let path = match resolve_in(root, uri) {
                None => return Err(not_found(uri)),
                Some(Resolved::Temp(_)) => return Err(forbidden(uri, "temporary node")),
                Some(Resolved::Stored(path)) => path,
            };
            let node = node_at_mut(root, &path)
                .ok_or_else(|| AdminError::Internal(format!("lost node at {uri}")))?;
            node.apply_props(props)?;
            node.drop_redundant_name();
            node.clone()
        };
        tracing::info!(uri, "vfs node updated");
        self.persist();
        Ok(updated)
    }

    /// Insert a node for `source` at the front of `under`'s children
    /// (the root when `under` is `None`).
    ///
    /// # Errors
    ///
    /// - [`AdminError::BadRequest`] if neither source nor name is given
    /// - [`AdminError::NotFound`] if `under` resolves to nothing
    /// - [`AdminError::Forbidden`] if `under` is a temp node or not a directory
    pub fn add_child(
        &self,
        under: Option<&str>,
        source: Option<String>,
        name: Option<String>,
    ) -> Result<(), AdminError> {
        if source.is_none() && name.is_none() {
            return Err(AdminError::BadRequest("source or name required".into()));
        }
        let under_uri = under.unwrap_or("/");
        {
            let mut guard = self.inner.write();
            let root = guard.as_mut().ok_or_else(|| not_found(under_uri))?;
            let path = match resolve_in(root, under_uri) {
                None => return Err(not_found(under_uri)),
                Some(Resolved::Temp(_)) => return Err(forbidden(under_uri, "invalid under")),
                Some(Resolved::Stored(path)) => path,
            };
            let parent = node_at_mut(root, &path)
                .ok_or_else(|| AdminError::Internal(format!("lost node at {under_uri}")))?;
            if !parent.is_directory() {
                return Err(forbidden(under_uri, "invalid under"));
            }
            parent
                .children
                .get_or_insert_with(Vec::new)
                .insert(0, VfsNode::new(source.clone(), name));
        }
        tracing::info!(under = under_uri, source = source.as_deref(), "vfs node added");
        self.persist();
        Ok(())
    }

    /// Remove each uri independently, returning one status per uri:
    /// [`STATUS_OK`], 400 (not a string), 404 (missing or temp),
    /// 403 (parent unresolvable) or 500 (parent without children).
    ///
    /// # Errors
    ///
    /// - [`AdminError::BadRequest`] if `uris` is not a list
    pub fn remove_nodes(&self, uris: &Value) -> Result<Vec<u16>, AdminError> {
        let uris = uris
            .as_array()
            .ok_or_else(|| AdminError::BadRequest("invalid uris".into()))?;
        let statuses: Vec<u16> = {
            let mut guard = self.inner.write();
            uris.iter()
                .map(|uri| match (uri.as_str(), guard.as_mut()) {
                    (None, _) => 400,
                    (Some(uri), None) => not_found(uri).status(),
                    (Some(uri), Some(root)) => remove_one(root, uri),
                })
                .collect()
        };
        let removed = statuses.iter().filter(|s| **s == STATUS_OK).count();
        if removed > 0 {
            tracing::info!(removed, failed = statuses.len() - removed, "vfs nodes removed");
            self.persist();
        }
        Ok(statuses)
    }

    /// Stats-enriched copy of the whole tree, or `None` without a root.
    ///
    /// Sibling subtrees are stat'ed concurrently. A failed stat shows up as
    /// size `-1` instead of failing the walk.
    pub async fn get_full_tree(&self) -> Option<AdminNode> {
        let root = self.root()?;
        Some(snapshot::walk(root).await)
    }

    /// Write the tree back into the store, dropping redundant names first.
    ///
    /// Write-backs are serialized: each snapshot reaches the store before
    /// the next one is taken, so an older tree never replaces a newer one.
    fn persist(&self) {
        let _write_back = lock(&self.inner.write_back);
        let value = {
            let mut guard = self.inner.write();
            guard.as_mut().map(|root| {
                root.normalize_names();
                serde_json::to_value(&*root)
            })
        };
        match value {
            Some(Ok(value)) => {
                let mut update = ConfigMap::new();
                update.insert(VFS_KEY.to_string(), value);
                self.inner.store.set(update, true);
            }
            Some(Err(error)) => tracing::error!(%error, "cannot serialize vfs"),
            None => {}
        }
    }
}

impl VfsInner {
    fn read(&self) -> RwLockReadGuard<'_, Option<VfsNode>> {
        self.root.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<VfsNode>> {
        self.root.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace_root(&self, value: &Value) {
        let root = match value {
            Value::Null => None,
            value => match serde_json::from_value::<VfsNode>(value.clone()) {
                Ok(root) => Some(root),
                Err(error) => {
                    tracing::warn!(%error, "invalid vfs in config, ignoring");
                    None
                }
            },
        };
        *self.write() = root;
    }
}

fn remove_one(root: &mut VfsNode, uri: &str) -> u16 {
    let path = match resolve_in(root, uri) {
        Some(Resolved::Stored(path)) => path,
        Some(Resolved::Temp(_)) | None => return 404,
    };
    let parent_path = match resolve_in(root, parent_uri(uri)) {
        Some(Resolved::Stored(p)) => p,
        Some(Resolved::Temp(_)) | None => return 403,
    };
    // the root has no parent list to be removed from
    let Some((&index, node_parent)) = path.split_last() else {
        return 403;
    };
    let Some(parent) = node_at_mut(root, &parent_path) else {
        return 403;
    };
    let Some(children) = parent.children.as_mut() else {
        return 500;
    };
    if node_parent != parent_path.as_slice() || index >= children.len() {
        return 404;
    }
    children.remove(index);
    STATUS_OK
}

fn resolve_in(root: &VfsNode, uri: &str) -> Option<Resolved> {
    let segments = uri_segments(uri)?;
    let mut path = Vec::with_capacity(segments.len());
    let mut node = root;
    for (i, seg) in segments.iter().enumerate() {
        if let Some(index) = node.child_index(seg) {
            path.push(index);
            node = &node.children.as_ref()?[index];
            continue;
        }
        let source = node.source.as_deref()?;
        let real = join_source(source, &segments[i..]);
        std::fs::metadata(&real).ok()?;
        return Some(Resolved::Temp(VfsNode::temp(real)));
    }
    Some(Resolved::Stored(path))
}

fn node_at<'a>(root: &'a VfsNode, path: &[usize]) -> Option<&'a VfsNode> {
    path.iter()
        .try_fold(root, |node, &i| node.children.as_ref()?.get(i))
}

fn node_at_mut<'a>(root: &'a mut VfsNode, path: &[usize]) -> Option<&'a mut VfsNode> {
    path.iter()
        .try_fold(root, |node, &i| node.children.as_mut()?.get_mut(i))
}

fn not_found(uri: &str) -> AdminError {
    AdminError::NotFound {
        uri: uri.to_string(),
    }
}

fn forbidden(uri: &str, reason: &'static str) -> AdminError {
    AdminError::Forbidden {
        uri: uri.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;

    fn tree(v: Value) -> VfsNode {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn resolve_follows_display_names() {
        let root = tree(json!({ "children": [
            { "name": "docs", "children": [{ "source": "/srv/readme.md" }] },
            { "source": "/data/photos" }
        ]}));
        assert!(matches!(resolve_in(&root, "/"), Some(Resolved::Stored(p)) if p.is_empty()));
        assert!(matches!(
            resolve_in(&root, "/docs/readme.md"),
            Some(Resolved::Stored(p)) if p == vec![0, 0]
        ));
        assert!(matches!(resolve_in(&root, "photos"), Some(Resolved::Stored(p)) if p == vec![1]));
        assert!(resolve_in(&root, "/nope").is_none());
        assert!(resolve_in(&root, "/docs/nope").is_none());
    }

    #[test]
    fn resolve_descends_into_real_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/file.txt"), "x").unwrap();
        let root = tree(json!({ "children": [
            { "name": "share", "source": dir.path().to_string_lossy() }
        ]}));

        match resolve_in(&root, "/share/sub/file.txt") {
            Some(Resolved::Temp(node)) => {
                assert!(node.is_temp());
                assert_eq!(node.display_name(), "file.txt");
            }
            _ => panic!("expected temp node"),
        }
        assert!(resolve_in(&root, "/share/sub/missing").is_none());
    }

    #[test]
    fn node_paths() {
        let mut root = tree(json!({ "children": [
            { "name": "a", "children": [{ "name": "b" }] }
        ]}));
        assert_eq!(node_at(&root, &[0, 0]).unwrap().display_name(), "b");
        assert!(node_at(&root, &[1]).is_none());
        node_at_mut(&mut root, &[0]).unwrap().hidden = Some(true);
        assert_eq!(root.children.as_ref().unwrap()[0].hidden, Some(true));
    }

    #[tokio::test]
    async fn empty_config_yields_virtual_root() {
        let store = ConfigStore::builder(Arc::new(MemoryBackend::new()))
            .build()
            .unwrap();
        let vfs = Vfs::attach(store.clone());
        assert!(vfs.root().is_none());
        store.load().unwrap();
        let root = vfs.root().unwrap();
        assert_eq!(root.node_type(), VfsNodeType::Virtual);
        assert!(root.children.is_none());
    }

    #[tokio::test]
    async fn concurrent_mutations_all_survive() {
        let store = ConfigStore::builder(Arc::new(MemoryBackend::new()))
            .build()
            .unwrap();
        let vfs = Vfs::attach(store.clone());
        store.load().unwrap();

        std::thread::scope(|s| {
            for t in 0..8 {
                let vfs = vfs.clone();
                s.spawn(move || {
                    for i in 0..10 {
                        vfs.add_child(None, None, Some(format!("n{t}-{i}"))).unwrap();
                    }
                });
            }
        });

        assert_eq!(vfs.root().unwrap().children.unwrap().len(), 80);
        let stored = store.get(VFS_KEY).unwrap();
        assert_eq!(stored["children"].as_array().unwrap().len(), 80);
    }

    #[tokio::test]
    async fn mutation_writes_back_into_store() {
        let store = ConfigStore::builder(Arc::new(MemoryBackend::new()))
            .build()
            .unwrap();
        let vfs = Vfs::attach(store.clone());
        store.load().unwrap();
        vfs.add_child(None, Some("/x".into()), None).unwrap();
        assert_eq!(
            store.get(VFS_KEY),
            Some(json!({ "children": [{ "source": "/x" }] }))
        );
        assert!(store.persist_pending());
    }
}
