//! Admin surface: the operations the admin transport invokes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    AdminError, AdminNode, CliOverrides, ConfigMap, ConfigStore, ConfigWatcher,
    DEFAULT_PERSIST_WINDOW, DirLister, ListIter, Vfs, VfsNode, YamlFileBackend, config_path,
};

/// How to open an [`Admin`].
#[derive(Debug, Clone)]
pub struct AdminSettings {
    /// Explicit config file; see [`config_path`] for the fallbacks.
    pub config_path: Option<PathBuf>,
    /// Command-line overrides.
    pub overrides: CliOverrides,
    /// Reload when the config file changes on disk.
    pub watch: bool,
    /// Coalescing window for persistence.
    pub persist_window: Duration,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            config_path: None,
            overrides: CliOverrides::default(),
            watch: true,
            persist_window: DEFAULT_PERSIST_WINDOW,
        }
    }
}

/// Config store, virtual tree and lister wired together.
pub struct Admin {
    store: ConfigStore,
    vfs: Vfs,
    lister: DirLister,
    watcher: Option<ConfigWatcher>,
}

impl Admin {
    /// Open the YAML config, load it and build the tree from it.
    ///
    /// # Errors
    ///
    /// - [`AdminError::Internal`] outside a tokio runtime
    /// - load errors for an unreadable or malformed config file
    /// - [`AdminError::Io`] if the watcher cannot start
    pub fn open(settings: AdminSettings) -> Result<Self, AdminError> {
        let path = config_path(settings.config_path.as_deref());
        tracing::info!(path = %path.display(), "opening config");
        let store = ConfigStore::builder(Arc::new(YamlFileBackend::new(&path)))
            .overrides(settings.overrides)
            .persist_window(settings.persist_window)
            .build()?;
        let mut admin = Self::with_store(store);
        admin.store.load()?;
        if settings.watch {
            admin.watcher = Some(ConfigWatcher::spawn(admin.store.clone(), path)?);
        }
        Ok(admin)
    }

    /// Wire a tree to an existing store. Loading is left to the caller.
    pub fn with_store(store: ConfigStore) -> Self {
        Self {
            vfs: Vfs::attach(store.clone()),
            store,
            lister: DirLister::new(),
            watcher: None,
        }
    }

    /// Replace the directory lister.
    pub fn lister(mut self, lister: DirLister) -> Self {
        self.lister = lister;
        self
    }

    /// The configuration store.
    pub fn config(&self) -> &ConfigStore {
        &self.store
    }

    /// The virtual tree.
    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    /// Full tree snapshot with filesystem stats.
    pub async fn get_vfs(&self) -> Option<AdminNode> {
        self.vfs.get_full_tree().await
    }

    /// Update node properties. See [`Vfs::set_node_props`].
    pub fn set_vfs(&self, uri: &str, props: &ConfigMap) -> Result<VfsNode, AdminError> {
        self.vfs.set_node_props(uri, props)
    }

    /// Add a node. See [`Vfs::add_child`].
    pub fn add_vfs(
        &self,
        under: Option<&str>,
        source: Option<String>,
        name: Option<String>,
    ) -> Result<(), AdminError> {
        self.vfs.add_child(under, source, name)
    }

    /// Remove nodes. See [`Vfs::remove_nodes`].
    pub fn del_vfs(&self, uris: &Value) -> Result<Vec<u16>, AdminError> {
        self.vfs.remove_nodes(uris)
    }

    /// Absolute working directory of the process.
    pub fn get_cwd(&self) -> Result<PathBuf, AdminError> {
        std::env::current_dir().map_err(|e| AdminError::io("current_dir", ".", e))
    }

    /// Stream a directory; cancel `cancel` when the request is aborted.
    pub fn ls(&self, path: Option<&str>, cancel: CancellationToken) -> ListIter {
        self.lister.list(path, cancel)
    }

    /// Whether the config file is watched for external edits.
    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Write pending config changes now.
    pub async fn shutdown(&self) {
        self.store.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn open_without_file_starts_empty_and_persists_on_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let admin = Admin::open(AdminSettings {
            config_path: Some(path.clone()),
            watch: false,
            ..AdminSettings::default()
        })
        .unwrap();

        assert!(!admin.is_watching());
        let root = admin.get_vfs().await.unwrap();
        assert!(root.folder);
        assert!(!path.exists());

        admin.add_vfs(None, Some("/srv/x".into()), None).unwrap();
        admin.shutdown().await;
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("/srv/x"));
    }

    #[tokio::test]
    async fn cwd_is_absolute() {
        let store = ConfigStore::builder(Arc::new(crate::MemoryBackend::new()))
            .build()
            .unwrap();
        let admin = Admin::with_store(store);
        assert!(admin.get_cwd().unwrap().is_absolute());
    }

    #[tokio::test]
    async fn del_vfs_requires_list() {
        let store = ConfigStore::builder(Arc::new(crate::MemoryBackend::new()))
            .build()
            .unwrap();
        let admin = Admin::with_store(store);
        admin.config().load().unwrap();
        let err = admin.del_vfs(&json!("/a")).unwrap_err();
        assert_eq!(err.status(), 400);
    }
}
