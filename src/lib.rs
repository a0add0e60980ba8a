//! # fsadmin
//!
//! Administrative core of a file-serving daemon: a persisted **configuration
//! store** and the **virtual file tree** it holds.
//!
//! ---
//!
//! ## Quick Start
//!
//! ```rust
//! use fsadmin::{Admin, ConfigDef, ConfigStore, MemoryBackend};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), fsadmin::AdminError> {
//! let store = ConfigStore::builder(Arc::new(MemoryBackend::new())).build()?;
//! let admin = Admin::with_store(store);
//! admin.config().load()?;
//!
//! // Settings: override > stored > default.
//! admin.config().define("port", ConfigDef::with_default(80));
//! assert_eq!(admin.config().get("port"), Some(json!(80)));
//!
//! // Tree: most recently added nodes come first.
//! admin.add_vfs(None, Some("/srv/music".into()), None)?;
//! admin.add_vfs(None, Some("/srv/video".into()), None)?;
//! let root = admin.vfs().root().unwrap();
//! assert_eq!(root.children.unwrap()[0].display_name(), "video");
//!
//! admin.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ---
//!
//! ## Core Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`ConfigStore`] | Settings with defaults, casters, subscriptions and coalesced saves |
//! | [`ConfigBackend`] | Storage primitive: [`YamlFileBackend`], [`MemoryBackend`] |
//! | [`ConfigWatcher`] | Reloads the store when its file changes on disk |
//! | [`Vfs`] | Virtual tree: resolution, property updates, insertion, batch removal |
//! | [`DirLister`] | Cancellable, lazy directory listing ([`ListIter`]) |
//! | [`Admin`] | Everything above wired together for the admin transport |
//! | [`AdminError`] | Error type; [`AdminError::status`] gives the status code |
//!
//! ---
//!
//! ## Concurrency
//!
//! Handles are cheap clones around shared state. Mutations are short
//! synchronous steps; persistence runs on a tokio task, so stores must be
//! built inside a tokio runtime. Subscriber callbacks run on the thread
//! that made the change, after internal locks are released.

// Private modules
mod admin;
mod config;
mod error;
mod listing;
mod types;
mod vfs;

// Public re-exports - error types
pub use error::AdminError;

// Public re-exports - core types
pub use types::{DirEntry, EntryKind, FileStats};

// Public re-exports - configuration store
pub use config::{
    CONFIG_ENV, Caster, CliOverrides, ConfigBackend, ConfigDef, ConfigMap, ConfigStore,
    ConfigStoreBuilder, ConfigWatcher, DEFAULT_CONFIG_FILE, DEFAULT_PERSIST_WINDOW, MemoryBackend,
    Subscription, YamlFileBackend, config_path, number_caster,
};

// Public re-exports - virtual tree
pub use vfs::{
    AdminNode, MUTABLE_PROPS, SIZE_ERROR, STATUS_OK, VFS_KEY, Vfs, VfsNode, VfsNodeType,
    name_from_source,
};

// Public re-exports - listing
pub use listing::{DirLister, DriveProbe, ListIter};

// Public re-exports - admin surface
pub use admin::{Admin, AdminSettings};
