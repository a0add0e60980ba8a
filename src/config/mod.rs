//! # Configuration Store
//!
//! Process-wide key/value configuration with defaults, casters, change
//! notification and coalesced persistence.
//!
//! ## Precedence
//!
//! The value reported for a key is, in order:
//!
//! 1. the command-line override ([`CliOverrides`]), cast by the key's caster
//! 2. the stored value
//! 3. the registered default
//!
//! A stored value equal to the default is deleted rather than stored, so the
//! persisted file only holds what differs from the defaults.
//!
//! ## Persistence
//!
//! Partial [`set`](ConfigStore::set) calls schedule a write. Writes run on a
//! background task that collapses bursts into one save; failures are logged
//! and never reach the caller. [`flush`](ConfigStore::flush) forces the
//! pending write for shutdown paths.
//!
//! ```rust
//! use fsadmin::{ConfigDef, ConfigStore, MemoryBackend};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), fsadmin::AdminError> {
//! let store = ConfigStore::builder(Arc::new(MemoryBackend::new())).build()?;
//! store.define("port", ConfigDef::with_default(80));
//! store.load()?;
//! assert_eq!(store.get("port"), Some(json!(80)));
//!
//! store.set_partial(json!({ "port": "8080" }));
//! assert_eq!(store.get("port"), Some(json!(8080)));
//! store.flush().await;
//! # Ok(())
//! # }
//! ```

mod backend;
mod definition;
mod persist;
mod settings;
mod watch;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::AdminError;
use persist::{Persister, SnapshotSource};

pub use backend::{ConfigBackend, MemoryBackend, YamlFileBackend};
pub use definition::{Caster, ConfigDef, number_caster};
pub use settings::{
    CONFIG_ENV, CliOverrides, DEFAULT_CONFIG_FILE, DEFAULT_PERSIST_WINDOW, config_path,
};
pub use watch::ConfigWatcher;

/// Key/value state as persisted.
pub type ConfigMap = serde_json::Map<String, Value>;

type Callback = Arc<dyn Fn(&Value, Option<&Value>) + Send + Sync>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Store
// ============================================================================

/// Handle to the configuration store. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: Mutex<StoreState>,
    observers: Mutex<Observers>,
    overrides: CliOverrides,
    backend: Arc<dyn ConfigBackend>,
    persister: Arc<Persister>,
}

#[derive(Default)]
struct StoreState {
    stored: ConfigMap,
    defs: HashMap<String, ConfigDef>,
    started: bool,
}

#[derive(Default)]
struct Observers {
    next_id: u64,
    by_key: HashMap<String, Vec<(u64, Callback)>>,
}

struct Change {
    key: String,
    new: Value,
    old: Option<Value>,
}

impl StoreState {
    fn stored_or_default(&self, key: &str) -> Option<Value> {
        self.stored
            .get(key)
            .cloned()
            .or_else(|| self.defs.get(key).and_then(|d| d.default_value.clone()))
    }

    fn reconcile(&mut self, key: &str, incoming: Option<&Value>) -> Option<Change> {
        let old = if self.started {
            self.stored_or_default(key)
        } else {
            self.stored.get(key).cloned()
        };
        let def = self.defs.get(key).cloned().unwrap_or_default();
        let value = incoming
            .cloned()
            .or_else(|| def.default_value.clone())
            .map(|v| def.cast(&v));
        if value == old {
            return None;
        }
        match &value {
            Some(v) if Some(v) != def.default_value.as_ref() => {
                self.stored.insert(key.to_string(), v.clone());
            }
            _ => {
                self.stored.remove(key);
            }
        }
        Some(Change {
            key: key.to_string(),
            new: value.unwrap_or(Value::Null),
            old,
        })
    }
}

impl SnapshotSource for StoreInner {
    fn snapshot(&self) -> ConfigMap {
        lock(&self.state).stored.clone()
    }

    fn backend(&self) -> Arc<dyn ConfigBackend> {
        self.backend.clone()
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.persister.shutdown();
    }
}

/// Builder for [`ConfigStore`].
pub struct ConfigStoreBuilder {
    backend: Arc<dyn ConfigBackend>,
    overrides: CliOverrides,
    window: Duration,
}

impl ConfigStoreBuilder {
    /// Command-line overrides for this process.
    pub fn overrides(mut self, overrides: CliOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Coalescing window for persistence.
    pub fn persist_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Create the store and spawn its persist task.
    ///
    /// Nothing is loaded yet; call [`ConfigStore::load`].
    ///
    /// # Errors
    ///
    /// - [`AdminError::Internal`] when called outside a tokio runtime
    pub fn build(self) -> Result<ConfigStore, AdminError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AdminError::Internal(format!("config store needs a tokio runtime: {e}")))?;
        let persister = Arc::new(Persister::new(self.window));
        let inner = Arc::new(StoreInner {
            state: Mutex::new(StoreState::default()),
            observers: Mutex::new(Observers::default()),
            overrides: self.overrides,
            backend: self.backend,
            persister: persister.clone(),
        });
        runtime.spawn(persister.run(Arc::downgrade(&inner)));
        Ok(ConfigStore { inner })
    }
}

impl ConfigStore {
    /// Start building a store persisting through `backend`.
    pub fn builder(backend: Arc<dyn ConfigBackend>) -> ConfigStoreBuilder {
        ConfigStoreBuilder {
            backend,
            overrides: CliOverrides::default(),
            window: DEFAULT_PERSIST_WINDOW,
        }
    }

    /// Register metadata for `key`. The last registration wins.
    ///
    /// Safe before or after [`load`](Self::load).
    pub fn define(&self, key: &str, def: ConfigDef) {
        lock(&self.inner.state)
            .defs
            .insert(key.to_string(), def.normalized());
    }

    /// Effective value: override, else stored, else default.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(raw) = self.inner.overrides.get(key) {
            return Some(self.cast_override(key, raw));
        }
        lock(&self.inner.state).stored_or_default(key)
    }

    /// Snapshot of defaults overlaid with stored values.
    ///
    /// When `only` is non-empty the result holds just those keys and `omit`
    /// is ignored; otherwise keys in `omit` are dropped. The result is an
    /// independent copy.
    pub fn get_all(&self, omit: &[&str], only: &[&str]) -> ConfigMap {
        let state = lock(&self.inner.state);
        let mut all: ConfigMap = state
            .defs
            .iter()
            .filter_map(|(k, d)| d.default_value.clone().map(|v| (k.clone(), v)))
            .collect();
        all.extend(state.stored.iter().map(|(k, v)| (k.clone(), v.clone())));
        drop(state);

        if only.is_empty() {
            all.retain(|k, _| !omit.contains(&k.as_str()));
        } else {
            all.retain(|k, _| only.contains(&k.as_str()));
        }
        all
    }

    /// Apply a batch of updates.
    ///
    /// Every key in `new_state` is reconciled: cast, compared with its
    /// previous value, stored (or deleted when equal to the default) and
    /// announced to subscribers if it changed.
    ///
    /// A full set (`partial == false`) also reconciles every stored or
    /// registered key missing from `new_state` against its default, then
    /// marks the store started. A partial set skips that pass and schedules
    /// a persist instead.
    pub fn set(&self, new_state: ConfigMap, partial: bool) {
        let changes = {
            let mut state = lock(&self.inner.state);
            let mut changes: Vec<Change> = new_state
                .iter()
                .filter_map(|(k, v)| state.reconcile(k, Some(v)))
                .collect();
            if !partial {
                let mut stale: Vec<String> = state
                    .stored
                    .keys()
                    .chain(state.defs.keys())
                    .filter(|k| !new_state.contains_key(k.as_str()))
                    .cloned()
                    .collect();
                stale.sort();
                stale.dedup();
                changes.extend(stale.iter().filter_map(|k| state.reconcile(k, None)));
                state.started = true;
            }
            changes
        };

        for change in &changes {
            self.notify(change);
        }
        if partial {
            self.inner.persister.request();
        }
    }

    /// Partial set from a JSON object. Non-object values are ignored.
    pub fn set_partial(&self, new_state: Value) {
        if let Value::Object(map) = new_state {
            self.set(map, true);
        }
    }

    /// Watch `key`.
    ///
    /// `def`, when given, is registered first. If the key has a command-line
    /// override the callback runs once with it and the returned handle is
    /// inert: overrides never change. Otherwise, once the store has loaded,
    /// the callback runs immediately with the current value (when there is
    /// one), and then again on every change with `(new, old)`.
    pub fn subscribe<F>(&self, key: &str, def: Option<ConfigDef>, callback: F) -> Subscription
    where
        F: Fn(&Value, Option<&Value>) + Send + Sync + 'static,
    {
        if let Some(def) = def {
            self.define(key, def);
        }
        if let Some(raw) = self.inner.overrides.get(key) {
            callback(&self.cast_override(key, raw), None);
            return Subscription::inert();
        }

        let callback: Callback = Arc::new(callback);
        let id = {
            let mut observers = lock(&self.inner.observers);
            observers.next_id += 1;
            let id = observers.next_id;
            observers
                .by_key
                .entry(key.to_string())
                .or_default()
                .push((id, callback.clone()));
            id
        };

        // registered first: a racing set is delivered, possibly twice
        let current = {
            let state = lock(&self.inner.state);
            if state.started {
                state.stored_or_default(key)
            } else {
                None
            }
        };
        if let Some(value) = current {
            callback(&value, None);
        }
        Subscription {
            target: Some((Arc::downgrade(&self.inner), key.to_string(), id)),
        }
    }

    /// Wait for the first available value of `key`, then unsubscribe.
    ///
    /// Returns `None` only if the store goes away first.
    pub async fn config_ready(&self, key: &str, def: Option<ConfigDef>) -> Option<Value> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let subscription = self.subscribe(key, def, move |value, _| {
            if let Some(tx) = lock(&tx).take() {
                let _ = tx.send(value.clone());
            }
        });
        let value = rx.await.ok();
        subscription.unsubscribe();
        value
    }

    /// Replace the whole state from the backend.
    ///
    /// Nothing persisted yet means an empty state. Used at startup and by
    /// [`ConfigWatcher`] when the file changes outside the process.
    ///
    /// # Errors
    ///
    /// Whatever the backend reports for unreadable or malformed content.
    pub fn load(&self) -> Result<(), AdminError> {
        let state = match self.inner.backend.load()? {
            Some(state) => {
                tracing::debug!(keys = state.len(), "config loaded");
                state
            }
            None => {
                tracing::info!("no config file, using defaults");
                ConfigMap::new()
            }
        };
        self.set(state, false);
        Ok(())
    }

    /// Schedule a coalesced persist.
    pub fn request_persist(&self) {
        self.inner.persister.request();
    }

    /// Whether a persist has been requested but not written yet.
    pub fn persist_pending(&self) -> bool {
        self.inner.persister.is_pending()
    }

    /// Write now if a persist is pending.
    pub async fn flush(&self) {
        self.inner.persister.write_now(self.inner.as_ref()).await;
    }

    fn cast_override(&self, key: &str, raw: &Value) -> Value {
        match lock(&self.inner.state).defs.get(key) {
            Some(def) => def.cast(raw),
            None => raw.clone(),
        }
    }

    fn notify(&self, change: &Change) {
        let callbacks: Vec<Callback> = lock(&self.inner.observers)
            .by_key
            .get(&change.key)
            .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();
        for callback in callbacks {
            callback(&change.new, change.old.as_ref());
        }
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("ConfigStore")
            .field("stored", &state.stored)
            .field("started", &state.started)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Handle returned by [`ConfigStore::subscribe`].
///
/// Dropping it keeps the subscription alive; call
/// [`unsubscribe`](Self::unsubscribe) to stop notifications.
#[must_use = "dropping the handle keeps the callback registered forever"]
pub struct Subscription {
    target: Option<(Weak<StoreInner>, String, u64)>,
}

impl Subscription {
    fn inert() -> Self {
        Self { target: None }
    }

    /// Whether this handle refers to a registered callback.
    pub fn is_active(&self) -> bool {
        self.target.is_some()
    }

    /// Remove the callback.
    pub fn unsubscribe(self) {
        let Some((store, key, id)) = self.target else {
            return;
        };
        let Some(store) = store.upgrade() else {
            return;
        };
        let mut observers = lock(&store.observers);
        if let Some(list) = observers.by_key.get_mut(&key) {
            list.retain(|(other, _)| *other != id);
            if list.is_empty() {
                observers.by_key.remove(&key);
            }
        }
    }
}
