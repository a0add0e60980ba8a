//! Persistence backends for the configuration store.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde_json::Value;

use super::{ConfigMap, lock};
use crate::AdminError;

/// Storage primitive behind a [`ConfigStore`](super::ConfigStore).
///
/// A backend reads and writes the whole key/value state at once. It knows
/// nothing about defaults, casters or subscribers.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: saves run on a blocking worker
/// thread while loads may be triggered from a file watcher thread.
///
/// # Object Safety
///
/// This trait is object-safe and is used as `Arc<dyn ConfigBackend>`.
pub trait ConfigBackend: Send + Sync {
    /// Read the persisted state.
    ///
    /// Returns `Ok(None)` when nothing has been persisted yet.
    ///
    /// # Errors
    ///
    /// - [`AdminError::Io`] if the storage exists but cannot be read
    /// - [`AdminError::Deserialization`] if the content is not a key/value mapping
    fn load(&self) -> Result<Option<ConfigMap>, AdminError>;

    /// Replace the persisted state with `state`.
    ///
    /// # Errors
    ///
    /// - [`AdminError::Io`] if the storage cannot be written
    /// - [`AdminError::Serialization`] if the state cannot be encoded
    fn save(&self, state: &ConfigMap) -> Result<(), AdminError>;
}

// ============================================================================
// YAML file
// ============================================================================

/// Human-editable YAML file backend.
///
/// An empty state is written as an empty file rather than `{}`.
#[derive(Debug, Clone)]
pub struct YamlFileBackend {
    path: PathBuf,
}

impl YamlFileBackend {
    /// Backend reading and writing the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file this backend persists to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encode a state the way it is written to disk.
    pub fn encode(state: &ConfigMap) -> Result<String, AdminError> {
        let text = serde_yaml_ng::to_string(state)
            .map_err(|e| AdminError::Serialization(e.to_string()))?;
        if text.trim() == "{}" {
            return Ok(String::new());
        }
        Ok(text)
    }

    /// Decode file content. Blank or null documents decode to an empty state.
    pub fn decode(text: &str) -> Result<ConfigMap, AdminError> {
        if text.trim().is_empty() {
            return Ok(ConfigMap::new());
        }
        let value: Value = serde_yaml_ng::from_str(text)
            .map_err(|e| AdminError::Deserialization(e.to_string()))?;
        match value {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(ConfigMap::new()),
            other => Err(AdminError::Deserialization(format!(
                "expected a mapping at top level, found {other}"
            ))),
        }
    }
}

impl ConfigBackend for YamlFileBackend {
    fn load(&self) -> Result<Option<ConfigMap>, AdminError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Self::decode(&text).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AdminError::io("read config", &self.path, e)),
        }
    }

    fn save(&self, state: &ConfigMap) -> Result<(), AdminError> {
        let text = Self::encode(state)?;
        std::fs::write(&self.path, text).map_err(|e| AdminError::io("write config", &self.path, e))
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Backend keeping the persisted state in memory.
///
/// Counts writes and can be told to fail them, which makes it handy when
/// embedding the store without a file.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<Option<ConfigMap>>,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryBackend {
    /// Empty backend: the first load reports nothing persisted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that loads `state`.
    pub fn with_state(state: ConfigMap) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            ..Self::default()
        }
    }

    /// Last saved (or initial) state.
    pub fn contents(&self) -> Option<ConfigMap> {
        lock(&self.state).clone()
    }

    /// Replace the state as an external editor would.
    pub fn replace(&self, state: ConfigMap) {
        *lock(&self.state) = Some(state);
    }

    /// Number of successful saves.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl ConfigBackend for MemoryBackend {
    fn load(&self) -> Result<Option<ConfigMap>, AdminError> {
        Ok(lock(&self.state).clone())
    }

    fn save(&self, state: &ConfigMap) -> Result<(), AdminError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AdminError::io(
                "write config",
                "<memory>",
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            ));
        }
        *lock(&self.state) = Some(state.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> ConfigMap {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn empty_state_encodes_to_empty_text() {
        assert_eq!(YamlFileBackend::encode(&ConfigMap::new()).unwrap(), "");
    }

    #[test]
    fn blank_and_null_documents_decode_empty() {
        assert!(YamlFileBackend::decode("").unwrap().is_empty());
        assert!(YamlFileBackend::decode("  \n").unwrap().is_empty());
        assert!(YamlFileBackend::decode("~\n").unwrap().is_empty());
    }

    #[test]
    fn non_mapping_document_is_rejected() {
        let err = YamlFileBackend::decode("- a\n- b\n").unwrap_err();
        assert!(matches!(err, AdminError::Deserialization(_)));
    }

    #[test]
    fn yaml_file_missing_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = YamlFileBackend::new(dir.path().join("config.yaml"));
        assert!(backend.load().unwrap().is_none());
    }

    #[test]
    fn yaml_file_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let backend = YamlFileBackend::new(dir.path().join("config.yaml"));
        let state = map(json!({ "port": 8080, "vfs": { "children": [{ "source": "/data" }] } }));
        backend.save(&state).unwrap();

        let text = std::fs::read_to_string(backend.path()).unwrap();
        assert!(text.contains("port: 8080"));
        assert_eq!(backend.load().unwrap(), Some(state));
    }

    #[test]
    fn yaml_file_empty_state_writes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = YamlFileBackend::new(dir.path().join("config.yaml"));
        backend.save(&ConfigMap::new()).unwrap();
        assert_eq!(std::fs::read_to_string(backend.path()).unwrap(), "");
        assert_eq!(backend.load().unwrap(), Some(ConfigMap::new()));
    }

    #[test]
    fn memory_backend_counts_and_fails_writes() {
        let backend = MemoryBackend::new();
        assert!(backend.load().unwrap().is_none());

        backend.save(&map(json!({ "a": 1 }))).unwrap();
        assert_eq!(backend.writes(), 1);

        backend.set_failing(true);
        assert!(backend.save(&ConfigMap::new()).is_err());
        assert_eq!(backend.writes(), 1);
        assert_eq!(backend.contents(), Some(map(json!({ "a": 1 }))));
    }

    #[test]
    fn backend_is_object_safe() {
        fn _check(_: &dyn ConfigBackend) {}
    }
}
