//! Process-level settings: config file location and command-line overrides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "FSADMIN_CONFIG";

/// Config file used when neither a path nor the environment variable is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Window within which persist requests collapse into one write.
pub const DEFAULT_PERSIST_WINDOW: Duration = Duration::from_millis(100);

/// Pick the config file: explicit path, then `FSADMIN_CONFIG`, then `config.yaml`.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

/// Values given on the command line. They win over stored values and
/// defaults and never change for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    values: HashMap<String, Value>,
}

impl CliOverrides {
    /// No overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key=value` pairs. A bare `key` means `true`.
    ///
    /// Values stay strings; key casters turn them into typed values.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values = pairs
            .into_iter()
            .filter_map(|pair| {
                let pair = pair.as_ref();
                let (key, value) = match pair.split_once('=') {
                    Some((k, v)) => (k.trim(), Value::String(v.to_string())),
                    None => (pair.trim(), Value::Bool(true)),
                };
                (!key.is_empty()).then(|| (key.to_string(), value))
            })
            .collect();
        Self { values }
    }

    /// Add one override.
    pub fn insert(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Raw (uncast) override for `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Whether no override was given.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_path_wins() {
        assert_eq!(
            config_path(Some(Path::new("/etc/fs.yaml"))),
            PathBuf::from("/etc/fs.yaml")
        );
    }

    #[test]
    fn pairs_parse() {
        let o = CliOverrides::from_pairs(["port=8080", "debug", "name=a=b", "=x", ""]);
        assert_eq!(o.get("port"), Some(&json!("8080")));
        assert_eq!(o.get("debug"), Some(&json!(true)));
        assert_eq!(o.get("name"), Some(&json!("a=b")));
        assert_eq!(o.get(""), None);
    }

    #[test]
    fn insert_builds() {
        let o = CliOverrides::new().insert("k", 1);
        assert!(!o.is_empty());
        assert_eq!(o.get("k"), Some(&json!(1)));
    }
}
