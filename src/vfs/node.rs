//! Virtual tree nodes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AdminError, ConfigMap};

/// Node fields that property updates may touch.
pub const MUTABLE_PROPS: [&str; 7] = [
    "name", "source", "hidden", "forbid", "perm", "hide", "remove",
];

/// What a node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VfsNodeType {
    /// Backed by a real file or directory.
    Real,
    /// Pure grouping node without a source; always a directory.
    Virtual,
    /// Produced on the fly while resolving a uri inside a real directory.
    /// Never stored, never a mutation target.
    Temp,
}

/// One point of the virtual hierarchy.
///
/// Children are owned by their parent's `children` sequence. Keys this type
/// does not know are kept in `extra` so they survive a load/persist cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VfsNode {
    /// Explicit name; when absent the name comes from the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Real filesystem path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Ordered child nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<VfsNode>>,
    /// Not shown, but reachable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    /// Not reachable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forbid: Option<bool>,
    /// Permission descriptor, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perm: Option<Value>,
    /// Hide from directory listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide: Option<bool>,
    /// Marked for removal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove: Option<bool>,
    /// Unknown keys.
    #[serde(flatten)]
    pub extra: ConfigMap,
    #[serde(skip)]
    temp: bool,
}

impl VfsNode {
    /// Node for `source`, optionally named.
    pub fn new(source: Option<String>, name: Option<String>) -> Self {
        Self {
            name,
            source,
            ..Self::default()
        }
    }

    pub(crate) fn temp(source: PathBuf) -> Self {
        Self {
            source: Some(source.to_string_lossy().into_owned()),
            temp: true,
            ..Self::default()
        }
    }

    /// Kind of node.
    pub fn node_type(&self) -> VfsNodeType {
        if self.temp {
            VfsNodeType::Temp
        } else if self.source.is_some() {
            VfsNodeType::Real
        } else {
            VfsNodeType::Virtual
        }
    }

    /// Whether this is a transient node.
    #[inline]
    pub fn is_temp(&self) -> bool {
        self.temp
    }

    /// Name shown for the node: explicit name, else the source's last segment.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.source.as_deref().map(name_from_source).unwrap_or_default(),
        }
    }

    /// Whether the node acts as a directory without asking the filesystem.
    pub(crate) fn is_structural_dir(&self) -> bool {
        self.source.is_none() || self.children.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Whether the node can hold children: it has children, has no source,
    /// or its source is a real directory.
    pub fn is_directory(&self) -> bool {
        if self.is_structural_dir() {
            return true;
        }
        self.source
            .as_deref()
            .and_then(|s| std::fs::metadata(s).ok())
            .is_some_and(|m| m.is_dir())
    }

    /// Drop the explicit name when the source already yields it.
    pub fn drop_redundant_name(&mut self) {
        let derived = self.source.as_deref().map(name_from_source).unwrap_or_default();
        if self.name.as_deref() == Some(derived.as_str()) {
            self.name = None;
        }
    }

    /// [`drop_redundant_name`](Self::drop_redundant_name) over the whole subtree.
    pub fn normalize_names(&mut self) {
        self.drop_redundant_name();
        for child in self.children.iter_mut().flatten() {
            child.normalize_names();
        }
    }

    /// Index of the child shown as `name`.
    pub fn child_index(&self, name: &str) -> Option<usize> {
        self.children
            .as_ref()?
            .iter()
            .position(|c| c.display_name() == name)
    }

    /// Copy whitelisted properties from `props`. Null or empty string unsets.
    ///
    /// # Errors
    ///
    /// - [`AdminError::BadRequest`] if a value has the wrong shape
    pub fn apply_props(&mut self, props: &ConfigMap) -> Result<(), AdminError> {
        for key in MUTABLE_PROPS {
            let Some(value) = props.get(key) else {
                continue;
            };
            let value = match value {
                Value::Null => None,
                Value::String(s) if s.is_empty() => None,
                other => Some(other.clone()),
            };
            match key {
                "name" => self.name = parse(key, value)?,
                "source" => self.source = parse(key, value)?,
                "hidden" => self.hidden = parse(key, value)?,
                "forbid" => self.forbid = parse(key, value)?,
                "perm" => self.perm = value,
                "hide" => self.hide = parse(key, value)?,
                "remove" => self.remove = parse(key, value)?,
                _ => {}
            }
        }
        Ok(())
    }
}

fn parse<T: serde::de::DeserializeOwned>(
    key: &str,
    value: Option<Value>,
) -> Result<Option<T>, AdminError> {
    value
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| AdminError::BadRequest(format!("{key}: {e}")))
}

/// Last segment of a source path, accepting both separators.
pub fn name_from_source(source: &str) -> String {
    let trimmed = source.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        return source.to_string();
    }
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
        .to_string()
}

/// Uri path segments. `.` and empty segments are skipped; `None` if the
/// uri tries to climb with `..`.
pub(crate) fn uri_segments(uri: &str) -> Option<Vec<&str>> {
    let mut out = Vec::new();
    for seg in uri.split('/') {
        match seg {
            "" | "." => {}
            ".." => return None,
            s => out.push(s),
        }
    }
    Some(out)
}

/// Directory part of a uri: `/a/b` gives `/a`, `/a` gives `/`.
pub(crate) fn parent_uri(uri: &str) -> &str {
    let trimmed = uri.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &trimmed[..i],
    }
}

pub(crate) fn join_source(source: &str, rest: &[&str]) -> PathBuf {
    rest.iter().fold(Path::new(source).to_path_buf(), |p, seg| p.join(seg))
}
