//! Error types for the admin layer.

use std::path::PathBuf;

/// Admin error type with contextual variants.
///
/// Variants follow the failure classes the admin transport reports:
/// not found, forbidden, bad request, internal, and I/O. Use
/// [`AdminError::status`] to obtain the numeric code for a variant.
///
/// # Examples
///
/// ```rust
/// use fsadmin::AdminError;
///
/// let err = AdminError::NotFound { uri: "/missing".into() };
/// assert_eq!(err.to_string(), "not found: /missing");
/// assert_eq!(err.status(), 404);
/// ```
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// A uri resolved to no node, or a required parent is unresolvable.
    #[error("not found: {uri}")]
    NotFound {
        /// The uri that could not be resolved.
        uri: String,
    },

    /// The target exists but cannot take this mutation.
    #[error("forbidden: {uri} ({reason})")]
    Forbidden {
        /// The uri of the rejected target.
        uri: String,
        /// Why the target was rejected.
        reason: &'static str,
    },

    /// Malformed input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// State that should be impossible was observed.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// I/O error with context.
    #[error("{operation} failed for {path}: {source}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// The path involved in the operation.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl AdminError {
    /// Wrap an I/O error with the operation and path that produced it.
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AdminError::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// HTTP-style status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            AdminError::NotFound { .. } => 404,
            AdminError::Forbidden { .. } => 403,
            AdminError::BadRequest(_) => 400,
            AdminError::Internal(_)
            | AdminError::Serialization(_)
            | AdminError::Deserialization(_)
            | AdminError::Io { .. } => 500,
        }
    }
}

impl From<std::io::Error> for AdminError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => AdminError::NotFound {
                uri: String::new(),
            },
            _ => AdminError::Io {
                operation: "io",
                path: PathBuf::new(),
                source: error,
            },
        }
    }
}

impl From<walkdir::Error> for AdminError {
    fn from(error: walkdir::Error) -> Self {
        let path = error.path().map(PathBuf::from).unwrap_or_default();
        match error.into_io_error() {
            Some(source) => AdminError::Io {
                operation: "read_dir",
                path,
                source,
            },
            None => AdminError::Internal(format!("filesystem loop at {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = AdminError::NotFound {
            uri: "/missing".into(),
        };
        assert_eq!(err.to_string(), "not found: /missing");
    }

    #[test]
    fn forbidden_display() {
        let err = AdminError::Forbidden {
            uri: "/a".into(),
            reason: "invalid under",
        };
        assert_eq!(err.to_string(), "forbidden: /a (invalid under)");
    }

    #[test]
    fn status_codes() {
        assert_eq!(AdminError::NotFound { uri: "/".into() }.status(), 404);
        assert_eq!(
            AdminError::Forbidden {
                uri: "/".into(),
                reason: "temp"
            }
            .status(),
            403
        );
        assert_eq!(AdminError::BadRequest("uris".into()).status(), 400);
        assert_eq!(AdminError::Internal("children".into()).status(), 500);
    }

    #[test]
    fn from_io_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        assert!(matches!(AdminError::from(io_err), AdminError::NotFound { .. }));
    }

    #[test]
    fn from_io_other() {
        let io_err = std::io::Error::other("test");
        let err = AdminError::from(io_err);
        assert!(matches!(err, AdminError::Io { .. }));
        assert_eq!(err.status(), 500);
    }
}
