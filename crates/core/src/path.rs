//! Workspace-relative sync path type and validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};

/// A normalized, workspace-relative file path.
///
/// Sync paths always use forward slashes and never contain absolute,
/// `..`, or `.` components, so they are safe to join onto a sync root
/// on any client and to use as metadata keys on the server.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SyncPath(String);

impl SyncPath {
    /// Parse and normalize a path string.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let normalized = path.replace('\\', "/");

        if normalized.is_empty() {
            return Err(crate::Error::InvalidPath("path cannot be empty".to_string()));
        }
        if normalized.starts_with('/') {
            return Err(crate::Error::InvalidPath(format!(
                "path must be relative: {path}"
            )));
        }
        if normalized.contains('\0') {
            return Err(crate::Error::InvalidPath(
                "path contains NUL byte".to_string(),
            ));
        }

        for component in Path::new(&normalized).components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(crate::Error::InvalidPath(format!(
                        "path contains unsafe component: {path}"
                    )));
                }
            }
        }

        // Collapse duplicate separators left over from normalization.
        let cleaned: String = normalized
            .split('/')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/");

        Ok(Self(cleaned))
    }

    /// Get the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The final path component (file name).
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Resolve against a local sync root.
    pub fn to_local(&self, root: &Path) -> std::path::PathBuf {
        root.join(&self.0)
    }
}

impl TryFrom<String> for SyncPath {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<SyncPath> for String {
    fn from(path: SyncPath) -> Self {
        path.0
    }
}

impl fmt::Debug for SyncPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncPath({})", self.0)
    }
}

impl fmt::Display for SyncPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
