//! Common types used throughout davsync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A path relative to a tree root, slash-separated on every platform.
///
/// The empty path is the root itself. A `RelPath` never starts or ends with
/// a slash and never contains `.` or `..` components, so the same value can
/// address an entry in the local tree and in the remote tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelPath(String);

impl RelPath {
    /// The tree root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parse a slash-separated path string.
    ///
    /// Leading and trailing slashes are stripped, so `"/docs/a.txt"`,
    /// `"docs/a.txt"` and `"docs/a.txt/"` all parse to the same path.
    /// `""` and `"/"` parse to the root.
    ///
    /// # Errors
    /// - Empty components (`"a//b"`)
    /// - `.` or `..` components
    /// - Backslash separators
    pub fn parse(path: &str) -> crate::Result<Self> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        if trimmed.contains('\\') {
            return Err(crate::Error::InvalidConfig(format!(
                "path must use '/' separators: {path}"
            )));
        }
        for comp in trimmed.split('/') {
            if comp.is_empty() {
                return Err(crate::Error::InvalidConfig(format!(
                    "path has an empty component: {path}"
                )));
            }
            if comp == "." || comp == ".." {
                return Err(crate::Error::InvalidConfig(format!(
                    "path may not contain '.' or '..': {path}"
                )));
            }
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Whether this is the tree root.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The path as a slash-separated string; empty for the root.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Append a single child component.
    pub fn join(&self, name: &str) -> Self {
        if self.0.is_empty() {
            Self(name.to_string())
        } else {
            Self(format!("{}/{}", self.0, name))
        }
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// The final component, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.rsplit('/').next().unwrap_or(&self.0))
        }
    }

    /// Map onto the local filesystem below `root`, using the host's
    /// separator.
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        if !self.0.is_empty() {
            for comp in self.0.split('/') {
                out.push(comp);
            }
        }
        out
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
