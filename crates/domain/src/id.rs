//! Extension unit identity.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Identity of one loaded extension unit: its lexically normalised source
/// path.
///
/// Cheap to clone; every log line about a unit carries it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(Arc<str>);

impl UnitId {
    /// Wrap an arbitrary name (used by tests and synthetic units).
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Identity derived from a source path. `.` segments are dropped and
    /// `..` folds into the segment before it, so spellings of the same path
    /// share one identity.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        Self::new(normalize(path).to_string_lossy())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lexical normalisation only; the filesystem is never consulted.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let folds = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if folds {
                    out.pop();
                } else if !matches!(
                    out.components().next_back(),
                    Some(Component::RootDir | Component::Prefix(_))
                ) {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
