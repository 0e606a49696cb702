//! Resolution of logical artifact identifiers to filesystem locations
//!
//! Bazel hands tests their data dependencies either as a directory tree
//! (`RUNFILES_DIR` / `TEST_SRCDIR`) or as a manifest file mapping logical
//! paths to real ones (`RUNFILES_MANIFEST_FILE`). Both are modelled here
//! behind [`ArtifactResolver`] so the workspace driver never cares which.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{HarnessError, Result};

/// Maps a logical identifier such as `my_repo/tools/defs.bzl` to a path.
pub trait ArtifactResolver: Send + Sync {
    fn resolve(&self, identifier: &str) -> Option<PathBuf>;

    /// Everything listed beneath the logical directory `identifier`, as
    /// `(path relative to identifier, real path)` pairs sorted by the
    /// relative path.
    ///
    /// Only resolvers without a real directory to point at (manifests) need
    /// this; [`resolve`](Self::resolve) answers for directory trees.
    fn entries_under(&self, _identifier: &str) -> Vec<(PathBuf, PathBuf)> {
        Vec::new()
    }
}

impl ArtifactResolver for HashMap<String, PathBuf> {
    fn resolve(&self, identifier: &str) -> Option<PathBuf> {
        self.get(identifier).cloned()
    }

    fn entries_under(&self, identifier: &str) -> Vec<(PathBuf, PathBuf)> {
        let prefix = format!("{}/", identifier.trim_end_matches('/'));
        let mut entries: Vec<_> = self
            .iter()
            .filter_map(|(logical, actual)| {
                let rest = logical.strip_prefix(&prefix)?;
                (!rest.is_empty()).then(|| (PathBuf::from(rest), actual.clone()))
            })
            .collect();
        entries.sort();
        entries
    }
}

/// The runfiles made available to the current process.
#[derive(Debug, Clone, Default)]
pub enum Runfiles {
    /// No runfiles were configured; nothing resolves.
    #[default]
    Unavailable,
    /// A directory tree laid out by logical path.
    Directory(PathBuf),
    /// Entries read from a manifest file.
    Manifest(HashMap<String, PathBuf>),
}

impl Runfiles {
    /// Load a manifest where each line is `<logical path> <real path>`.
    ///
    /// Blank lines are skipped. A line with no space maps the logical path
    /// to nothing and is ignored (Bazel writes those for empty files).
    pub fn from_manifest(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
        let entries = content
            .lines()
            .filter_map(|line| line.split_once(' '))
            .filter(|(logical, actual)| !logical.is_empty() && !actual.is_empty())
            .map(|(logical, actual)| (logical.to_string(), PathBuf::from(actual)))
            .collect();
        Ok(Runfiles::Manifest(entries))
    }
}

/// Identifiers are relative and never climb out of the runfiles root.
fn is_logical_path(identifier: &str) -> bool {
    Path::new(identifier)
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

impl ArtifactResolver for Runfiles {
    fn resolve(&self, identifier: &str) -> Option<PathBuf> {
        if !is_logical_path(identifier) {
            return None;
        }
        let resolved = match self {
            Runfiles::Unavailable => None,
            Runfiles::Directory(root) => Some(root.join(identifier)),
            Runfiles::Manifest(entries) => entries.resolve(identifier.trim_end_matches('/')),
        }?;
        resolved.exists().then_some(resolved)
    }

    fn entries_under(&self, identifier: &str) -> Vec<(PathBuf, PathBuf)> {
        match self {
            Runfiles::Manifest(entries) if is_logical_path(identifier) => {
                entries.entries_under(identifier)
            }
            _ => Vec::new(),
        }
    }
}
