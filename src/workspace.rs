//! Disposable workspaces for driving the build binary.
//!
//! A [`WorkspaceDriver`] owns one temporary directory for the lifetime of a
//! test. Files are staged into it, artifacts imported from runfiles, and
//! [`BazelCommand`]s are built with it as their default working directory.
//! The directory is removed on [`WorkspaceDriver::teardown`] or on drop.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::command::BazelCommand;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::fs_utils;
use crate::runfiles::ArtifactResolver;

const WORKSPACE_PREFIX: &str = "bazel-harness-";

/// An isolated workspace plus everything needed to run the binary in it.
pub struct WorkspaceDriver {
    dir: Option<TempDir>,
    root: PathBuf,
    bazel: PathBuf,
    runfiles: Arc<dyn ArtifactResolver>,
}

impl WorkspaceDriver {
    /// Allocate a fresh, empty workspace under the configured temp root.
    ///
    /// Fails with [`HarnessError::Environment`] if the temp root is missing
    /// or not writable.
    pub fn create(config: &HarnessConfig) -> Result<Self> {
        let tmp_root = config.tmp_root();
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(&tmp_root)
            .map_err(|e| {
                HarnessError::Environment(format!(
                    "cannot create workspace under '{}': {}",
                    tmp_root.display(),
                    e
                ))
            })?;
        let root = dir.path().to_path_buf();
        tracing::debug!(root = %root.display(), "created workspace");

        Ok(Self {
            dir: Some(dir),
            root,
            bazel: config.bazel_binary().to_path_buf(),
            runfiles: config.runfiles()?,
        })
    }

    /// Replace the artifact resolver used by the `copy_*_from_runfiles` calls.
    pub fn with_resolver(mut self, resolver: impl ArtifactResolver + 'static) -> Self {
        self.runfiles = Arc::new(resolver);
        self
    }

    /// Replace the build binary for commands created from now on.
    ///
    /// A relative path with a directory part is taken from the current
    /// directory, not from the workspace.
    pub fn with_bazel(mut self, bazel: impl Into<PathBuf>) -> Result<Self> {
        self.bazel = fs_utils::program_path(bazel.into())?;
        Ok(self)
    }

    /// Root of the workspace.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of `relative`, checked to stay inside the workspace.
    pub fn path(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        fs_utils::resolve_within(&self.root, relative.as_ref())
    }

    /// Write a text file, one `\n`-terminated line per item.
    ///
    /// Creates parent directories as needed and replaces an existing file.
    pub fn scratch_file<I, S>(&self, relative: impl AsRef<Path>, lines: I) -> Result<PathBuf>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let path = self.path(relative)?;
        fs_utils::write_file(&path, &fs_utils::join_lines(lines))?;
        tracing::debug!(path = %path.display(), "staged file");
        Ok(path)
    }

    /// Like [`scratch_file`](Self::scratch_file), then mark it executable.
    ///
    /// Where the platform has no executable bit only the content is written.
    pub fn scratch_executable_file<I, S>(
        &self,
        relative: impl AsRef<Path>,
        lines: I,
    ) -> Result<PathBuf>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let path = self.scratch_file(relative, lines)?;
        fs_utils::set_executable(&path)?;
        Ok(path)
    }

    /// Copy one runfile into the workspace at `destination`.
    pub fn copy_from_runfiles(
        &self,
        identifier: &str,
        destination: impl AsRef<Path>,
    ) -> Result<PathBuf> {
        let source = self
            .runfiles
            .resolve(identifier)
            .filter(|path| path.is_file())
            .ok_or_else(|| HarnessError::ArtifactNotFound(identifier.to_string()))?;
        let target = self.path(destination)?;
        fs_utils::copy_file(&source, &target)?;
        tracing::debug!(
            source = %source.display(),
            target = %target.display(),
            "copied runfile"
        );
        Ok(target)
    }

    /// Copy a runfiles directory tree into the workspace at `destination`.
    ///
    /// Structure and permission bits are preserved. With manifest runfiles
    /// every entry listed under `identifier` is copied to its logical place,
    /// wherever its real file lives. If copying fails part way, the files
    /// already copied stay where they are.
    pub fn copy_directory_from_runfiles(
        &self,
        identifier: &str,
        destination: impl AsRef<Path>,
    ) -> Result<PathBuf> {
        if let Some(source) = self.runfiles.resolve(identifier).filter(|path| path.is_dir()) {
            let target = self.path(destination)?;
            let copied = fs_utils::copy_tree(&source, &target)?;
            tracing::debug!(
                source = %source.display(),
                target = %target.display(),
                files = copied,
                "copied runfiles directory"
            );
            return Ok(target);
        }

        let entries = self.runfiles.entries_under(identifier);
        if entries.is_empty() {
            return Err(HarnessError::ArtifactNotFound(identifier.to_string()));
        }
        let target = self.path(destination)?;
        fs::create_dir_all(&target).map_err(|e| HarnessError::io(&target, e))?;
        let mut copied = 0;
        for (relative, actual) in &entries {
            let entry_target = fs_utils::resolve_within(&target, relative)?;
            if actual.is_dir() {
                copied += fs_utils::copy_tree(actual, &entry_target)?;
            } else {
                fs_utils::copy_file(actual, &entry_target)?;
                copied += 1;
            }
        }
        tracing::debug!(
            identifier,
            target = %target.display(),
            files = copied,
            "copied runfiles directory from manifest"
        );
        Ok(target)
    }

    /// Copy a runfiles directory to its own identifier minus `strip_prefix`.
    ///
    /// `("my_repo/tools", "my_repo")` lands in `tools/`.
    pub fn copy_directory_from_runfiles_stripped(
        &self,
        identifier: &str,
        strip_prefix: &str,
    ) -> Result<PathBuf> {
        let destination = Path::new(identifier)
            .strip_prefix(strip_prefix)
            .map_err(|_| HarnessError::InvalidPath(PathBuf::from(identifier)))?
            .to_path_buf();
        self.copy_directory_from_runfiles(identifier, destination)
    }

    /// A command running the build binary with `args` from the workspace root.
    pub fn bazel<I, S>(&self, args: I) -> BazelCommand
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        BazelCommand::new(&self.bazel, &self.root, args)
    }

    /// Remove the workspace. Failures are logged, never returned.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub fn teardown(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match dir.close() {
            Ok(()) => tracing::debug!(root = %self.root.display(), "removed workspace"),
            Err(e) => tracing::warn!(
                root = %self.root.display(),
                error = %e,
                "failed to remove workspace"
            ),
        }
    }
}

impl Drop for WorkspaceDriver {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runfiles::Runfiles;
    use std::collections::HashMap;

    fn config_in(tmp: &Path) -> HarnessConfig {
        HarnessConfig::with_properties([("harness.tmp_root", tmp.to_string_lossy().as_ref())])
            .unwrap()
    }

    #[test]
    fn test_create_allocates_empty_unique_dirs() {
        let tmp = TempDir::new().unwrap();
        let config = config_in(tmp.path());
        let a = WorkspaceDriver::create(&config).unwrap();
        let b = WorkspaceDriver::create(&config).unwrap();

        assert_ne!(a.root(), b.root());
        assert!(a.root().starts_with(tmp.path()));
        assert_eq!(fs::read_dir(a.root()).unwrap().count(), 0);
    }

    #[test]
    fn test_create_fails_without_temp_root() {
        let config = config_in(Path::new("/nonexistent/harness/tmp"));
        let err = WorkspaceDriver::create(&config).err().unwrap();
        assert!(matches!(err, HarnessError::Environment(_)), "{}", err);
    }

    #[test]
    fn test_scratch_file_round_trip_and_overwrite() {
        let tmp = TempDir::new().unwrap();
        let driver = WorkspaceDriver::create(&config_in(tmp.path())).unwrap();

        let path = driver
            .scratch_file("foo/BUILD", ["sh_test(name = \"bar\",", "srcs = [\"bar.sh\"])"])
            .unwrap();
        assert_eq!(path, driver.root().join("foo/BUILD"));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "sh_test(name = \"bar\",\nsrcs = [\"bar.sh\"])\n"
        );

        driver.scratch_file("foo/BUILD", [""]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "\n");
    }

    #[test]
    fn test_scratch_file_rejects_escape() {
        let tmp = TempDir::new().unwrap();
        let driver = WorkspaceDriver::create(&config_in(tmp.path())).unwrap();

        let err = driver.scratch_file("../escaped", ["x"]).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidPath(_)));
        assert!(!tmp.path().join("escaped").exists());
    }

    #[test]
    fn test_copy_from_resolver() {
        let tmp = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        fs::write(source.path().join("lib.jar"), b"\x50\x4b\x03\x04").unwrap();

        let mut map = HashMap::new();
        map.insert("repo/lib.jar".to_string(), source.path().join("lib.jar"));
        let driver = WorkspaceDriver::create(&config_in(tmp.path()))
            .unwrap()
            .with_resolver(map);

        let target = driver.copy_from_runfiles("repo/lib.jar", "java/lib.jar").unwrap();
        assert_eq!(fs::read(target).unwrap(), b"\x50\x4b\x03\x04");

        let err = driver.copy_from_runfiles("repo/other.jar", "x").unwrap_err();
        assert!(matches!(err, HarnessError::ArtifactNotFound(_)));
    }

    #[test]
    fn test_copy_directory_from_split_manifest() {
        let tmp = TempDir::new().unwrap();
        let source_tree = TempDir::new().unwrap();
        let output_tree = TempDir::new().unwrap();
        fs::write(source_tree.path().join("defs.bzl"), "defs").unwrap();
        fs::create_dir_all(output_tree.path().join("gen")).unwrap();
        fs::write(output_tree.path().join("gen/rules.bzl"), "rules").unwrap();
        // not listed in the manifest, so not a runfile
        fs::write(source_tree.path().join("stray.txt"), "stray").unwrap();

        let mut entries = HashMap::new();
        entries.insert(
            "repo/tools/defs.bzl".to_string(),
            source_tree.path().join("defs.bzl"),
        );
        entries.insert(
            "repo/tools/gen/rules.bzl".to_string(),
            output_tree.path().join("gen/rules.bzl"),
        );
        let driver = WorkspaceDriver::create(&config_in(tmp.path()))
            .unwrap()
            .with_resolver(Runfiles::Manifest(entries));

        let target = driver
            .copy_directory_from_runfiles("repo/tools", "tools")
            .unwrap();
        assert_eq!(target, driver.root().join("tools"));
        assert_eq!(fs::read_to_string(target.join("defs.bzl")).unwrap(), "defs");
        assert_eq!(
            fs::read_to_string(target.join("gen/rules.bzl")).unwrap(),
            "rules"
        );
        assert!(!target.join("stray.txt").exists());

        let err = driver
            .copy_directory_from_runfiles("repo/missing", "missing")
            .unwrap_err();
        assert!(matches!(err, HarnessError::ArtifactNotFound(_)));
    }

    #[test]
    fn test_runfiles_resolved_once_per_config() {
        let tmp = TempDir::new().unwrap();
        let manifest = tmp.path().join("MANIFEST");
        fs::write(&manifest, "repo/a /nowhere/a\n").unwrap();
        let config = HarnessConfig::with_properties([
            ("harness.tmp_root", tmp.path().to_string_lossy().as_ref()),
            ("runfiles.manifest", manifest.to_string_lossy().as_ref()),
        ])
        .unwrap();

        let _first = WorkspaceDriver::create(&config).unwrap();
        fs::remove_file(&manifest).unwrap();
        // the manifest is gone, but the parsed copy is reused
        let _second = WorkspaceDriver::create(&config).unwrap();
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let mut driver = WorkspaceDriver::create(&config_in(tmp.path())).unwrap();
        driver.scratch_file("a/b/c.txt", ["deep"]).unwrap();
        let root = driver.root().to_path_buf();

        driver.teardown();
        assert!(!root.exists());
        driver.teardown();
    }

    #[test]
    fn test_drop_removes_workspace() {
        let tmp = TempDir::new().unwrap();
        let root = {
            let driver = WorkspaceDriver::create(&config_in(tmp.path())).unwrap();
            driver.scratch_file("x", ["y"]).unwrap();
            driver.root().to_path_buf()
        };
        assert!(!root.exists());
    }
}
