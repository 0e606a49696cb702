//! Filesystem helpers for staging and importing workspace content
//!
//! Everything here operates on already-resolved absolute paths except
//! [`resolve_within`], which is the single place where workspace-relative
//! paths are checked against the root, and [`program_path`].

use std::fs;
use std::path::{Component, Path, PathBuf};

use ignore::WalkBuilder;

use crate::error::{HarnessError, Result};

/// Join `relative` onto `root`, rejecting anything that would leave `root`.
///
/// `.` segments are dropped and `..` segments pop the previous one. A `..`
/// with nothing left to pop, an absolute path or a Windows prefix is
/// rejected with [`HarnessError::InvalidPath`]. The deepest part of the
/// result that already exists must also stay under `root` once symlinks are
/// followed, so a link such as `bazel-out` pointing elsewhere cannot be
/// written through.
pub fn resolve_within(root: &Path, relative: &Path) -> Result<PathBuf> {
    let joined = join_normalized(root, relative)?;
    if escapes_through_links(root, &joined) {
        return Err(HarnessError::InvalidPath(relative.to_path_buf()));
    }
    Ok(joined)
}

fn join_normalized(root: &Path, relative: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => normalized.push(part),
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(HarnessError::InvalidPath(relative.to_path_buf()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(HarnessError::InvalidPath(relative.to_path_buf()));
            }
        }
    }
    Ok(root.join(normalized))
}

fn escapes_through_links(root: &Path, joined: &Path) -> bool {
    // A root that does not exist yet has nothing to follow
    let Ok(real_root) = root.canonicalize() else {
        return false;
    };
    // symlink_metadata so a dangling link still counts as existing
    let deepest = joined
        .ancestors()
        .take_while(|ancestor| ancestor.starts_with(root))
        .find(|ancestor| ancestor.symlink_metadata().is_ok());
    match deepest {
        Some(existing) => match existing.canonicalize() {
            Ok(real) => !real.starts_with(&real_root),
            Err(_) => true,
        },
        None => false,
    }
}

/// Make a program path with a directory part absolute against the current
/// directory. Bare names are left alone for the `PATH` lookup.
///
/// Relative programs would otherwise be resolved against the child's working
/// directory, which is the workspace.
pub fn program_path(program: PathBuf) -> Result<PathBuf> {
    if program.is_absolute() || program.components().count() < 2 {
        return Ok(program);
    }
    std::path::absolute(&program).map_err(|e| HarnessError::io(&program, e))
}

/// Render lines the way they are staged: every line followed by `\n`.
pub fn join_lines<I, S>(lines: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut content = String::new();
    for line in lines {
        content.push_str(line.as_ref());
        content.push('\n');
    }
    content
}

/// Create the parent directories of `path` if they are missing.
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| HarnessError::io(parent, e))?;
    }
    Ok(())
}

/// Write `content` to `path`, creating parents and replacing any old file.
pub fn write_file(path: &Path, content: &str) -> Result<()> {
    ensure_parent(path)?;
    fs::write(path, content).map_err(|e| HarnessError::io(path, e))
}

/// Add read and execute permission for user, group and other.
#[cfg(unix)]
pub fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)
        .map_err(|e| HarnessError::io(path, e))?
        .permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    fs::set_permissions(path, permissions).map_err(|e| HarnessError::io(path, e))
}

/// No executable bit to set on this platform.
#[cfg(not(unix))]
pub fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Copy a single file, creating the destination's parents.
///
/// `fs::copy` follows symlinks on the source side and carries the
/// permission bits over, so runfiles symlinks become real files.
pub fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    ensure_parent(dest)?;
    fs::copy(src, dest).map_err(|e| HarnessError::io(src, e))?;
    Ok(())
}

/// Recursively copy the tree at `src` into `dest`.
///
/// Hidden files and ignore files are not special here: the walk is
/// configured to visit everything and to follow symlinks, since runfiles
/// trees are usually symlink forests. Returns the number of files copied.
/// A failure part way through leaves whatever was already copied in place.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<usize> {
    let walker = WalkBuilder::new(src)
        .hidden(false)
        .ignore(false)
        .parents(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .follow_links(true)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut copied = 0;
    for entry in walker {
        let entry = entry.map_err(|e| HarnessError::io(src, std::io::Error::other(e)))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| HarnessError::InvalidPath(entry.path().to_path_buf()))?;
        let target = dest.join(relative);

        match entry.file_type() {
            Some(file_type) if file_type.is_dir() => {
                fs::create_dir_all(&target).map_err(|e| HarnessError::io(&target, e))?;
            }
            Some(_) => {
                copy_file(entry.path(), &target)?;
                copied += 1;
            }
            // stdin entries only, never produced by a directory walk
            None => {}
        }
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_within_plain() {
        let root = Path::new("/ws");
        let resolved = resolve_within(root, Path::new("foo/BUILD")).unwrap();
        assert_eq!(resolved, PathBuf::from("/ws/foo/BUILD"));
    }

    #[test]
    fn test_resolve_within_dot_segments() {
        let root = Path::new("/ws");
        assert_eq!(
            resolve_within(root, Path::new("./WORKSPACE")).unwrap(),
            PathBuf::from("/ws/WORKSPACE")
        );
        // Stays inside the root, so it is accepted
        assert_eq!(
            resolve_within(root, Path::new("foo/../bar/x")).unwrap(),
            PathBuf::from("/ws/bar/x")
        );
    }

    #[test]
    fn test_resolve_within_rejects_escape() {
        let root = Path::new("/ws");
        for bad in ["../x", "foo/../../x", "..", "a/b/../../../c"] {
            let err = resolve_within(root, Path::new(bad)).unwrap_err();
            assert!(
                matches!(err, HarnessError::InvalidPath(_)),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_resolve_within_rejects_absolute() {
        let err = resolve_within(Path::new("/ws"), Path::new("/etc/passwd")).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidPath(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_within_rejects_symlink_out_of_root() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("bazel-out")).unwrap();

        for through in ["bazel-out", "bazel-out/escaped.txt", "bazel-out/new/dir/x"] {
            let err = resolve_within(root.path(), Path::new(through)).unwrap_err();
            assert!(
                matches!(err, HarnessError::InvalidPath(_)),
                "{} should be rejected",
                through
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_within_allows_symlink_inside_root() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("real")).unwrap();
        std::os::unix::fs::symlink(root.path().join("real"), root.path().join("alias")).unwrap();

        let resolved = resolve_within(root.path(), Path::new("alias/file")).unwrap();
        assert_eq!(resolved, root.path().join("alias/file"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_within_rejects_dangling_symlink() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path().join("gone"), root.path().join("link")).unwrap();

        let err = resolve_within(root.path(), Path::new("link")).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidPath(_)));
    }

    #[test]
    fn test_program_path() {
        assert_eq!(
            program_path(PathBuf::from("bazel")).unwrap(),
            PathBuf::from("bazel")
        );
        assert_eq!(
            program_path(PathBuf::from("/opt/bazel")).unwrap(),
            PathBuf::from("/opt/bazel")
        );
        let cwd = std::env::current_dir().unwrap();
        let resolved = program_path(PathBuf::from("tools/bazel")).unwrap();
        assert!(resolved.is_absolute());
        assert_eq!(resolved, cwd.join("tools/bazel"));
    }

    #[test]
    fn test_join_lines() {
        assert_eq!(join_lines(["a", "b"]), "a\nb\n");
        assert_eq!(join_lines(Vec::<String>::new()), "");
        assert_eq!(join_lines([""]), "\n");
    }

    #[test]
    fn test_copy_tree_preserves_structure() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        write_file(&src.path().join("a.txt"), "a").unwrap();
        write_file(&src.path().join("nested/deeper/b.txt"), "b").unwrap();
        write_file(&src.path().join(".hidden"), "h").unwrap();
        fs::create_dir_all(src.path().join("empty")).unwrap();

        let copied = copy_tree(src.path(), &dest.path().join("out")).unwrap();
        assert_eq!(copied, 3);

        let out = dest.path().join("out");
        assert_eq!(fs::read_to_string(out.join("a.txt")).unwrap(), "a");
        assert_eq!(
            fs::read_to_string(out.join("nested/deeper/b.txt")).unwrap(),
            "b"
        );
        assert_eq!(fs::read_to_string(out.join(".hidden")).unwrap(), "h");
        assert!(out.join("empty").is_dir());
        // source untouched
        assert_eq!(fs::read_to_string(src.path().join("a.txt")).unwrap(), "a");
    }

    #[test]
    fn test_copy_tree_ignores_gitignore() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        write_file(&src.path().join(".gitignore"), "*.log\n").unwrap();
        write_file(&src.path().join("debug.log"), "log").unwrap();

        copy_tree(src.path(), dest.path()).unwrap();
        assert!(dest.path().join("debug.log").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_keeps_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let script = src.path().join("bin/tool.sh");
        write_file(&script, "#!/bin/sh\n").unwrap();
        set_executable(&script).unwrap();

        copy_tree(src.path(), dest.path()).unwrap();
        let mode = fs::metadata(dest.path().join("bin/tool.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
