// src/filesystem/path.rs

//! Rootfs-confined path handling
//!
//! Package file lists and repository metadata are untrusted input. Every path
//! taken from them is sanitized before it is joined to the target root, and
//! every directory walk used for pruning stops at the root.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Normalize an untrusted path into a relative one
///
/// Leading slashes and `.` components are dropped; `..` is rejected, as is a
/// path that is empty once normalized.
///
/// ```
/// use quarry::filesystem::path::sanitize_path;
/// use std::path::PathBuf;
///
/// assert_eq!(sanitize_path("/usr/bin/foo").unwrap(), PathBuf::from("usr/bin/foo"));
/// assert!(sanitize_path("usr/../../etc/passwd").is_err());
/// ```
pub fn sanitize_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let path_str = path.to_string_lossy();
    let relative = path_str.trim_start_matches('/');

    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::PathTraversal(path_str.to_string()));
            }
            Component::Prefix(_) | Component::RootDir => {}
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Error::InvalidPath("Empty path after sanitization".to_string()));
    }

    Ok(normalized)
}

/// Join an untrusted path onto `root`, refusing anything that escapes it
///
/// When both sides exist on disk the canonical forms are compared too, so a
/// symlinked parent pointing outside the root is caught.
pub fn safe_join(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<PathBuf> {
    let root = root.as_ref();
    let sanitized = sanitize_path(path.as_ref())?;
    let joined = root.join(&sanitized);

    if let (Ok(canonical_root), Ok(canonical_joined)) =
        (root.canonicalize(), joined.canonicalize())
        && !canonical_joined.starts_with(&canonical_root)
    {
        return Err(Error::PathTraversal(format!(
            "Path {} escapes root {}",
            joined.display(),
            root.display()
        )));
    }

    Ok(joined)
}

/// Like [`safe_join`], but the last component is not followed
///
/// For operating on the entry itself (removing or replacing a symlink)
/// only the parent directory has to resolve inside `root`.
pub fn safe_join_entry(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<PathBuf> {
    let root = root.as_ref();
    let joined = root.join(sanitize_path(path.as_ref())?);

    if let Some(parent) = joined.parent()
        && let (Ok(canonical_root), Ok(canonical_parent)) =
            (root.canonicalize(), parent.canonicalize())
        && !canonical_parent.starts_with(&canonical_root)
    {
        return Err(Error::PathTraversal(format!(
            "Path {} escapes root {}",
            joined.display(),
            root.display()
        )));
    }

    Ok(joined)
}

/// Reject names that are not a single path component
pub fn sanitize_filename(name: &str) -> Result<String> {
    if name.contains('/') || name.contains('\\') {
        return Err(Error::PathTraversal(format!(
            "Filename contains path separator: {}",
            name
        )));
    }
    if name == ".." || name == "." {
        return Err(Error::PathTraversal(format!("Invalid filename: {}", name)));
    }
    if name.is_empty() {
        return Err(Error::InvalidPath("Empty filename".to_string()));
    }

    Ok(name.to_string())
}

/// Ancestor directories of `path` strictly inside `root`, deepest first
///
/// `root` itself is never returned, nor is anything outside it.
pub fn ancestors_within(root: &Path, path: &Path) -> Vec<PathBuf> {
    path.ancestors()
        .skip(1)
        .take_while(|dir| *dir != root && dir.starts_with(root))
        .map(Path::to_path_buf)
        .collect()
}

/// Whether `path` equals or sits below any of `prefixes`
pub fn is_under_any(path: &Path, prefixes: &[PathBuf]) -> bool {
    prefixes.iter().any(|prefix| path.starts_with(prefix))
}
