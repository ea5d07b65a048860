// src/filesystem/mod.rs

//! Filesystem helpers for applying packages to a target root
//!
//! - [`path`]: sanitization and rootfs-confined joins
//! - [`move_file`]: rename with a copy fallback across filesystems

pub mod path;

use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::debug;

/// Move a file, falling back to copy + fsync + unlink across filesystems
///
/// The staging area and the target root are often on different mounts, where
/// `rename(2)` fails with `EXDEV`.
pub fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!(
                "Cross-filesystem move ({} -> {}), copying",
                src.display(),
                dst.display()
            );

            fs::copy(src, dst)?;
            File::open(dst)?.sync_all()?;

            if let Some(parent) = dst.parent()
                && let Ok(dir) = File::open(parent)
            {
                // Not every filesystem supports fsync on directories
                let _ = dir.sync_all();
            }

            fs::remove_file(src)
        }
        Err(e) => Err(e),
    }
}

/// Whether a directory exists and has no entries
pub fn is_empty_dir(dir: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_move_file_same_filesystem() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a");
        let dst = temp.path().join("b");
        fs::write(&src, b"content").unwrap();

        move_file(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"content");
    }

    #[test]
    fn test_is_empty_dir() {
        let temp = TempDir::new().unwrap();
        assert!(is_empty_dir(temp.path()).unwrap());
        fs::write(temp.path().join("f"), b"").unwrap();
        assert!(!is_empty_dir(temp.path()).unwrap());
        assert!(is_empty_dir(&temp.path().join("missing")).is_err());
    }
}
