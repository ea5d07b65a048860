// src/installer/protect.rs

//! Config protection
//!
//! Files under a protected prefix are never overwritten or deleted by
//! package operations. On install a differing incoming file is written
//! next to the existing one as `._cfgNNNN_<basename>`; on removal the file
//! is left on disk.
//!
//! Prefixes come from `config_protect.paths` (every package) and from the
//! package's `config_protect` annotation (that package only).

use crate::config::ConfigProtectConfig;
use crate::error::{Error, Result};
use crate::filesystem::path::{is_under_any, sanitize_path};
use crate::package::Package;
use std::path::{Path, PathBuf};
use tracing::debug;

const MAX_PROTECTED_COPIES: u32 = 999;

/// Protected prefixes for one package, relative to the rootfs
#[derive(Debug, Clone, Default)]
pub struct ConfigProtect {
    prefixes: Vec<PathBuf>,
}

impl ConfigProtect {
    pub fn for_package(config: &ConfigProtectConfig, pkg: &Package) -> Self {
        if !config.enabled {
            return Self::default();
        }

        let prefixes = config
            .paths
            .iter()
            .map(String::as_str)
            .chain(pkg.config_protect_dir())
            .filter_map(|p| sanitize_path(p).ok())
            .collect();
        Self { prefixes }
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Whether a rootfs-relative path is protected
    pub fn is_protected(&self, relative: impl AsRef<Path>) -> bool {
        match sanitize_path(relative) {
            Ok(path) => is_under_any(&path, &self.prefixes),
            Err(_) => false,
        }
    }
}

/// First free `._cfgNNNN_<basename>` sibling of `target`
pub fn protected_name(target: &Path) -> Result<PathBuf> {
    let basename = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| Error::InvalidPath(format!("{} has no file name", target.display())))?;
    let parent = target.parent().unwrap_or(Path::new("."));

    for n in 1..=MAX_PROTECTED_COPIES {
        let candidate = parent.join(format!("._cfg{:04}_{}", n, basename));
        if candidate.symlink_metadata().is_err() {
            debug!("Protected copy of {} goes to {}", target.display(), candidate.display());
            return Ok(candidate);
        }
    }

    Err(Error::TransactionError(format!(
        "No free protected name left for {} (all {} in use)",
        target.display(),
        MAX_PROTECTED_COPIES
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_global_and_annotation_prefixes() {
        let config = ConfigProtectConfig {
            enabled: true,
            paths: vec!["/etc".to_string()],
        };
        let pkg = Package::parse("app/foo@1.0")
            .unwrap()
            .with_annotation("config_protect", "/opt/foo/conf");
        let protect = ConfigProtect::for_package(&config, &pkg);

        assert!(protect.is_protected("etc/foo.conf"));
        assert!(protect.is_protected("/opt/foo/conf/a.yaml"));
        assert!(!protect.is_protected("opt/foo/bin/foo"));
        assert!(!protect.is_protected("etcetera/file"));

        let plain = Package::parse("app/bar@1.0").unwrap();
        assert!(!ConfigProtect::for_package(&config, &plain).is_protected("opt/foo/conf/a.yaml"));
    }

    #[test]
    fn test_disabled_protects_nothing() {
        let config = ConfigProtectConfig {
            enabled: false,
            paths: vec!["/etc".to_string()],
        };
        let pkg = Package::parse("app/foo@1.0").unwrap();
        assert!(ConfigProtect::for_package(&config, &pkg).is_empty());
    }

    #[test]
    fn test_protected_name_first_free() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("tool.conf");
        assert_eq!(
            protected_name(&target).unwrap(),
            dir.path().join("._cfg0001_tool.conf")
        );

        fs::write(dir.path().join("._cfg0001_tool.conf"), b"").unwrap();
        assert_eq!(
            protected_name(&target).unwrap(),
            dir.path().join("._cfg0002_tool.conf")
        );
    }

    #[test]
    fn test_protected_name_exhausted() {
        let dir = TempDir::new().unwrap();
        for n in 1..=MAX_PROTECTED_COPIES {
            fs::write(dir.path().join(format!("._cfg{:04}_x", n)), b"").unwrap();
        }
        assert!(protected_name(&dir.path().join("x")).is_err());
    }
}
