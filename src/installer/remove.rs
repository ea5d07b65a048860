// src/installer/remove.rs

//! Package removal from the rootfs and the database

use super::finalizer::{FinalizerRunner, Phase};
use super::protect::ConfigProtect;
use crate::config::Config;
use crate::db::PackageDatabase;
use crate::error::{Error, Result};
use crate::filesystem::is_empty_dir;
use crate::filesystem::path::{ancestors_within, is_under_any, safe_join_entry};
use crate::package::Package;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Never delete under the package cache or the synced repository catalogs
    pub preserve_system_essential_data: bool,
    pub skip_finalizer: bool,
    /// Downgrade database errors to warnings
    pub force: bool,
}

/// What happened to a package's files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub removed: Vec<PathBuf>,
    /// Protected, essential, or already gone
    pub kept: Vec<PathBuf>,
    pub pruned: Vec<PathBuf>,
}

/// Remove files listed for a package, then prune emptied directories
///
/// Files go deepest path first. Every ancestor of a removed file strictly
/// inside `rootfs` becomes a prune candidate; candidates are visited
/// bottom-up and deleted only if they are empty at that moment, not a
/// symlink, not protected and not essential. Failures here are logged and
/// skipped.
pub fn remove_package_files(
    rootfs: &Path,
    files: &[String],
    protect: &ConfigProtect,
    essential: &[PathBuf],
) -> RemovalReport {
    let mut report = RemovalReport::default();
    let mut dirs: BTreeSet<PathBuf> = BTreeSet::new();

    let mut ordered: Vec<&String> = files.iter().collect();
    ordered.sort_by(|a, b| b.cmp(a));

    for file in ordered {
        let target = match safe_join_entry(rootfs, file) {
            Ok(t) => t,
            Err(e) => {
                warn!("Not removing {}: {}", file, e);
                continue;
            }
        };

        if protect.is_protected(file) || is_under_any(&target, essential) {
            debug!("Keeping protected {}", target.display());
            report.kept.push(target);
            continue;
        }

        match target.symlink_metadata() {
            Ok(meta) if meta.is_dir() => {
                dirs.insert(target);
                continue;
            }
            Ok(_) => match fs::remove_file(&target) {
                Ok(()) => report.removed.push(target.clone()),
                Err(e) => {
                    warn!("Failed to remove {}: {}", target.display(), e);
                    report.kept.push(target.clone());
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} already gone", target.display());
                report.kept.push(target.clone());
            }
            Err(e) => {
                warn!("Cannot stat {}: {}", target.display(), e);
                report.kept.push(target.clone());
                continue;
            }
        }

        dirs.extend(ancestors_within(rootfs, &target));
    }

    for dir in dirs.into_iter().rev() {
        let relative = dir.strip_prefix(rootfs).unwrap_or(&dir);
        if protect.is_protected(relative) || is_under_any(&dir, essential) {
            continue;
        }
        let Ok(meta) = dir.symlink_metadata() else {
            continue;
        };
        if meta.file_type().is_symlink() || !meta.is_dir() {
            continue;
        }
        if !is_empty_dir(&dir).unwrap_or(false) {
            continue;
        }
        match fs::remove_dir(&dir) {
            Ok(()) => report.pruned.push(dir),
            Err(e) => warn!("Failed to prune {}: {}", dir.display(), e),
        }
    }

    report
}

/// Paths never deleted when `preserve_system_essential_data` is set
///
/// Each configured directory is taken both as a host path and as a path
/// inside the rootfs, so a relocated rootfs keeps its own cache too.
pub fn essential_paths(config: &Config) -> Vec<PathBuf> {
    let rootfs = &config.system.rootfs;
    let mut paths = Vec::new();
    for dir in [
        &config.system.pkgs_cache_path,
        &config.system.repos_database_path,
    ] {
        paths.push(dir.clone());
        if let Ok(inside) = dir.strip_prefix("/")
            && rootfs.as_path() != Path::new("/")
        {
            paths.push(rootfs.join(inside));
        }
    }
    paths
}

/// Remove an installed package: files, uninstall finalizer, database rows
pub fn remove_package(
    db: &dyn PackageDatabase,
    config: &Config,
    pkg: &Package,
    opts: RemoveOptions,
) -> Result<RemovalReport> {
    let rootfs = &config.system.rootfs;
    let files = match db.get_files(pkg) {
        Ok(files) => files,
        Err(e) => {
            tolerate(opts.force, e)?;
            Vec::new()
        }
    };
    let protect = ConfigProtect::for_package(&config.config_protect, pkg);
    let essential = if opts.preserve_system_essential_data {
        essential_paths(config)
    } else {
        Vec::new()
    };

    let report = remove_package_files(rootfs, &files, &protect, &essential);
    debug!(
        "{}: {} removed, {} kept, {} dirs pruned",
        pkg,
        report.removed.len(),
        report.kept.len(),
        report.pruned.len()
    );

    let finalizer = if opts.skip_finalizer {
        None
    } else {
        match db.get_finalizer(pkg) {
            Ok(found) => found,
            Err(e) => {
                tolerate(opts.force, e)?;
                None
            }
        }
    };
    if let Some(finalizer) = finalizer {
        let runner = FinalizerRunner::from_config(config);
        if let Err(e) = runner.run(pkg, &finalizer, Phase::Uninstall) {
            tolerate(opts.force, e)?;
        }
    }

    let steps: [(&str, Result<()>); 3] = [
        ("file list", db.remove_files(pkg)),
        ("finalizer", db.remove_finalizer(pkg)),
        ("package", db.remove_package(pkg)),
    ];
    for (what, result) in steps {
        if let Err(e) = result {
            warn!("Removing {} of {}: {}", what, pkg, e);
            tolerate(opts.force, e)?;
        }
    }

    info!("Removed {}", pkg);
    Ok(report)
}

fn tolerate(force: bool, err: Error) -> Result<()> {
    if force {
        warn!("{} (continuing, forced)", err);
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigProtectConfig;
    use crate::db::MemoryDatabase;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn list(files: &[&str]) -> Vec<String> {
        files.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn test_prune_keeps_foreign_files() {
        let root = TempDir::new().unwrap();
        touch(root.path(), "usr/share/foo/data", b"x");
        touch(root.path(), "usr/share/foo/sub/more", b"x");
        touch(root.path(), "usr/share/other/file", b"x");
        touch(root.path(), "usr/share/foo/user-added", b"x");

        let report = remove_package_files(
            root.path(),
            &list(&["usr/share/foo/data", "usr/share/foo/sub/more"]),
            &ConfigProtect::default(),
            &[],
        );

        assert_eq!(report.removed.len(), 2);
        assert!(!root.path().join("usr/share/foo/sub").exists());
        assert!(root.path().join("usr/share/foo/user-added").exists());
        assert!(root.path().join("usr/share/other/file").exists());
        assert!(root.path().exists());
    }

    #[test]
    fn test_prune_stops_at_rootfs() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("rootfs");
        touch(&root, "opt/only/file", b"x");

        remove_package_files(&root, &list(&["opt/only/file"]), &ConfigProtect::default(), &[]);

        assert!(!root.join("opt").exists());
        assert!(root.exists());
    }

    #[test]
    fn test_protected_and_essential_kept() {
        let root = TempDir::new().unwrap();
        touch(root.path(), "etc/foo.conf", b"edited");
        touch(root.path(), "var/cache/quarry/pkg.tar", b"x");
        touch(root.path(), "usr/bin/foo", b"x");

        let config = ConfigProtectConfig {
            enabled: true,
            paths: vec!["/etc".to_string()],
        };
        let pkg = Package::parse("app/foo@1.0").unwrap();
        let protect = ConfigProtect::for_package(&config, &pkg);
        let essential = vec![root.path().join("var/cache/quarry")];

        let report = remove_package_files(
            root.path(),
            &list(&["etc/foo.conf", "var/cache/quarry/pkg.tar", "usr/bin/foo"]),
            &protect,
            &essential,
        );

        assert_eq!(report.removed, vec![root.path().join("usr/bin/foo")]);
        assert_eq!(fs::read(root.path().join("etc/foo.conf")).unwrap(), b"edited");
        assert!(root.path().join("var/cache/quarry/pkg.tar").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_dir_not_followed() {
        let root = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        std::os::unix::fs::symlink(elsewhere.path(), root.path().join("link")).unwrap();
        touch(root.path(), "data/file", b"x");

        remove_package_files(
            root.path(),
            &list(&["data/file", "link"]),
            &ConfigProtect::default(),
            &[],
        );
        // The symlink itself is a package file and goes; its target stays
        assert!(root.path().join("link").symlink_metadata().is_err());
        assert!(elsewhere.path().exists());
    }

    #[test]
    fn test_essential_paths_inside_relocated_rootfs() {
        let state = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let mut config = Config::rooted_at(state.path()).with_rootfs(root.path());
        config.system.pkgs_cache_path = PathBuf::from("/var/cache/quarry/packages");
        touch(root.path(), "var/cache/quarry/packages/app-foo.tar", b"x");
        touch(root.path(), "usr/bin/foo", b"x");

        let essential = essential_paths(&config);
        assert!(essential.contains(&PathBuf::from("/var/cache/quarry/packages")));
        assert!(essential.contains(&root.path().join("var/cache/quarry/packages")));

        let report = remove_package_files(
            root.path(),
            &list(&["var/cache/quarry/packages/app-foo.tar", "usr/bin/foo"]),
            &ConfigProtect::default(),
            &essential,
        );
        assert_eq!(report.removed, vec![root.path().join("usr/bin/foo")]);
        assert!(root.path().join("var/cache/quarry/packages/app-foo.tar").exists());
    }

    #[test]
    fn test_remove_package_clears_database() {
        let root = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let config = Config::rooted_at(state.path()).with_rootfs(root.path());
        touch(root.path(), "usr/bin/foo", b"x");

        let db = MemoryDatabase::new();
        let pkg = Package::parse("app/foo@1.0").unwrap();
        db.create_package(&pkg).unwrap();
        db.set_files(&pkg, &list(&["usr/bin/foo"])).unwrap();

        remove_package(&db, &config, &pkg, RemoveOptions::default()).unwrap();
        assert!(!root.path().join("usr/bin/foo").exists());
        assert!(db.world().unwrap().is_empty());
        assert!(db.get_files(&pkg).unwrap().is_empty());

        // Second removal: the package row is gone
        assert!(remove_package(&db, &config, &pkg, RemoveOptions::default()).is_err());
        let forced = RemoveOptions {
            force: true,
            ..Default::default()
        };
        assert!(remove_package(&db, &config, &pkg, forced).is_ok());
    }
}
