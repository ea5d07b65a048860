// src/commands/database.rs
//! Direct package database edits
//!
//! These register or drop database rows only; nothing on the rootfs is
//! unpacked, removed or run.

use super::{load_config, open_db, parse_refs};
use anyhow::{Context, Result};
use quarry::PackageArtifact;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Register packages described by artifact metadata files
pub fn cmd_database_create(
    config_path: &Path,
    rootfs: Option<PathBuf>,
    metadata: &[PathBuf],
) -> Result<()> {
    let config = load_config(config_path, rootfs)?;
    let db = open_db(&config)?;

    for path in metadata {
        let artifact = PackageArtifact::load(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let pkg = &artifact.runtime;

        db.create_package(pkg)
            .with_context(|| format!("Failed to register {}", pkg))?;
        db.set_files(pkg, &artifact.files)?;
        if let Some(finalizer) = &artifact.finalizer {
            db.set_finalizer(pkg, finalizer)?;
        }
        info!("Registered {} ({} files)", pkg, artifact.files.len());
        println!("Registered {}", pkg);
    }
    Ok(())
}

/// Drop packages from the database, leaving their files in place
pub fn cmd_database_remove(
    config_path: &Path,
    rootfs: Option<PathBuf>,
    packages: &[String],
) -> Result<()> {
    let config = load_config(config_path, rootfs)?;
    let db = open_db(&config)?;

    for reference in parse_refs(packages)? {
        let found = db.find_by_ref(&reference)?;
        if found.is_empty() {
            warn!("{} is not installed", reference);
            continue;
        }
        for pkg in found {
            db.remove_files(&pkg)?;
            db.remove_finalizer(&pkg)?;
            db.remove_package(&pkg)?;
            println!("Removed {} from the database", pkg);
        }
    }
    Ok(())
}
