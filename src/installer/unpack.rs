// src/installer/unpack.rs

//! Artifact extraction into the rootfs
//!
//! The archive is unpacked into a private staging directory first, then a
//! fixed set of copy workers moves each entry to its place in the rootfs.
//! A config-protected file that already exists with different content is
//! left alone and the incoming copy goes to `._cfgNNNN_<basename>`.

use super::protect::{ConfigProtect, protected_name};
use crate::compression::unpack_archive;
use crate::concurrency::BoundedPool;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::filesystem::move_file;
use crate::filesystem::path::safe_join_entry;
use crate::hash::sha256_file;
use crate::repository::PackageArtifact;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

struct CopyJob {
    source: PathBuf,
    target: PathBuf,
    protected: bool,
}

/// Result of placing one artifact
#[derive(Debug, Clone, Default)]
pub struct UnpackReport {
    /// Files shipped by the artifact, rootfs-relative, as registered
    pub files: Vec<String>,
    /// `._cfgNNNN_` copies written next to protected files
    pub protected_copies: Vec<PathBuf>,
}

/// Unpack a downloaded artifact into `config.system.rootfs`
pub fn unpack_artifact(
    artifact: &PackageArtifact,
    config: &Config,
    pool: &BoundedPool,
) -> Result<UnpackReport> {
    let archive = artifact.cache_path.as_ref().ok_or_else(|| {
        Error::TransactionError(format!("{} has not been downloaded", artifact.runtime))
    })?;
    let rootfs = &config.system.rootfs;

    fs::create_dir_all(&config.system.tmpdir)?;
    let staging = tempfile::Builder::new()
        .prefix("quarry-unpack-")
        .tempdir_in(&config.system.tmpdir)?;

    let files = unpack_archive(archive, staging.path(), artifact.compression_type)?;
    let protect = ConfigProtect::for_package(&config.config_protect, &artifact.runtime);

    let jobs = files
        .iter()
        .map(|file| {
            Ok(CopyJob {
                source: staging.path().join(file),
                target: safe_join_entry(rootfs, file)?,
                protected: protect.is_protected(file),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let protected_copies = Mutex::new(Vec::new());
    let placed = pool.drain(jobs, |job| {
        if let Some(copy) = place(&job)?
            && let Ok(mut copies) = protected_copies.lock()
        {
            copies.push(copy);
        }
        Ok(())
    })?;

    let mut protected_copies = protected_copies
        .into_inner()
        .map_err(|_| Error::TransactionError("protected copy list poisoned".into()))?;
    protected_copies.sort();

    info!(
        "Unpacked {} ({} files, {} protected)",
        artifact.runtime,
        placed,
        protected_copies.len()
    );
    Ok(UnpackReport {
        files,
        protected_copies,
    })
}

/// Put one staged entry in place; returns the protected copy path if one was written
fn place(job: &CopyJob) -> Result<Option<PathBuf>> {
    if let Some(parent) = job.target.parent() {
        fs::create_dir_all(parent)?;
    }

    let existing = job.target.symlink_metadata().ok();
    let mut target = job.target.clone();
    let mut protected_copy = None;

    if job.protected && existing.as_ref().is_some_and(|m| m.is_file()) {
        if same_content(&job.source, &job.target)? {
            debug!("{} unchanged", job.target.display());
            return Ok(None);
        }
        target = protected_name(&job.target)?;
        protected_copy = Some(target.clone());
    } else if let Some(meta) = existing {
        if meta.is_dir() && !meta.file_type().is_symlink() {
            return Err(Error::TransactionError(format!(
                "{} is a directory",
                job.target.display()
            )));
        }
        fs::remove_file(&job.target)?;
    }

    let source_meta = job.source.symlink_metadata()?;
    if source_meta.file_type().is_symlink() {
        let link = fs::read_link(&job.source)?;
        symlink(&link, &target)?;
    } else {
        move_file(&job.source, &target)?;
    }
    Ok(protected_copy)
}

fn same_content(a: &Path, b: &Path) -> Result<bool> {
    Ok(sha256_file(a)? == sha256_file(b)?)
}

#[cfg(unix)]
fn symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn symlink(_link: &Path, target: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot create symlink {}", target.display()),
    ))
}
