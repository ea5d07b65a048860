// src/installer/conflicts.rs

//! File conflict detection
//!
//! Every path claimed by the batch being installed is held in memory at
//! once, so the check is linear in the total number of files in the batch.
//! With `check_system` the claims are also checked against the installed
//! file index and the live rootfs.

use super::protect::ConfigProtect;
use crate::config::ConfigProtectConfig;
use crate::db::{PackageDatabase, normalize_file_path};
use crate::error::{Error, Result};
use crate::filesystem::path::safe_join;
use crate::repository::{ArtifactsPack, PackageArtifact};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Lazily built map of installed file path to owner fingerprint
///
/// Building it reads every installed file, so it is only loaded when a
/// system check needs it and dropped again after each pass.
#[derive(Debug, Default)]
pub struct FileIndex {
    cache: Mutex<Option<HashMap<String, String>>>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the index, loading it from `db` if needed
    pub fn with<R>(
        &self,
        db: &dyn PackageDatabase,
        f: impl FnOnce(&HashMap<String, String>) -> R,
    ) -> Result<R> {
        let mut guard = self
            .cache
            .lock()
            .map_err(|_| Error::TransactionError("file index lock poisoned".into()))?;
        if guard.is_none() {
            let owners = db.file_owners()?;
            debug!("Loaded file index with {} entries", owners.len());
            *guard = Some(owners);
        }
        match guard.as_ref() {
            Some(index) => Ok(f(index)),
            None => Err(Error::TransactionError("file index not loaded".into())),
        }
    }

    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.cache.lock() {
            *guard = None;
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cache.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

/// Inputs of one conflict check
pub struct ConflictCheck<'a> {
    pub db: &'a dyn PackageDatabase,
    pub index: &'a FileIndex,
    pub rootfs: &'a Path,
    pub protect: &'a ConfigProtectConfig,
    /// Also check the installed file index and the live rootfs
    pub check_system: bool,
    /// Report conflicts as warnings instead of failing on the first one
    pub safe_check: bool,
}

impl ConflictCheck<'_> {
    /// Check a batch for file conflicts
    ///
    /// Returns whether any conflict was found; with `safe_check == false`
    /// the first conflict is returned as an error instead. Paths owned by a
    /// package in `to_remove` are not conflicts. The file index is
    /// invalidated when the pass ends.
    pub fn run(&self, to_install: &ArtifactsPack, to_remove: &ArtifactsPack) -> Result<bool> {
        let result = self.check(to_install, to_remove);
        self.index.invalidate();
        result
    }

    /// Fail on a conflict, or warn and remember it in safe mode
    fn report(&self, conflict: Error, found: &mut bool) -> Result<()> {
        if self.safe_check {
            warn!("{}", conflict);
            *found = true;
            Ok(())
        } else {
            Err(conflict)
        }
    }

    fn check(&self, to_install: &ArtifactsPack, to_remove: &ArtifactsPack) -> Result<bool> {
        let mut found = false;

        // path -> fingerprint of the first claimant in the batch
        let mut claimed: HashMap<String, String> = HashMap::new();
        for artifact in to_install.iter() {
            let claimant = artifact.runtime.fingerprint();
            for file in &artifact.files {
                let path = normalize_file_path(file);
                match claimed.get(&path) {
                    Some(owner) if *owner != claimant => {
                        let conflict = Error::FileConflict {
                            path: format!("/{}", path),
                            owner: owner.clone(),
                            claimant: claimant.clone(),
                        };
                        self.report(conflict, &mut found)?;
                    }
                    Some(_) => {}
                    None => {
                        claimed.insert(path, claimant.clone());
                    }
                }
            }
        }

        if !self.check_system {
            return Ok(found);
        }

        let removing = |fingerprint: &str| {
            to_remove
                .iter()
                .any(|a| a.runtime.fingerprint() == fingerprint)
        };

        let mut problems = Vec::new();
        self.index.with(self.db, |index| {
            for artifact in to_install.iter() {
                problems.extend(self.system_conflicts(artifact, index, &removing));
            }
        })?;
        for problem in problems {
            self.report(problem, &mut found)?;
        }

        Ok(found)
    }

    fn system_conflicts(
        &self,
        artifact: &PackageArtifact,
        index: &HashMap<String, String>,
        removing: &dyn Fn(&str) -> bool,
    ) -> Vec<Error> {
        let claimant = artifact.runtime.fingerprint();
        let identity = artifact.runtime.identity();
        let protect = ConfigProtect::for_package(self.protect, &artifact.runtime);
        let mut conflicts = Vec::new();

        for file in &artifact.files {
            let path = normalize_file_path(file);
            match index.get(&path) {
                Some(owner) => {
                    // Same identity: the package is replacing itself
                    let same_identity = owner
                        .split_once('@')
                        .is_some_and(|(id, _)| id == identity.to_string());
                    if !removing(owner) && !same_identity {
                        conflicts.push(Error::FileConflict {
                            path: format!("/{}", path),
                            owner: owner.clone(),
                            claimant: claimant.clone(),
                        });
                    }
                }
                None => {
                    if protect.is_protected(&path) {
                        continue;
                    }
                    let Ok(target) = safe_join(self.rootfs, &path) else {
                        continue;
                    };
                    if let Ok(meta) = target.symlink_metadata()
                        && !meta.is_dir()
                    {
                        conflicts.push(Error::FileConflict {
                            path: format!("/{}", path),
                            owner: "the filesystem".to_string(),
                            claimant: claimant.clone(),
                        });
                    }
                }
            }
        }
        conflicts
    }
}
