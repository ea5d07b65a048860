// src/db/memory.rs

//! In-memory package database

use super::{PackageDatabase, normalize_file_path};
use crate::error::{Error, Result};
use crate::package::{Finalizer, Identity, Package};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct State {
    packages: BTreeMap<Identity, Package>,
    /// Keyed by package fingerprint
    files: HashMap<String, Vec<String>>,
    finalizers: HashMap<String, Finalizer>,
}

/// Volatile store, used for pretend runs and tests
#[derive(Default)]
pub struct MemoryDatabase {
    state: RwLock<State>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with installed packages
    pub fn with_packages(packages: impl IntoIterator<Item = Package>) -> Result<Self> {
        let store = Self::new();
        for pkg in packages {
            store.create_package(&pkg)?;
        }
        Ok(store)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| Error::TransactionError("memory database lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| Error::TransactionError("memory database lock poisoned".into()))
    }

    fn require_installed(state: &State, pkg: &Package) -> Result<()> {
        match state.packages.get(&pkg.identity()) {
            Some(installed) if installed.version == pkg.version => Ok(()),
            _ => Err(Error::NotFoundError(pkg.fingerprint())),
        }
    }
}

impl PackageDatabase for MemoryDatabase {
    fn create_package(&self, pkg: &Package) -> Result<()> {
        let mut state = self.write()?;
        if let Some(existing) = state.packages.get(&pkg.identity()) {
            return Err(Error::AlreadyExists(existing.fingerprint()));
        }
        state.packages.insert(pkg.identity(), pkg.clone());
        Ok(())
    }

    fn update_package(&self, pkg: &Package) -> Result<()> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        match state.packages.get_mut(&pkg.identity()) {
            Some(slot) => {
                let old = slot.fingerprint();
                *slot = pkg.clone();
                // Keep rows keyed by the current fingerprint
                if old != pkg.fingerprint() {
                    if let Some(files) = state.files.remove(&old) {
                        state.files.insert(pkg.fingerprint(), files);
                    }
                    if let Some(fin) = state.finalizers.remove(&old) {
                        state.finalizers.insert(pkg.fingerprint(), fin);
                    }
                }
                Ok(())
            }
            None => Err(Error::NotFoundError(pkg.identity().to_string())),
        }
    }

    fn get_package(&self, identity: &Identity) -> Result<Option<Package>> {
        Ok(self.read()?.packages.get(identity).cloned())
    }

    fn remove_package(&self, pkg: &Package) -> Result<()> {
        let mut state = self.write()?;
        Self::require_installed(&state, pkg)?;
        state.packages.remove(&pkg.identity());
        state.files.remove(&pkg.fingerprint());
        state.finalizers.remove(&pkg.fingerprint());
        Ok(())
    }

    fn world(&self) -> Result<Vec<Package>> {
        Ok(self.read()?.packages.values().cloned().collect())
    }

    fn set_files(&self, pkg: &Package, files: &[String]) -> Result<()> {
        let mut state = self.write()?;
        Self::require_installed(&state, pkg)?;
        let mut files: Vec<String> = files.iter().map(|f| normalize_file_path(f)).collect();
        files.sort();
        files.dedup();
        state.files.insert(pkg.fingerprint(), files);
        Ok(())
    }

    fn get_files(&self, pkg: &Package) -> Result<Vec<String>> {
        let state = self.read()?;
        Self::require_installed(&state, pkg)?;
        Ok(state
            .files
            .get(&pkg.fingerprint())
            .cloned()
            .unwrap_or_default())
    }

    fn remove_files(&self, pkg: &Package) -> Result<()> {
        self.write()?.files.remove(&pkg.fingerprint());
        Ok(())
    }

    fn set_finalizer(&self, pkg: &Package, finalizer: &Finalizer) -> Result<()> {
        let mut state = self.write()?;
        Self::require_installed(&state, pkg)?;
        state.finalizers.insert(pkg.fingerprint(), finalizer.clone());
        Ok(())
    }

    fn get_finalizer(&self, pkg: &Package) -> Result<Option<Finalizer>> {
        Ok(self.read()?.finalizers.get(&pkg.fingerprint()).cloned())
    }

    fn remove_finalizer(&self, pkg: &Package) -> Result<()> {
        self.write()?.finalizers.remove(&pkg.fingerprint());
        Ok(())
    }

    fn file_owners(&self) -> Result<HashMap<String, String>> {
        let state = self.read()?;
        Ok(state
            .files
            .iter()
            .flat_map(|(owner, files)| files.iter().map(move |f| (f.clone(), owner.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::PackageRef;

    #[test]
    fn test_one_package_per_identity() {
        let store = MemoryDatabase::new();
        store
            .create_package(&Package::new("lib", "bar", "1.0").unwrap())
            .unwrap();
        let err = store
            .create_package(&Package::new("lib", "bar", "2.0").unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(ref s) if s == "lib/bar@1.0"));
    }

    #[test]
    fn test_find_by_ref_and_exact() {
        let bar = Package::new("lib", "bar", "1.0").unwrap();
        let store = MemoryDatabase::with_packages([bar.clone()]).unwrap();

        let hits = store
            .find_by_ref(&PackageRef::parse("lib/bar>=1.0").unwrap())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(
            store
                .find_by_ref(&PackageRef::parse("lib/bar>=2.0").unwrap())
                .unwrap()
                .is_empty()
        );

        assert!(store.is_installed(&bar).unwrap());
        assert!(
            !store
                .is_installed(&Package::new("lib", "bar", "2.0").unwrap())
                .unwrap()
        );
    }

    #[test]
    fn test_remove_drops_files_and_finalizer() {
        let bar = Package::new("lib", "bar", "1.0").unwrap();
        let store = MemoryDatabase::with_packages([bar.clone()]).unwrap();
        store.set_files(&bar, &["/usr/lib/libbar.so".into()]).unwrap();
        store.set_finalizer(&bar, &Finalizer::default()).unwrap();

        assert_eq!(store.file_owners().unwrap().len(), 1);
        store.remove_package(&bar).unwrap();
        assert!(store.file_owners().unwrap().is_empty());
        assert!(store.get_finalizer(&bar).unwrap().is_none());
        assert!(matches!(
            store.remove_package(&bar),
            Err(Error::NotFoundError(_))
        ));
    }

    #[test]
    fn test_stones_include_files() {
        let bar = Package::new("lib", "bar", "1.0").unwrap();
        let store = MemoryDatabase::with_packages([bar.clone()]).unwrap();
        store.set_files(&bar, &["usr/lib/b".into(), "usr/lib/a".into()]).unwrap();

        let stones = store.stones().unwrap();
        assert_eq!(stones.len(), 1);
        assert_eq!(stones[0].files, vec!["usr/lib/a", "usr/lib/b"]);
        assert_eq!(stones[0].to_string(), "lib/bar@1.0");
    }
}
