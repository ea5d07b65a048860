// src/db/sqlite.rs

//! SQLite-backed package database

use super::models::{FileEntry, FinalizerEntry, PackageEntry};
use super::{PackageDatabase, normalize_file_path};
use crate::error::{Error, Result};
use crate::package::{Finalizer, Identity, Package};
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Persistent store for the installed world
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Open an initialized database file
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = super::open(db_path)?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an already migrated connection
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::TransactionError("database connection lock poisoned".into()))
    }

    fn entry_for(conn: &Connection, pkg: &Package) -> Result<PackageEntry> {
        PackageEntry::find_by_identity(conn, &pkg.identity())?
            .filter(|entry| entry.version == pkg.version.to_string())
            .ok_or_else(|| Error::NotFoundError(pkg.fingerprint()))
    }
}

impl PackageDatabase for SqliteDatabase {
    fn create_package(&self, pkg: &Package) -> Result<()> {
        let conn = self.conn()?;
        if let Some(existing) = PackageEntry::find_by_identity(&conn, &pkg.identity())? {
            return Err(Error::AlreadyExists(format!(
                "{}/{}@{}",
                existing.category, existing.name, existing.version
            )));
        }
        PackageEntry::from_package(pkg)?.insert(&conn)?;
        debug!("Registered {}", pkg);
        Ok(())
    }

    fn update_package(&self, pkg: &Package) -> Result<()> {
        let conn = self.conn()?;
        let existing = PackageEntry::find_by_identity(&conn, &pkg.identity())?
            .ok_or_else(|| Error::NotFoundError(pkg.identity().to_string()))?;
        let mut entry = PackageEntry::from_package(pkg)?;
        entry.id = existing.id;
        entry.update(&conn)
    }

    fn get_package(&self, identity: &Identity) -> Result<Option<Package>> {
        let conn = self.conn()?;
        PackageEntry::find_by_identity(&conn, identity)?
            .map(|entry| entry.to_package())
            .transpose()
    }

    fn remove_package(&self, pkg: &Package) -> Result<()> {
        let conn = self.conn()?;
        let entry = Self::entry_for(&conn, pkg)?;
        if let Some(id) = entry.id {
            PackageEntry::delete(&conn, id)?;
        }
        debug!("Removed {} from database", pkg);
        Ok(())
    }

    fn world(&self) -> Result<Vec<Package>> {
        let conn = self.conn()?;
        PackageEntry::list_all(&conn)?
            .iter()
            .map(PackageEntry::to_package)
            .collect()
    }

    fn set_files(&self, pkg: &Package, files: &[String]) -> Result<()> {
        let mut conn = self.conn()?;
        let id = Self::entry_for(&conn, pkg)?
            .id
            .ok_or_else(|| Error::NotFoundError(pkg.fingerprint()))?;

        super::transaction(&mut *conn, |tx| {
            FileEntry::delete_by_package(tx, id)?;
            for path in files {
                FileEntry::new(id, normalize_file_path(path)).insert(tx)?;
            }
            Ok(())
        })
    }

    fn get_files(&self, pkg: &Package) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let Some(id) = Self::entry_for(&conn, pkg)?.id else {
            return Ok(Vec::new());
        };
        Ok(FileEntry::find_by_package(&conn, id)?
            .into_iter()
            .map(|f| f.path)
            .collect())
    }

    fn remove_files(&self, pkg: &Package) -> Result<()> {
        let conn = self.conn()?;
        if let Some(id) = Self::entry_for(&conn, pkg)?.id {
            FileEntry::delete_by_package(&conn, id)?;
        }
        Ok(())
    }

    fn set_finalizer(&self, pkg: &Package, finalizer: &Finalizer) -> Result<()> {
        let conn = self.conn()?;
        let id = Self::entry_for(&conn, pkg)?
            .id
            .ok_or_else(|| Error::NotFoundError(pkg.fingerprint()))?;
        FinalizerEntry::new(id, finalizer)?.upsert(&conn)
    }

    fn get_finalizer(&self, pkg: &Package) -> Result<Option<Finalizer>> {
        let conn = self.conn()?;
        let Some(id) = Self::entry_for(&conn, pkg)?.id else {
            return Ok(None);
        };
        FinalizerEntry::find_by_package(&conn, id)?
            .map(|entry| entry.to_finalizer())
            .transpose()
    }

    fn remove_finalizer(&self, pkg: &Package) -> Result<()> {
        let conn = self.conn()?;
        if let Some(id) = Self::entry_for(&conn, pkg)?.id {
            FinalizerEntry::delete(&conn, id)?;
        }
        Ok(())
    }

    fn file_owners(&self) -> Result<HashMap<String, String>> {
        let conn = self.conn()?;
        Ok(FileEntry::list_owners(&conn)?
            .into_iter()
            .map(|(path, category, name, version)| {
                (path, format!("{}/{}@{}", category, name, version))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::TempDir;

    fn create_test_db() -> (TempDir, SqliteDatabase) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("quarry.db");
        let path = path.to_str().unwrap();
        db::init(path).unwrap();
        (temp_dir, SqliteDatabase::open(path).unwrap())
    }

    #[test]
    fn test_create_twice_is_already_exists() {
        let (_dir, store) = create_test_db();
        let pkg = Package::new("app", "foo", "1.0").unwrap();
        store.create_package(&pkg).unwrap();

        let other = Package::new("app", "foo", "2.0").unwrap();
        assert!(matches!(
            store.create_package(&other),
            Err(Error::AlreadyExists(_))
        ));
        assert_eq!(store.world().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_absent_is_not_found() {
        let (_dir, store) = create_test_db();
        let pkg = Package::new("app", "foo", "1.0").unwrap();
        assert!(matches!(
            store.remove_package(&pkg),
            Err(Error::NotFoundError(_))
        ));
    }

    #[test]
    fn test_files_and_owner_lookup() {
        let (_dir, store) = create_test_db();
        let pkg = Package::new("app", "foo", "1.0").unwrap();
        store.create_package(&pkg).unwrap();
        store
            .set_files(&pkg, &["/usr/bin/foo".to_string(), "etc/foo.conf".to_string()])
            .unwrap();

        assert_eq!(
            store.get_files(&pkg).unwrap(),
            vec!["etc/foo.conf".to_string(), "usr/bin/foo".to_string()]
        );
        let owner = store.find_file_owner("/usr/bin/foo").unwrap().unwrap();
        assert!(owner.same_as(&pkg));
        assert!(store.find_file_owner("usr/bin/none").unwrap().is_none());

        store.remove_files(&pkg).unwrap();
        assert!(store.get_files(&pkg).unwrap().is_empty());
    }

    #[test]
    fn test_update_package_replaces_definition() {
        let (_dir, store) = create_test_db();
        let pkg = Package::new("app", "foo", "1.0").unwrap();
        store.create_package(&pkg).unwrap();

        let respin = pkg.clone().with_label("build", "2");
        store.update_package(&respin).unwrap();
        let stored = store.get_package(&pkg.identity()).unwrap().unwrap();
        assert_eq!(stored.labels.get("build").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_finalizer_round_trip() {
        let (_dir, store) = create_test_db();
        let pkg = Package::new("app", "foo", "1.0").unwrap();
        store.create_package(&pkg).unwrap();
        assert!(store.get_finalizer(&pkg).unwrap().is_none());

        let fin = Finalizer {
            install: vec!["echo hi".into()],
            ..Default::default()
        };
        store.set_finalizer(&pkg, &fin).unwrap();
        assert_eq!(store.get_finalizer(&pkg).unwrap(), Some(fin));
        store.remove_finalizer(&pkg).unwrap();
        assert!(store.get_finalizer(&pkg).unwrap().is_none());
    }
}
