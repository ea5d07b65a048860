// src/db/mod.rs

//! Package database layer
//!
//! The rest of the crate talks to the installed world through the
//! [`PackageDatabase`] capability: create/find/remove packages, per-package
//! file lists and finalizers, and enumeration of the world. Two backends
//! implement it:
//!
//! - [`SqliteDatabase`]: the persistent store (rusqlite, WAL journal)
//! - [`MemoryDatabase`]: an in-process store for pretend runs and tests
//!
//! This module also holds the SQLite connection helpers shared by the
//! sqlite backend, its migrations and its row models.

pub mod memory;
pub mod models;
pub mod schema;
pub mod sqlite;

pub use memory::MemoryDatabase;
pub use sqlite::SqliteDatabase;

use crate::config::{Config, DatabaseEngine};
use crate::error::{Error, Result};
use crate::package::{Finalizer, Identity, Package, PackageRef, Stone};
use rusqlite::{Connection, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Query capability over the installed world
///
/// Implementations must be safe for concurrent reads. The world holds
/// exactly one package per identity.
pub trait PackageDatabase: Send + Sync {
    /// Register a package; fails with `AlreadyExists` if its identity is present
    fn create_package(&self, pkg: &Package) -> Result<()>;

    /// Replace the stored definition of an installed package
    fn update_package(&self, pkg: &Package) -> Result<()>;

    /// The installed package with this identity, if any
    fn get_package(&self, identity: &Identity) -> Result<Option<Package>>;

    /// Remove a package row; fails with `NotFoundError` if it is absent
    fn remove_package(&self, pkg: &Package) -> Result<()>;

    /// Every installed package
    fn world(&self) -> Result<Vec<Package>>;

    fn set_files(&self, pkg: &Package, files: &[String]) -> Result<()>;
    fn get_files(&self, pkg: &Package) -> Result<Vec<String>>;
    fn remove_files(&self, pkg: &Package) -> Result<()>;

    fn set_finalizer(&self, pkg: &Package, finalizer: &Finalizer) -> Result<()>;
    fn get_finalizer(&self, pkg: &Package) -> Result<Option<Finalizer>>;
    fn remove_finalizer(&self, pkg: &Package) -> Result<()>;

    /// Map of every tracked file path to the fingerprint of its owner
    fn file_owners(&self) -> Result<HashMap<String, String>>;

    /// Installed packages admitted by a reference
    fn find_by_ref(&self, reference: &PackageRef) -> Result<Vec<Package>> {
        Ok(self
            .get_package(reference.identity())?
            .filter(|pkg| reference.matches(pkg))
            .into_iter()
            .collect())
    }

    /// The installed package with exactly this identity and version
    fn find_exact(&self, pkg: &Package) -> Result<Option<Package>> {
        Ok(self
            .get_package(&pkg.identity())?
            .filter(|installed| installed.version == pkg.version))
    }

    fn is_installed(&self, pkg: &Package) -> Result<bool> {
        Ok(self.find_exact(pkg)?.is_some())
    }

    /// The package owning a file path
    fn find_file_owner(&self, path: &str) -> Result<Option<Package>> {
        let path = normalize_file_path(path);
        let owners = self.file_owners()?;
        let Some(fingerprint) = owners.get(&path) else {
            return Ok(None);
        };
        Ok(self
            .world()?
            .into_iter()
            .find(|pkg| &pkg.fingerprint() == fingerprint))
    }

    /// Installed packages as lightweight records with their files
    fn stones(&self) -> Result<Vec<Stone>> {
        self.world()?
            .into_iter()
            .map(|pkg| {
                let files = self.get_files(&pkg)?;
                Ok(pkg.to_stone(files))
            })
            .collect()
    }
}

/// File paths are stored relative to the rootfs, without a leading slash
pub fn normalize_file_path(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

/// Open the configured database backend
pub fn open_database(config: &Config) -> Result<Arc<dyn PackageDatabase>> {
    match config.system.database_engine {
        DatabaseEngine::Sqlite => {
            let path = config.system.database_path.to_string_lossy().to_string();
            init(&path)?;
            Ok(Arc::new(SqliteDatabase::open(&path)?))
        }
        DatabaseEngine::Memory => Ok(Arc::new(MemoryDatabase::new())),
    }
}

/// Initialize a new Quarry database at the specified path
///
/// Creates the database file and applies pending schema migrations.
/// This is idempotent - calling it on an existing database is safe.
pub fn init(db_path: &str) -> Result<()> {
    debug!("Initializing database at: {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::InitError(format!("Failed to create database directory: {}", e)))?;
    }

    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    schema::migrate(&conn)?;

    info!("Database initialized at {}", db_path);
    Ok(())
}

/// Open an existing Quarry database
pub fn open(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        return Err(Error::DatabaseNotFound(db_path.to_string()));
    }

    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    Ok(conn)
}

/// Run `f` inside a SQLite transaction, committing only on success
pub fn transaction<T, F>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&Transaction) -> Result<T>,
{
    let tx = conn.transaction()?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_init_creates_database() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap().to_string();
        drop(temp_file);

        init(&db_path).unwrap();
        assert!(Path::new(&db_path).exists());
        // Second init is a no-op
        init(&db_path).unwrap();
    }

    #[test]
    fn test_open_nonexistent_database() {
        let result = open("/nonexistent/path/db.sqlite");
        assert!(matches!(result.unwrap_err(), Error::DatabaseNotFound(_)));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        init(db_path).unwrap();
        let mut conn = open(db_path).unwrap();

        let result: Result<()> = transaction(&mut conn, |tx| {
            tx.execute(
                "INSERT INTO packages (category, name, version, definition) VALUES ('a', 'b', '1', '{}')",
                [],
            )?;
            Err(Error::TransactionError("boom".into()))
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM packages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_normalize_file_path() {
        assert_eq!(normalize_file_path("/usr/bin/tool"), "usr/bin/tool");
        assert_eq!(normalize_file_path("usr/bin/tool"), "usr/bin/tool");
    }
}
