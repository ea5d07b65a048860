// src/db/models/package_entry.rs

//! PackageEntry model - one installed package per identity

use crate::error::{Error, Result};
use crate::package::{Identity, Package};
use rusqlite::{Connection, OptionalExtension, Row, params};

/// A row of the `packages` table
#[derive(Debug, Clone)]
pub struct PackageEntry {
    pub id: Option<i64>,
    pub category: String,
    pub name: String,
    pub version: String,
    pub repository: Option<String>,
    /// Full package definition serialized as JSON
    pub definition: String,
    pub installed_at: Option<String>,
}

impl PackageEntry {
    /// Build an entry from a package definition
    pub fn from_package(pkg: &Package) -> Result<Self> {
        Ok(Self {
            id: None,
            category: pkg.category.clone(),
            name: pkg.name.clone(),
            version: pkg.version.to_string(),
            repository: pkg.repository.clone(),
            definition: serde_json::to_string(pkg)?,
            installed_at: None,
        })
    }

    /// Decode the stored definition
    pub fn to_package(&self) -> Result<Package> {
        serde_json::from_str(&self.definition).map_err(|e| {
            Error::ParseError(format!(
                "Corrupt definition for {}/{}: {}",
                self.category, self.name, e
            ))
        })
    }

    /// Insert this package into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO packages (category, name, version, repository, definition)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &self.category,
                &self.name,
                &self.version,
                &self.repository,
                &self.definition,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Rewrite version, repository and definition of an existing row
    pub fn update(&self, conn: &Connection) -> Result<()> {
        let id = self
            .id
            .ok_or_else(|| Error::NotFoundError(format!("{}/{}", self.category, self.name)))?;
        conn.execute(
            "UPDATE packages SET version = ?1, repository = ?2, definition = ?3 WHERE id = ?4",
            params![&self.version, &self.repository, &self.definition, id],
        )?;
        Ok(())
    }

    /// Find the package installed under an identity
    pub fn find_by_identity(conn: &Connection, identity: &Identity) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, category, name, version, repository, definition, installed_at
             FROM packages WHERE category = ?1 AND name = ?2",
        )?;

        let entry = stmt
            .query_row(params![&identity.category, &identity.name], Self::from_row)
            .optional()?;

        Ok(entry)
    }

    /// List all installed packages
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, category, name, version, repository, definition, installed_at
             FROM packages ORDER BY category, name",
        )?;

        let entries = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Delete by id; files and finalizer rows cascade
    pub fn delete(conn: &Connection, id: i64) -> Result<()> {
        conn.execute("DELETE FROM packages WHERE id = ?1", [id])?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            category: row.get(1)?,
            name: row.get(2)?,
            version: row.get(3)?,
            repository: row.get(4)?,
            definition: row.get(5)?,
            installed_at: row.get(6)?,
        })
    }
}
