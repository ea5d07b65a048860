// src/db/models/file_entry.rs

//! FileEntry model - files installed by a package

use crate::error::Result;
use rusqlite::{Connection, Row, params};

/// A file path owned by an installed package
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub id: Option<i64>,
    pub package_id: i64,
    pub path: String,
}

impl FileEntry {
    pub fn new(package_id: i64, path: String) -> Self {
        Self {
            id: None,
            package_id,
            path,
        }
    }

    /// Insert this file into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT OR IGNORE INTO files (package_id, path) VALUES (?1, ?2)",
            params![&self.package_id, &self.path],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find all files belonging to a package
    pub fn find_by_package(conn: &Connection, package_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, path FROM files WHERE package_id = ?1 ORDER BY path",
        )?;

        let files = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(files)
    }

    /// Every tracked path with the identity and version of its owner
    pub fn list_owners(conn: &Connection) -> Result<Vec<(String, String, String, String)>> {
        let mut stmt = conn.prepare(
            "SELECT f.path, p.category, p.name, p.version
             FROM files f JOIN packages p ON p.id = f.package_id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Delete every file row of a package
    pub fn delete_by_package(conn: &Connection, package_id: i64) -> Result<usize> {
        let count = conn.execute("DELETE FROM files WHERE package_id = ?1", [package_id])?;
        Ok(count)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            package_id: row.get(1)?,
            path: row.get(2)?,
        })
    }
}
