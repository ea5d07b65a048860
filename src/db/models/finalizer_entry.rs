// src/db/models/finalizer_entry.rs

//! FinalizerEntry model - install/uninstall command bundles

use crate::error::{Error, Result};
use crate::package::Finalizer;
use rusqlite::{Connection, OptionalExtension, params};

/// The finalizer row of an installed package
#[derive(Debug, Clone)]
pub struct FinalizerEntry {
    pub package_id: i64,
    pub definition: String,
}

impl FinalizerEntry {
    pub fn new(package_id: i64, finalizer: &Finalizer) -> Result<Self> {
        Ok(Self {
            package_id,
            definition: serde_json::to_string(finalizer)?,
        })
    }

    pub fn to_finalizer(&self) -> Result<Finalizer> {
        serde_json::from_str(&self.definition)
            .map_err(|e| Error::ParseError(format!("Corrupt finalizer row: {}", e)))
    }

    /// Insert or replace the finalizer of a package
    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO finalizers (package_id, definition) VALUES (?1, ?2)
             ON CONFLICT(package_id) DO UPDATE SET definition = excluded.definition",
            params![&self.package_id, &self.definition],
        )?;
        Ok(())
    }

    pub fn find_by_package(conn: &Connection, package_id: i64) -> Result<Option<Self>> {
        let entry = conn
            .query_row(
                "SELECT package_id, definition FROM finalizers WHERE package_id = ?1",
                [package_id],
                |row| {
                    Ok(Self {
                        package_id: row.get(0)?,
                        definition: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    pub fn delete(conn: &Connection, package_id: i64) -> Result<()> {
        conn.execute("DELETE FROM finalizers WHERE package_id = ?1", [package_id])?;
        Ok(())
    }
}
