// src/error.rs

use thiserror::Error;

/// Core error types for Quarry
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization errors for repository descriptors and metadata
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Malformed package string, version or metadata
    #[error("Parse error: {0}")]
    ParseError(String),

    /// No admissible candidate exists for a required package
    #[error("no valid candidate found for {package}")]
    Unsatisfiable { package: String },

    /// Two packages (or a package and the installed world) cannot coexist
    #[error("Conflict: {0}")]
    ConflictError(String),

    /// A path is claimed by more than one package
    #[error("File conflict: {path} is provided by {owner} and {claimant}")]
    FileConflict {
        path: String,
        owner: String,
        claimant: String,
    },

    /// Transport failure
    #[error("Download error: {0}")]
    DownloadError(String),

    /// Artifact checksum did not match the catalog entry
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Record already present when creating
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Record absent when looking up or removing
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// Path escapes the target root
    #[error("Path traversal attempt: {0}")]
    PathTraversal(String),

    /// Invalid path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Finalizer execution failed
    #[error("Finalizer error: {0}")]
    FinalizerError(String),

    /// Transaction-level failure (journal, apply phase)
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Another transaction holds the lock
    #[error("Lock error: {0}")]
    LockError(String),

    /// Operation aborted by the user at the confirmation prompt
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Combined failure from a concurrent task swarm
    #[error("{} task(s) failed: {}", .0.len(), .0.join("; "))]
    Aggregate(Vec<String>),

    /// Nothing left to do after filtering; callers treat this as success
    #[error("no packages to install")]
    NothingToDo,
}

impl Error {
    /// True for conditions callers report as a notice rather than a failure
    pub fn is_notice(&self) -> bool {
        matches!(self, Error::NothingToDo)
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::ConfigError(e.to_string())
    }
}

/// Result type alias using Quarry's Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsatisfiable_names_package() {
        let err = Error::Unsatisfiable {
            package: "pkg/y".to_string(),
        };
        assert_eq!(err.to_string(), "no valid candidate found for pkg/y");
    }

    #[test]
    fn test_aggregate_display() {
        let err = Error::Aggregate(vec!["a failed".to_string(), "b failed".to_string()]);
        assert_eq!(err.to_string(), "2 task(s) failed: a failed; b failed");
    }

    #[test]
    fn test_nothing_to_do_is_notice() {
        assert!(Error::NothingToDo.is_notice());
        assert!(!Error::NotFoundError("x".into()).is_notice());
    }
}
