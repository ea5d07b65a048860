// src/repository/mod.rs

//! Repositories and their artifact catalogs
//!
//! This module provides:
//! - Repository descriptors loaded from YAML files ([`Repository`])
//! - Package artifacts and their metadata ([`PackageArtifact`])
//! - Catalog loading and searching across enabled repositories ([`Repositories`])
//! - Transport clients for disk and HTTP repositories ([`Client`])
//! - Synchronization of remote catalogs into the local repository database

mod artifact;
mod catalog;
mod client;
mod sync;

pub use artifact::{ArtifactsPack, PackageArtifact};
pub use catalog::{Catalog, Repositories, sort_candidates};
pub use client::{Client, HttpClient, LocalClient, new_client};
pub use sync::{current_timestamp, is_up_to_date, sync, sync_all};

use crate::compression::CompressionType;
use crate::error::{Error, Result};
use crate::hash::Checksums;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the identity file at the root of every repository
pub const REPOSITORY_SPEC_FILE: &str = "repository.yaml";

/// Keys of [`Repository::repo_files`]
pub const TREE_KEY: &str = "tree";
pub const COMPILER_TREE_KEY: &str = "compilertree";
pub const META_KEY: &str = "meta";

/// Transport used to reach a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryType {
    #[default]
    Disk,
    Http,
    Docker,
}

impl std::fmt::Display for RepositoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disk => "disk",
            Self::Http => "http",
            Self::Docker => "docker",
        };
        write!(f, "{}", s)
    }
}

/// A file published by a repository (tree or meta tarball)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryFile {
    pub filename: String,
    #[serde(default, rename = "compressiontype")]
    pub compression_type: CompressionType,
    #[serde(default)]
    pub checksums: Checksums,
}

fn default_true() -> bool {
    true
}

fn default_treepath() -> String {
    "treefs".to_string()
}

/// Repository descriptor
///
/// The same shape is used for the descriptor files under the configured
/// directories and for the `repository.yaml` identity published by the
/// repository itself, which additionally fills `repo_files`, `revision`
/// and `last_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(rename = "type", default)]
    pub kind: RepositoryType,
    /// Lower is preferred
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub authentication: BTreeMap<String, String>,
    #[serde(default = "default_treepath")]
    pub treepath: String,
    #[serde(default = "default_treepath")]
    pub metapath: String,
    #[serde(default)]
    pub verify: bool,
    #[serde(default)]
    pub revision: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_update: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub repo_files: BTreeMap<String, RepositoryFile>,
}

impl Repository {
    pub fn new(name: &str, kind: RepositoryType, urls: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            urls,
            kind,
            priority: 0,
            enable: true,
            cached: false,
            authentication: BTreeMap::new(),
            treepath: default_treepath(),
            metapath: default_treepath(),
            verify: false,
            revision: 0,
            last_update: String::new(),
            repo_files: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_enabled(mut self, enable: bool) -> Self {
        self.enable = enable;
        self
    }

    /// Read a descriptor or identity file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let repo: Repository = serde_yaml::from_str(&content).map_err(|e| {
            Error::ParseError(format!("Invalid repository file {}: {}", path.display(), e))
        })?;
        if repo.name.trim().is_empty() {
            return Err(Error::ParseError(format!(
                "Repository file {} has no name",
                path.display()
            )));
        }
        Ok(repo)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Local directory holding this repository's synced catalog
    pub fn local_dir(&self, repos_database_path: &Path) -> PathBuf {
        repos_database_path.join(&self.name)
    }

    pub fn file(&self, key: &str) -> Option<&RepositoryFile> {
        self.repo_files.get(key)
    }
}

/// Read every repository descriptor from the given directories
///
/// Files ending in `.yml` or `.yaml` are loaded in name order; a missing
/// directory is skipped. When two descriptors share a name the first wins.
/// The result is sorted by priority.
pub fn load_repositories(dirs: &[PathBuf]) -> Result<Vec<Repository>> {
    let mut repos: Vec<Repository> = Vec::new();

    for dir in dirs {
        if !dir.is_dir() {
            debug!("Repository directory {} does not exist", dir.display());
            continue;
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("yml") | Some("yaml")
                    )
            })
            .collect();
        paths.sort();

        for path in paths {
            let repo = Repository::load(&path)?;
            if repos.iter().any(|r| r.name == repo.name) {
                warn!(
                    "Duplicate repository '{}' in {}, ignoring",
                    repo.name,
                    path.display()
                );
                continue;
            }
            debug!("Loaded repository '{}' from {}", repo.name, path.display());
            repos.push(repo);
        }
    }

    repos.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
    Ok(repos)
}
