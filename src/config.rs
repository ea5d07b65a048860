// src/config.rs

//! Runtime configuration
//!
//! A single [`Config`] value is built at startup (from a TOML file, falling
//! back to defaults) and handed by reference to the solver, the installer and
//! the repository sync functions. Nothing reads configuration from globals.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/quarry/quarry.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub system: SystemConfig,
    pub general: GeneralConfig,
    pub solver: SolverConfig,
    pub config_protect: ConfigProtectConfig,
    /// Directories holding repository descriptor YAML files
    pub repos_confdir: Vec<PathBuf>,
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Target root filesystem
    pub rootfs: PathBuf,
    /// Package database file (sqlite engine)
    pub database_path: PathBuf,
    pub database_engine: DatabaseEngine,
    /// Downloaded artifacts
    pub pkgs_cache_path: PathBuf,
    /// Synced repository catalogs
    pub repos_database_path: PathBuf,
    /// Staging area for extraction
    pub tmpdir: PathBuf,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            rootfs: PathBuf::from("/"),
            database_path: PathBuf::from("/var/lib/quarry/quarry.db"),
            database_engine: DatabaseEngine::Sqlite,
            pkgs_cache_path: PathBuf::from("/var/cache/quarry/packages"),
            repos_database_path: PathBuf::from("/var/cache/quarry/repos"),
            tmpdir: std::env::temp_dir(),
        }
    }
}

/// Package database backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    #[default]
    Sqlite,
    Memory,
}

/// Concurrency and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Upper bound on concurrently running tasks
    pub concurrency: usize,
    pub http_timeout_secs: u64,
    pub finalizer_timeout_secs: u64,
    /// Run finalizers when the rootfs is not `/`
    pub finalizers_outside_root: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            http_timeout_secs: 30,
            finalizer_timeout_secs: 60,
            finalizers_outside_root: false,
        }
    }
}

/// Number of CPUs, or 1 when it cannot be determined
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Which resolution algorithm drives Install/Upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverStrategy {
    #[default]
    Greedy,
    Sat,
}

/// Solver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub strategy: SolverStrategy,
    /// Maximum attempts of the relaxation fallback
    pub relax_attempts: usize,
    /// Weight increase applied to a clause each time it blocks a model
    pub relax_rate: f64,
    /// Decay applied to all weights between attempts
    pub relax_discount: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            strategy: SolverStrategy::Greedy,
            relax_attempts: 100,
            relax_rate: 0.7,
            relax_discount: 1.0,
        }
    }
}

/// Config protection rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigProtectConfig {
    pub enabled: bool,
    /// Path prefixes protected for every package
    pub paths: Vec<String>,
}

impl Default for ConfigProtectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            paths: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", path.display());
        let content = fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Load the file if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.general.concurrency == 0 {
            return Err(Error::ConfigError(
                "general.concurrency must be at least 1".to_string(),
            ));
        }
        if !self.system.rootfs.is_absolute() {
            return Err(Error::ConfigError(format!(
                "system.rootfs must be absolute, got {}",
                self.system.rootfs.display()
            )));
        }
        Ok(())
    }

    /// Builder used by the CLI and tests to retarget the root filesystem
    pub fn with_rootfs(mut self, rootfs: impl Into<PathBuf>) -> Self {
        self.system.rootfs = rootfs.into();
        self
    }

    /// Directory holding the operation journal and the lock file
    pub fn state_dir(&self) -> PathBuf {
        self.system
            .database_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Lay every state path out under a single base directory
    pub fn rooted_at(base: &Path) -> Self {
        let mut config = Self::default();
        config.system.rootfs = base.join("rootfs");
        config.system.database_path = base.join("state").join("quarry.db");
        config.system.pkgs_cache_path = base.join("cache").join("packages");
        config.system.repos_database_path = base.join("cache").join("repos");
        config.system.tmpdir = base.join("tmp");
        config.repos_confdir = vec![base.join("repos.conf.d")];
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.system.rootfs, PathBuf::from("/"));
        assert!(config.general.concurrency >= 1);
        assert_eq!(config.general.http_timeout_secs, 30);
        assert_eq!(config.solver.strategy, SolverStrategy::Greedy);
        assert!(config.config_protect.enabled);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = Config::parse(
            r#"
repos_confdir = ["/etc/quarry/repos.conf.d"]

[system]
rootfs = "/mnt/target"
database_engine = "memory"

[general]
concurrency = 4

[solver]
strategy = "sat"

[config_protect]
paths = ["/etc"]
"#,
        )
        .unwrap();

        assert_eq!(config.system.rootfs, PathBuf::from("/mnt/target"));
        assert_eq!(config.system.database_engine, DatabaseEngine::Memory);
        assert_eq!(config.general.concurrency, 4);
        assert_eq!(config.general.finalizer_timeout_secs, 60);
        assert_eq!(config.solver.strategy, SolverStrategy::Sat);
        assert_eq!(config.config_protect.paths, vec!["/etc".to_string()]);
        assert_eq!(config.repos_confdir.len(), 1);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let err = Config::parse("[general]\nconcurrency = 0\n").unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_validate_rejects_relative_rootfs() {
        assert!(Config::parse("[system]\nrootfs = \"relative\"\n").is_err());
    }

    #[test]
    fn test_rooted_at_layout() {
        let config = Config::rooted_at(Path::new("/tmp/q"));
        assert_eq!(config.state_dir(), PathBuf::from("/tmp/q/state"));
        assert_eq!(config.system.rootfs, PathBuf::from("/tmp/q/rootfs"));
    }
}
