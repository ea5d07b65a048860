// src/commands/mod.rs
//! Command handlers for the Quarry CLI

mod database;
mod doctor;
mod install;
mod query;
mod repo;

pub use database::{cmd_database_create, cmd_database_remove};
pub use doctor::cmd_doctor;
pub use install::{cmd_install, cmd_reinstall, cmd_uninstall, cmd_upgrade};
pub use query::{SearchOptions, cmd_query_files, cmd_query_orphans, cmd_query_owner, cmd_search};
pub use repo::{cmd_repo_list, cmd_repo_update};

use crate::cli::TransactionArgs;
use anyhow::{Context, Result};
use quarry::db::{self, PackageDatabase};
use quarry::installer::{AlwaysYes, StdinPrompt};
use quarry::{Config, Error, InstallOpts, Installer, PackageRef, Repositories};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Load the configuration file and apply command-line overrides
pub fn load_config(path: &Path, rootfs: Option<PathBuf>) -> Result<Config> {
    let mut config = Config::load_or_default(path)
        .with_context(|| format!("Failed to load configuration {}", path.display()))?;
    if let Some(rootfs) = rootfs {
        config = config.with_rootfs(rootfs);
    }
    Ok(config)
}

pub fn open_db(config: &Config) -> Result<Arc<dyn PackageDatabase>> {
    db::open_database(config).context("Failed to open package database")
}

pub fn open_installer(config: &Config, yes: bool) -> Result<Installer> {
    let repos = Repositories::load(config).context("Failed to load repositories")?;
    let installer = Installer::new(config, open_db(config)?, repos)?;
    Ok(if yes {
        installer.with_confirm(Box::new(AlwaysYes))
    } else {
        installer.with_confirm(Box::new(StdinPrompt))
    })
}

pub fn parse_refs(packages: &[String]) -> Result<Vec<PackageRef>> {
    packages
        .iter()
        .map(|p| PackageRef::parse(p).with_context(|| format!("Invalid package '{}'", p)))
        .collect()
}

impl TransactionArgs {
    pub fn install_opts(&self, no_deps: bool) -> InstallOpts {
        InstallOpts {
            force: self.force,
            pretend: self.pretend,
            ask: !self.yes,
            download_only: self.download_only,
            no_deps,
            skip_finalizers: self.skip_finalizers,
            check_conflicts: !self.no_check_conflicts,
            safe_check: self.safe_check,
            preserve_system_essential_data: !self.no_preserve_essential,
        }
    }

    /// Apply the solver override to a configuration
    pub fn configure(&self, mut config: Config) -> Config {
        if let Some(solver) = self.solver {
            config.solver.strategy = solver.into();
        }
        config
    }
}

/// Turn the "nothing to do" notice into success
pub fn notice_ok<T>(result: quarry::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_notice() => {
            println!("{}", e);
            Ok(None)
        }
        Err(Error::Cancelled(msg)) => {
            println!("Aborted: {}", msg);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
